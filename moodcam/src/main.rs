//! moodcam binary.
//!
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use facenet::DetectorOptions;
use moodcam::{
    config::{self, parse_size, Config},
    endpoints::{router, UiState},
    meter::spawn_meter_logger,
    preview::Preview,
    report::{Fanout, LogSink, PresentationSink, Reporter, SharedText},
    sensors::{V4l2Devices, VideoConstraints},
    session,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Model location, an http(s) base URL or a directory
    #[clap(long, default_value = "models")]
    models: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Pixel format of the camera, MJPG or RGB3
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Camera resolution as WIDTHxHEIGHT, the highest supported if not given
    #[clap(long, value_parser = parse_size)]
    resolution: Option<(u32, u32)>,

    /// Camera frame rate, the highest supported if not given
    #[clap(long)]
    fps: Option<u32>,

    /// Detector input size as WIDTHxHEIGHT, taken from the model manifest if not given
    #[clap(long, value_parser = parse_size)]
    input_size: Option<(u32, u32)>,

    /// Minimum face detection score
    #[clap(long, default_value_t = 0.3)]
    score_threshold: f32,

    /// Maximum overlap of two detected faces
    #[clap(long, default_value_t = 0.5)]
    max_iou: f32,

    /// Minimum expression confidence to show a label
    #[clap(long, default_value_t = config::CONFIDENCE_THRESHOLD)]
    threshold: f32,

    /// Milliseconds between detection loop ticks
    #[clap(long, default_value_t = 33)]
    tick_ms: u64,

    /// Milliseconds to wait for the camera to report its dimensions
    #[clap(long, default_value_t = 3000)]
    metadata_timeout_ms: u64,

    /// Skip the landmark network
    #[clap(long)]
    no_landmarks: bool,

    /// Serve the status page on this address, e.g. 127.0.0.1:3000
    #[clap(long)]
    serve: Option<SocketAddr>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            models: args.models,
            camera: VideoConstraints {
                device: args.device,
                format: args.format,
                resolution: args.resolution,
                frame_rate: args.fps,
            },
            detector: DetectorOptions {
                input_size: args.input_size,
                score_threshold: args.score_threshold,
                max_iou: args.max_iou,
                with_landmarks: !args.no_landmarks,
            },
            threshold: args.threshold,
            tick: Duration::from_millis(args.tick_ms.max(1)),
            metadata_timeout: Duration::from_millis(args.metadata_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let serve = args.serve;
    let config = Config::from(args);
    log::debug!("Running with {config:?}");

    let status = Arc::new(SharedText::new());
    let debug = Arc::new(SharedText::new());
    let status_sinks: Vec<Arc<dyn PresentationSink>> = vec![
        Arc::new(LogSink::new("status", log::Level::Info)),
        status.clone(),
    ];
    let debug_sinks: Vec<Arc<dyn PresentationSink>> = vec![
        Arc::new(LogSink::new("debug", log::Level::Debug)),
        debug.clone(),
    ];
    let reporter = Reporter::new(
        Arc::new(Fanout::new(status_sinks)),
        Arc::new(Fanout::new(debug_sinks)),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Shutting down"),
                Err(err) => log::error!("Failed to listen for Ctrl-C: {err}"),
            }
            cancel.cancel();
        });
    }

    let preview = serve.map(|_| Preview::new());
    if let (Some(addr), Some(preview)) = (serve, &preview) {
        let state = Arc::new(UiState::new(&status, &debug, preview));
        let shutdown = cancel.clone();
        let server = axum::Server::try_bind(&addr)?
            .serve(router(state).into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        log::info!("Serving status page on http://{addr}");
        tokio::spawn(async move {
            if let Err(err) = server.await {
                log::error!("Status page failed: {err}");
            }
        });
    }

    spawn_meter_logger(cancel.clone());

    let session = match session::init(&config, &V4l2Devices, reporter, preview, cancel.clone()).await
    {
        Ok(session) => session,
        Err(err) => {
            log::error!("INIT ERROR: {:#}", anyhow::Error::from(err));
            if serve.is_some() {
                log::info!("Keeping the status page up until Ctrl-C");
                cancel.cancelled().await;
            }
            std::process::exit(1);
        }
    };

    cancel.cancelled().await;
    session.stop();
    session.join().await;

    Ok(())
}
