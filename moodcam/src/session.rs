//! Initialization sequence and the running session.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    camera::{start_camera, Video},
    config::Config,
    detect::{DetectionLoop, ExpressionDetector},
    models::{load_models, ModelSource},
    preview::Preview,
    report::Reporter,
    sensors::MediaDevices,
    InitError,
};

/// A started camera with its detection loop.
pub struct Session {
    video: Video,
    detection: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Session {
    /// Start the camera and, once it plays, the detection loop.
    pub async fn start<D, M>(
        detector: Arc<D>,
        media: &M,
        config: &Config,
        reporter: Reporter,
        preview: Option<Preview>,
        cancel: CancellationToken,
    ) -> Result<Self, InitError>
    where
        D: ExpressionDetector,
        M: MediaDevices + ?Sized,
    {
        let video = start_camera(
            media,
            &config.camera,
            config.metadata_timeout,
            &reporter,
            cancel.clone(),
        )
        .await?;

        let mut detection = DetectionLoop::new(detector, video.clone(), reporter)
            .with_threshold(config.threshold)
            .with_tick(config.tick);
        if let Some(preview) = preview {
            detection = detection.with_preview(preview);
        }
        let detection = detection.spawn(cancel.clone());

        Ok(Self {
            video,
            detection,
            cancel,
        })
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    /// Stop the detection loop and release the camera.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the detection loop to finish.
    pub async fn join(self) {
        if let Err(err) = self.detection.await {
            log::error!("Detection loop failed: {err}");
        }
    }
}

/// Verify and load the models, then start the camera and the detection loop.
///
/// Every step waits for the previous one. The camera is not touched unless all models loaded.
pub async fn init<M: MediaDevices + ?Sized>(
    config: &Config,
    media: &M,
    reporter: Reporter,
    preview: Option<Preview>,
    cancel: CancellationToken,
) -> Result<Session, InitError> {
    let source = ModelSource::parse(&config.models);
    log::info!("Loading models from {}", source.location(""));

    let nets = load_models(&source, config.detector.clone(), &reporter).await?;
    Session::start(Arc::new(nets), media, config, reporter, preview, cancel).await
}
