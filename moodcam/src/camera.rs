//! Camera start and the video it feeds.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::bail;
use image::RgbImage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    report::{text, Reporter},
    sensors::{FrameSource, MediaDevices, VideoConstraints},
    InitError,
};

/// How much of the stream is available, in increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    /// Dimensions are known.
    HaveMetadata,
    /// Playing with a current frame.
    HaveCurrentData,
}

#[derive(Clone, Default)]
struct VideoState {
    dimensions: Option<(u32, u32)>,
    frame: Option<Arc<RgbImage>>,
}

/// A camera stream bound to a capture thread.
///
/// The capture thread only keeps the latest frame. It stops when the cancellation token fires,
/// when the source fails or when every handle to the video is dropped.
#[derive(Clone)]
pub struct Video {
    state: watch::Receiver<VideoState>,
    playing: Arc<AtomicBool>,
}

impl Video {
    /// Start capturing from the source.
    pub fn attach(mut source: Box<dyn FrameSource>, cancel: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(VideoState {
            dimensions: source.resolution(),
            frame: None,
        });

        let spawned = thread::Builder::new()
            .name("video-capture".into())
            .spawn(move || capture_frames(source.as_mut(), &tx, &cancel));
        if let Err(err) = spawned {
            // The sender went down with the closure, so the video reads as ended
            log::error!("Failed to spawn capture thread: {err}");
        }

        Self {
            state: rx,
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        let state = self.state.borrow();
        match (&state.frame, state.dimensions) {
            (Some(_), _) if self.is_playing() => ReadyState::HaveCurrentData,
            (_, Some(_)) => ReadyState::HaveMetadata,
            (Some(_), None) => ReadyState::HaveMetadata,
            (None, None) => ReadyState::HaveNothing,
        }
    }

    /// `(width, height)`, zero while unknown.
    pub fn dimensions(&self) -> (u32, u32) {
        self.state.borrow().dimensions.unwrap_or((0, 0))
    }

    /// Latest frame, once playing.
    pub fn current_frame(&self) -> Option<Arc<RgbImage>> {
        match self.is_playing() {
            true => self.state.borrow().frame.clone(),
            false => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Whether the capture thread has stopped.
    pub fn has_ended(&self) -> bool {
        self.state.has_changed().is_err()
    }

    /// Wait until the dimensions are known, but at most `timeout`.
    ///
    /// Returns `false` if the wait timed out or the stream ended first.
    pub async fn wait_for_metadata(&self, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let wait = async move {
            loop {
                let known = rx.borrow_and_update().dimensions.is_some();
                if known {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(known) => known,
            Err(_) => {
                log::warn!(
                    "No video metadata after {} ms, continuing anyway",
                    timeout.as_millis()
                );
                false
            }
        }
    }

    /// Start handing out frames.
    pub fn play(&self) -> anyhow::Result<()> {
        if self.has_ended() {
            bail!("video stream ended before playback started");
        }
        self.playing.store(true, Ordering::Release);
        Ok(())
    }
}

fn capture_frames(
    source: &mut dyn FrameSource,
    tx: &watch::Sender<VideoState>,
    cancel: &CancellationToken,
) {
    while !cancel.is_cancelled() && !tx.is_closed() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                let dimensions = frame.dimensions();
                tx.send_modify(|state| {
                    state.dimensions = Some(dimensions);
                    state.frame = Some(Arc::new(frame));
                });
            }
            Ok(None) => (),
            Err(err) => {
                log::error!("Capturing frame failed: {err:#}");
                break;
            }
        }
    }

    log::debug!("Capture thread finished");
}

/// Acquire the camera, bind it to a video and start playback.
///
/// The metadata wait is bounded by `metadata_timeout`; playback starts even if the dimensions are
/// still unknown by then.
pub async fn start_camera<M: MediaDevices + ?Sized>(
    media: &M,
    constraints: &VideoConstraints,
    metadata_timeout: Duration,
    reporter: &Reporter,
    cancel: CancellationToken,
) -> Result<Video, InitError> {
    let fail = |err: anyhow::Error| {
        log::error!("CAMERA ERROR: {err:#}");
        reporter.set_status(text::CAMERA_UNAVAILABLE);
        InitError::Camera(err)
    };

    let source = media.get_user_media(constraints).map_err(fail)?;
    let video = Video::attach(source, cancel);

    video.wait_for_metadata(metadata_timeout).await;
    video.play().map_err(fail)?;

    let (width, height) = video.dimensions();
    reporter.set_status(text::CAMERA_ACTIVE);
    reporter.set_debug(&format!("video {width}x{height}"));

    Ok(video)
}
