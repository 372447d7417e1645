//! The per-frame detection loop.
use std::{sync::Arc, time::Duration};

use anyhow::Result;
use facenet::{FaceDetection, FaceNets};
use image::RgbImage;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    camera::{ReadyState, Video},
    config::{CONFIDENCE_THRESHOLD, TICK_INTERVAL},
    meter::METER,
    preview::Preview,
    report::{text, Reporter},
};

/// Finds the most prominent face in a frame and scores its expressions.
pub trait ExpressionDetector: Send + Sync + 'static {
    fn detect_single_face(&self, frame: &RgbImage) -> Result<Option<FaceDetection>>;
}

impl ExpressionDetector for FaceNets {
    fn detect_single_face(&self, frame: &RgbImage) -> Result<Option<FaceDetection>> {
        FaceNets::detect_single_face(self, frame)
    }
}

/// Status text for the outcome of one detection.
pub fn describe_detection(detection: Option<&FaceDetection>, threshold: f32) -> String {
    let Some(detection) = detection else {
        return text::NO_FACE.into();
    };

    match detection.expressions.as_ref().and_then(|scores| scores.top()) {
        None => text::NO_EXPRESSIONS.into(),
        Some((label, confidence)) if confidence >= threshold => format!(
            "{} ({}%)",
            label.to_uppercase(),
            (confidence * 100.0).round() as u32
        ),
        Some(_) => text::EXPRESSION_UNCLEAR.into(),
    }
}

/// Runs detection on the current video frame once per tick.
pub struct DetectionLoop<D> {
    detector: Arc<D>,
    video: Video,
    reporter: Reporter,
    threshold: f32,
    tick: Duration,
    preview: Option<Preview>,
}

impl<D: ExpressionDetector> DetectionLoop<D> {
    pub fn new(detector: Arc<D>, video: Video, reporter: Reporter) -> Self {
        Self {
            detector,
            video,
            reporter,
            threshold: CONFIDENCE_THRESHOLD,
            tick: TICK_INTERVAL,
            preview: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_preview(mut self, preview: Preview) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick until cancelled. A slow detection delays the following ticks instead of queueing them.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticks = interval(self.tick);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Detection loop started, ticking every {:?}", self.tick);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => self.tick().await,
            }
        }

        log::info!("Detection loop stopped");
    }

    async fn tick(&self) {
        METER.tick();

        let frame = match (self.video.ready_state(), self.video.current_frame()) {
            (ReadyState::HaveCurrentData, Some(frame)) if has_area(self.video.dimensions()) => {
                frame
            }
            _ => {
                self.reporter.set_status(text::WAITING_FOR_FRAMES);
                return;
            }
        };

        let detector = self.detector.clone();
        let input = frame.clone();
        let result = tokio::task::spawn_blocking(move || detector.detect_single_face(&input))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);

        match result {
            Ok(detection) => {
                METER.tick_detection(detection.is_some());
                self.reporter
                    .set_status(&describe_detection(detection.as_ref(), self.threshold));
                if let Some(preview) = &self.preview {
                    preview.publish(&frame, detection.as_ref());
                }
            }
            Err(err) => {
                log::error!("DETECTION ERROR: {err:#}");
                self.reporter.set_debug(&format!("Detection error: {err}"));
            }
        }
    }
}

fn has_area((width, height): (u32, u32)) -> bool {
    width > 0 && height > 0
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use anyhow::bail;
    use facenet::ExpressionScores;
    use image::Rgb;

    use super::*;
    use crate::{report::SharedText, sensors::FrameSource};

    fn face(scores: Option<ExpressionScores>) -> FaceDetection {
        FaceDetection {
            bbox: [0.2, 0.2, 0.6, 0.7],
            score: 0.98,
            landmarks: None,
            expressions: scores,
        }
    }

    fn scores(entries: &[(&str, f32)]) -> Option<ExpressionScores> {
        Some(entries.iter().copied().collect())
    }

    #[test]
    fn describes_top_expression() {
        let detection = face(scores(&[("happy", 0.9), ("sad", 0.4)]));
        assert_eq!(describe_detection(Some(&detection), 0.35), "HAPPY (90%)");
    }

    #[test]
    fn low_confidence_is_unclear() {
        let detection = face(scores(&[("neutral", 0.2)]));
        assert_eq!(describe_detection(Some(&detection), 0.35), "Expression unclear");
    }

    #[test]
    fn threshold_is_inclusive() {
        let detection = face(scores(&[("sad", 0.35), ("angry", 0.1)]));
        assert_eq!(describe_detection(Some(&detection), 0.35), "SAD (35%)");
    }

    #[test]
    fn first_of_equal_scores_wins() {
        let detection = face(scores(&[("surprised", 0.5), ("happy", 0.5)]));
        assert_eq!(describe_detection(Some(&detection), 0.35), "SURPRISED (50%)");
    }

    #[test]
    fn missing_face_and_expressions() {
        assert_eq!(describe_detection(None, 0.35), "No face");
        assert_eq!(describe_detection(Some(&face(None)), 0.35), "No expressions");
        assert_eq!(
            describe_detection(Some(&face(scores(&[]))), 0.35),
            "No expressions"
        );
    }

    /// Detector backed by a closure.
    struct FnDetector<F>(F);

    fn detector<F>(detect: F) -> FnDetector<F>
    where
        F: Fn(&RgbImage) -> Result<Option<FaceDetection>> + Send + Sync + 'static,
    {
        FnDetector(detect)
    }

    impl<F> ExpressionDetector for FnDetector<F>
    where
        F: Fn(&RgbImage) -> Result<Option<FaceDetection>> + Send + Sync + 'static,
    {
        fn detect_single_face(&self, frame: &RgbImage) -> Result<Option<FaceDetection>> {
            (self.0)(frame)
        }
    }

    struct GrayFrames {
        frames: bool,
    }

    impl FrameSource for GrayFrames {
        fn resolution(&self) -> Option<(u32, u32)> {
            Some((32, 24))
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            thread::sleep(Duration::from_millis(2));
            Ok(self
                .frames
                .then(|| RgbImage::from_pixel(32, 24, Rgb([128, 128, 128]))))
        }
    }

    struct Harness {
        status: Arc<SharedText>,
        debug: Arc<SharedText>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    async fn start<D: ExpressionDetector>(detector: D, frames: bool) -> Harness {
        let status = Arc::new(SharedText::new());
        let debug = Arc::new(SharedText::new());
        let cancel = CancellationToken::new();

        let video = Video::attach(Box::new(GrayFrames { frames }), cancel.clone());
        video.wait_for_metadata(Duration::from_secs(3)).await;
        video.play().unwrap();

        let handle = DetectionLoop::new(
            Arc::new(detector),
            video,
            Reporter::new(status.clone(), debug.clone()),
        )
        .with_tick(Duration::from_millis(5))
        .spawn(cancel.clone());

        Harness {
            status,
            debug,
            cancel,
            handle,
        }
    }

    async fn wait_for_text(sink: &SharedText, expected: &str) {
        let mut rx = sink.subscribe();
        let seen = tokio::time::timeout(Duration::from_secs(5), async move {
            while *rx.borrow_and_update() != expected {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(
            seen.is_ok(),
            "never saw {expected:?}, last was {:?}",
            sink.current()
        );
    }

    #[tokio::test]
    async fn reports_the_detected_expression() {
        let harness = start(
            detector(|_| Ok(Some(face(scores(&[("happy", 0.9), ("sad", 0.4)]))))),
            true,
        )
        .await;

        wait_for_text(&harness.status, "HAPPY (90%)").await;

        harness.cancel.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn keeps_ticking_without_a_face() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let harness = start(
            detector(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
            true,
        )
        .await;

        wait_for_text(&harness.status, "No face").await;
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(seen.is_ok());

        harness.cancel.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn detection_errors_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let harness = start(
            detector(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    bail!("model exploded");
                }
                Ok(Some(face(scores(&[("neutral", 0.2)]))))
            }),
            true,
        )
        .await;

        wait_for_text(&harness.status, "Expression unclear").await;
        assert_eq!(harness.debug.current(), "Detection error: model exploded");

        harness.cancel.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn waits_while_no_frame_arrived() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let harness = start(
            detector(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
            false,
        )
        .await;

        wait_for_text(&harness.status, "Camera active. Waiting for frames...").await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        harness.cancel.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn preview_gets_annotated_frames() {
        let status = Arc::new(SharedText::new());
        let cancel = CancellationToken::new();
        let preview = Preview::new();
        let mut frames = preview.subscribe();

        let video = Video::attach(Box::new(GrayFrames { frames: true }), cancel.clone());
        video.play().unwrap();
        let handle = DetectionLoop::new(
            Arc::new(detector(|_| Ok(Some(face(None))))),
            video,
            Reporter::new(status.clone(), Arc::new(SharedText::new())),
        )
        .with_tick(Duration::from_millis(5))
        .with_preview(preview)
        .spawn(cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), frames.changed())
            .await
            .unwrap()
            .unwrap();
        let frame = frames.borrow_and_update().clone().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_ne!(*frame.get_pixel(6, 10), Rgb([128, 128, 128]));

        cancel.cancel();
        handle.await.unwrap();
    }
}
