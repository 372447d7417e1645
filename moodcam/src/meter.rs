use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;

pub static METER: Meter = Meter::new();

/// Counts detection loop work between log lines.
#[derive(Default)]
pub struct Meter {
    ticks: AtomicU64,
    detections: AtomicU64,
    faces: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            ticks: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            faces: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_detection(&self, found_face: bool) {
        self.detections.fetch_add(1, Ordering::Relaxed);
        if found_face {
            self.faces.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_reset_ticks(&self) -> u64 {
        self.ticks.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_detections(&self) -> u64 {
        self.detections.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_faces(&self) -> u64 {
        self.faces.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = log_interval.tick() => (),
            }

            let ticks = METER.get_reset_ticks();
            let detections = METER.get_reset_detections();
            let faces = METER.get_reset_faces();
            let elapsed = start.elapsed().as_secs_f32();

            if ticks > 0 {
                log::info!("Loop ticks per second: {:.2}", ticks as f32 / elapsed);
            }
            if detections > 0 {
                log::info!(
                    "Detections per second: {:.2}, face in {faces} of {detections}",
                    detections as f32 / elapsed
                );
            }
        }
    })
}
