//! Runtime configuration.
use std::time::Duration;

use facenet::DetectorOptions;

use crate::sensors::VideoConstraints;

/// Minimum confidence for an expression label to be shown.
pub const CONFIDENCE_THRESHOLD: f32 = 0.35;
/// Upper bound on waiting for the camera to report its dimensions.
pub const METADATA_TIMEOUT: Duration = Duration::from_millis(3000);
/// Interval between detection loop ticks, about one display frame.
pub const TICK_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone, Debug)]
pub struct Config {
    /// Model location, an http(s) base URL or a directory.
    pub models: String,
    pub camera: VideoConstraints,
    pub detector: DetectorOptions,
    pub threshold: f32,
    pub tick: Duration,
    pub metadata_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: "models".into(),
            camera: VideoConstraints::default(),
            detector: DetectorOptions::default(),
            threshold: CONFIDENCE_THRESHOLD,
            tick: TICK_INTERVAL,
            metadata_timeout: METADATA_TIMEOUT,
        }
    }
}

/// Parse a `WIDTHxHEIGHT` size such as `1280x720`.
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width: u32 = width.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height: u32 = height.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must not be zero, got {s:?}"));
    }

    Ok((width, height))
}
