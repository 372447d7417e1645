//! Sensors module.
//!
//! A camera is reached through [`MediaDevices`], which hands out a [`FrameSource`] for the
//! requested constraints. On Linux, [`V4l2Devices`] opens a video device with `rscam`.
use anyhow::{bail, Result};
use image::RgbImage;
use rscam::{Camera, Config};
use simple_error::simple_error;

/// Requested video stream properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device: String,
    /// FourCC pixel format, `MJPG` or `RGB3`.
    pub format: String,
    /// `(width, height)`, the highest supported resolution if `None`.
    pub resolution: Option<(u32, u32)>,
    /// Frames per second, the highest supported rate if `None`.
    pub frame_rate: Option<u32>,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// A started video stream.
pub trait FrameSource: Send {
    /// Dimensions known before the first frame arrives.
    fn resolution(&self) -> Option<(u32, u32)>;

    /// Wait for the next frame. `Ok(None)` means no frame was ready and the caller should ask
    /// again.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Grants access to cameras.
pub trait MediaDevices {
    fn get_user_media(&self, constraints: &VideoConstraints) -> Result<Box<dyn FrameSource>>;
}

/// Video4Linux devices.
pub struct V4l2Devices;

impl MediaDevices for V4l2Devices {
    fn get_user_media(&self, constraints: &VideoConstraints) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(V4l2Camera::open(constraints)?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Mjpg,
    Rgb3,
}

impl PixelFormat {
    fn from_fourcc(fourcc: &str) -> Result<Self> {
        match fourcc {
            "MJPG" => Ok(Self::Mjpg),
            "RGB3" => Ok(Self::Rgb3),
            other => bail!("unsupported pixel format {other:?}, use MJPG or RGB3"),
        }
    }

    fn fourcc(self) -> &'static [u8] {
        match self {
            Self::Mjpg => b"MJPG",
            Self::Rgb3 => b"RGB3",
        }
    }
}

/// Started V4L2 camera.
pub struct V4l2Camera {
    cam: Camera,
    format: PixelFormat,
    resolution: (u32, u32),
}

impl V4l2Camera {
    /// Open and start a video device on a Linux machine.
    pub fn open(constraints: &VideoConstraints) -> Result<Self> {
        let format = PixelFormat::from_fourcc(&constraints.format)?;
        let mut cam = Camera::new(&constraints.device)?;
        log_supported_formats(&cam, &constraints.format);

        log::info!("Using camera {}", constraints.device);

        let resolution = match constraints.resolution {
            Some(resolution) => resolution,
            None => get_max_resolution(&cam, format.fourcc())?,
        };

        let interval = match constraints.frame_rate {
            Some(fps) => (1, fps.max(1)),
            None => get_max_frame_rate(&cam, format.fourcc(), resolution)?,
        };

        cam.start(&Config {
            interval,
            resolution,
            format: format.fourcc(),
            ..Default::default()
        })?;
        log::info!(
            "Camera started at {}x{}, {}/{} s per frame",
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        Ok(Self {
            cam,
            format,
            resolution,
        })
    }
}

impl FrameSource for V4l2Camera {
    fn resolution(&self) -> Option<(u32, u32)> {
        Some(self.resolution)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.cam.capture()?;
        let image: RgbImage = match self.format {
            PixelFormat::Mjpg => turbojpeg::decompress_image(&frame[..])?,
            PixelFormat::Rgb3 => {
                let (width, height) = frame.resolution;
                RgbImage::from_raw(width, height, frame[..].to_vec())
                    .ok_or_else(|| simple_error!("short RGB3 frame of {} bytes", frame.len()))?
            }
        };

        Ok(Some(image))
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    let resolution = match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    };

    resolution.ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Returns the frame interval `(numerator, denominator)` in seconds.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    let interval = match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .into_iter()
            .filter(|(numerator, _)| *numerator > 0)
            // Shortest interval is the highest frame rate
            .max_by(|a, b| frames_per_second(*a).total_cmp(&frames_per_second(*b))),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    };

    interval.ok_or_else(|| simple_error!("No frame rate found").into())
}

fn frames_per_second((numerator, denominator): (u32, u32)) -> f32 {
    denominator as f32 / numerator as f32
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
