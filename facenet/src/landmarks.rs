//! 68-point facial landmarks.
use anyhow::{bail, Result};
use image::RgbImage;

use crate::{
    detector::CropRect,
    manifest::ModelManifest,
    onnx::{load_runnable, run_flat, InputSpec, NnModel},
};

pub const NUM_LANDMARKS: usize = 68;

/// Landmark positions in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<(f32, f32)>,
}

pub struct LandmarkNet {
    model: NnModel,
    input: InputSpec,
}

impl LandmarkNet {
    pub fn load(manifest: &ModelManifest, weights: &[u8]) -> Result<Self> {
        let input = InputSpec::from_manifest(manifest);
        let model = load_runnable(weights, &input)?;
        Ok(Self { model, input })
    }

    /// Locate the landmarks of a face cropped out of a frame at `rect`.
    pub fn locate(&self, face: &RgbImage, rect: CropRect) -> Result<FaceLandmarks> {
        let outputs = run_flat(&self.model, &self.input, face)?;
        let Some(raw) = outputs.first() else {
            bail!("landmark net produced no output");
        };

        map_to_frame(raw, rect)
    }
}

/// Map landmarks normalized to the crop back into the frame.
fn map_to_frame(raw: &[f32], rect: CropRect) -> Result<FaceLandmarks> {
    if raw.len() != NUM_LANDMARKS * 2 {
        bail!(
            "landmark net produced {} values, expected {}",
            raw.len(),
            NUM_LANDMARKS * 2
        );
    }

    let points = raw
        .chunks_exact(2)
        .map(|p| {
            (
                rect.x as f32 + p[0] * rect.width as f32,
                rect.y as f32 + p[1] * rect.height as f32,
            )
        })
        .collect();

    Ok(FaceLandmarks { points })
}
