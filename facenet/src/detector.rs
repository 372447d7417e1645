//! Ultraface face detector.
//!
//! The network outputs a confidence pair and a bounding box for each of its prior boxes. Boxes are
//! normalized to the input image, so they are independent of the resolution the network runs at.
use anyhow::{bail, Result};
use image::RgbImage;

use crate::{
    manifest::ModelManifest,
    onnx::{load_runnable, run_flat, InputSpec, NnModel},
};

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Normalized bounding box `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
pub type Bbox = [f32; 4];

/// Options of the face detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorOptions {
    /// Network input size as `(width, height)`. `None` uses the size from the manifest; a
    /// different size only works with models exported with dynamic spatial axes.
    pub input_size: Option<(u32, u32)>,
    /// Candidates at or below this confidence are discarded.
    pub score_threshold: f32,
    /// Candidates overlapping a more confident one by more than this IoU are suppressed.
    pub max_iou: f32,
    /// Run the landmark network on detected faces.
    pub with_landmarks: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: None,
            score_threshold: 0.3,
            max_iou: 0.5,
            with_landmarks: true,
        }
    }
}

/// Pixel rectangle inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Pixel rectangle covered by a normalized bounding box, clamped to the frame.
    ///
    /// Returns `None` if nothing of the box lies inside the frame.
    pub fn from_bbox(bbox: &Bbox, (frame_width, frame_height): (u32, u32)) -> Option<Self> {
        let to_pixels = |value: f32, max: u32| (value * max as f32).clamp(0.0, max as f32) as u32;

        let (x_tl, y_tl) = (to_pixels(bbox[0], frame_width), to_pixels(bbox[1], frame_height));
        let (x_br, y_br) = (to_pixels(bbox[2], frame_width), to_pixels(bbox[3], frame_height));

        (x_br > x_tl && y_br > y_tl).then(|| Self {
            x: x_tl,
            y: y_tl,
            width: x_br - x_tl,
            height: y_br - y_tl,
        })
    }
}

pub struct UltrafaceDetector {
    model: NnModel,
    input: InputSpec,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceDetector {
    pub fn load(manifest: &ModelManifest, weights: &[u8], options: &DetectorOptions) -> Result<Self> {
        let mut input = InputSpec::from_manifest(manifest);
        if input.channels != 3 {
            bail!("face detector expects RGB input, manifest has {} channel(s)", input.channels);
        }
        if let Some(size) = options.input_size {
            input = input.with_size(size);
        }

        let model = load_runnable(weights, &input)?;
        Ok(Self {
            model,
            input,
            max_iou: options.max_iou,
            min_confidence: options.score_threshold,
        })
    }

    /// Input size as `(width, height)`.
    pub fn input_size(&self) -> (u32, u32) {
        (self.input.width, self.input.height)
    }

    /// Detect faces, most confident first.
    pub fn detect(&self, frame: &RgbImage) -> Result<Vec<(Bbox, f32)>> {
        let outputs = run_flat(&self.model, &self.input, frame)?;
        let [scores, boxes] = &outputs[..] else {
            bail!(
                "face detector produced {} outputs, expected scores and boxes",
                outputs.len()
            );
        };

        postproc(scores, boxes, self.min_confidence, self.max_iou)
    }
}

/// Turn raw network outputs into selected boxes with confidences.
///
/// `scores` holds `(background, face)` pairs, `boxes` holds four corners per prior.
fn postproc(
    scores: &[f32],
    boxes: &[f32],
    min_confidence: f32,
    max_iou: f32,
) -> Result<Vec<(Bbox, f32)>> {
    if scores.len() / 2 != boxes.len() / 4 {
        bail!(
            "face detector produced {} scores for {} boxes",
            scores.len() / 2,
            boxes.len() / 4
        );
    }

    let mut candidates: Vec<(Bbox, f32)> = scores
        .chunks_exact(2)
        .map(|pair| pair[1])
        .zip(boxes.chunks_exact(4))
        .filter(|(confidence, _)| *confidence > min_confidence)
        .map(|(confidence, bbox)| ([bbox[0], bbox[1], bbox[2], bbox[3]], confidence))
        .collect();

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    Ok(non_maximum_suppression(candidates, max_iou))
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Candidates are sorted by ascending confidence. Starting with the most confident one, a
/// candidate is selected if it does not overlap any already selected box by more than `max_iou`.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<(Bbox, f32)>,
    max_iou: f32,
) -> Vec<(Bbox, f32)> {
    let mut selected: Vec<(Bbox, f32)> = vec![];
    'candidates: while let Some((bbox, confidence)) = sorted_candidates.pop() {
        for (selected_bbox, _) in selected.iter() {
            if iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push((bbox, confidence));
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // If the boxes do not overlap, the overlap box is ill-defined and has zero area.
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero if the bottom-right corner is not below and right of the
/// top-left one.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}
