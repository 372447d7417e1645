//! The bundle of networks and the single-face pipeline.
use std::fmt;

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

use crate::{
    detector::{Bbox, CropRect, DetectorOptions, UltrafaceDetector},
    expressions::{ExpressionNet, ExpressionScores},
    landmarks::{FaceLandmarks, LandmarkNet},
    manifest::ModelManifest,
};

/// The networks making up the pipeline, in load order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetKind {
    FaceDetector,
    FaceExpression,
    FaceLandmark68,
}

impl NetKind {
    pub const ALL: [NetKind; 3] = [
        NetKind::FaceDetector,
        NetKind::FaceExpression,
        NetKind::FaceLandmark68,
    ];

    /// File name of the manifest inside the model directory.
    pub fn manifest_file(self) -> &'static str {
        match self {
            NetKind::FaceDetector => "tiny_face_detector_model-weights_manifest.json",
            NetKind::FaceExpression => "face_expression_model-weights_manifest.json",
            NetKind::FaceLandmark68 => "face_landmark_68_model-weights_manifest.json",
        }
    }
}

impl fmt::Display for NetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetKind::FaceDetector => "face detector",
            NetKind::FaceExpression => "face expression net",
            NetKind::FaceLandmark68 => "face landmark 68 net",
        };
        f.write_str(name)
    }
}

/// The single face found in a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDetection {
    pub bbox: Bbox,
    pub score: f32,
    pub landmarks: Option<FaceLandmarks>,
    /// `None` if the face could not be classified, e.g. because no expression net is loaded.
    pub expressions: Option<ExpressionScores>,
}

/// Face detector, expression net and landmark net.
#[derive(Default)]
pub struct FaceNets {
    options: DetectorOptions,
    detector: Option<UltrafaceDetector>,
    expressions: Option<ExpressionNet>,
    landmarks: Option<LandmarkNet>,
}

impl FaceNets {
    pub fn new(options: DetectorOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Load one network from its manifest and the concatenated weight shards.
    pub fn load(&mut self, kind: NetKind, manifest: &ModelManifest, weights: &[u8]) -> Result<()> {
        match kind {
            NetKind::FaceDetector => {
                self.detector = Some(UltrafaceDetector::load(manifest, weights, &self.options)?)
            }
            NetKind::FaceExpression => {
                self.expressions = Some(ExpressionNet::load(manifest, weights)?)
            }
            NetKind::FaceLandmark68 => self.landmarks = Some(LandmarkNet::load(manifest, weights)?),
        }
        log::info!("Loaded {kind} ({} bytes of weights)", weights.len());

        Ok(())
    }

    pub fn is_loaded(&self, kind: NetKind) -> bool {
        match kind {
            NetKind::FaceDetector => self.detector.is_some(),
            NetKind::FaceExpression => self.expressions.is_some(),
            NetKind::FaceLandmark68 => self.landmarks.is_some(),
        }
    }

    /// Short human readable summary of what is loaded.
    pub fn describe(&self) -> String {
        let detector = match &self.detector {
            Some(detector) => {
                let (width, height) = detector.input_size();
                format!("detector {width}x{height}")
            }
            None => "no detector".into(),
        };
        let expressions = match &self.expressions {
            Some(net) => format!("{} expressions", net.labels().len()),
            None => "no expressions".into(),
        };
        let landmarks = match (&self.landmarks, self.options.with_landmarks) {
            (Some(_), true) => "landmarks on",
            (Some(_), false) => "landmarks off",
            (None, _) => "no landmarks",
        };

        format!("{detector}, {expressions}, {landmarks}")
    }

    /// Detect the most confident face and classify its expression.
    ///
    /// Returns `Ok(None)` if no face is found.
    pub fn detect_single_face(&self, frame: &RgbImage) -> Result<Option<FaceDetection>> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| anyhow!("{} is not loaded", NetKind::FaceDetector))?;

        let Some((bbox, score)) = detector.detect(frame)?.into_iter().next() else {
            return Ok(None);
        };

        let mut detection = FaceDetection {
            bbox,
            score,
            landmarks: None,
            expressions: None,
        };

        // A box touching only the frame border leaves nothing to classify
        let Some(rect) = CropRect::from_bbox(&bbox, frame.dimensions()) else {
            return Ok(Some(detection));
        };
        let face = imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();

        if let Some(net) = &self.expressions {
            detection.expressions = Some(net.classify(&face)?);
        }
        if let (Some(net), true) = (&self.landmarks, self.options.with_landmarks) {
            detection.landmarks = Some(net.locate(&face, rect)?);
        }

        Ok(Some(detection))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgb;

    #[test]
    fn manifest_files_are_distinct() {
        let mut files: Vec<_> = NetKind::ALL.iter().map(|k| k.manifest_file()).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.ends_with("-weights_manifest.json")));
    }

    #[test]
    fn detection_without_detector_fails() {
        let nets = FaceNets::new(DetectorOptions::default());
        let frame = RgbImage::from_pixel(32, 24, Rgb([128, 128, 128]));

        let err = nets.detect_single_face(&frame).unwrap_err();
        assert!(err.to_string().contains("face detector"));
    }

    #[test]
    fn loading_garbage_leaves_net_unloaded() {
        let mut nets = FaceNets::new(DetectorOptions::default());
        let manifest = ModelManifest {
            paths: vec!["face_expression_model-shard1".into()],
            input_shape: vec![1, 1, 64, 64],
            mean: vec![],
            std: vec![],
            labels: vec![],
            softmax: true,
        };

        assert!(nets
            .load(NetKind::FaceExpression, &manifest, b"not an onnx file")
            .is_err());
        assert!(!nets.is_loaded(NetKind::FaceExpression));
        assert_eq!(
            nets.describe(),
            "no detector, no expressions, no landmarks"
        );
    }
}
