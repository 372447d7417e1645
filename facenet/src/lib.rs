//! Face detection, facial landmarks and expression classification on top of pretrained ONNX
//! models run with `tract`.
//!
//! Every network is described by a JSON manifest (see [`manifest::ModelManifest`]) and loaded
//! from the concatenated bytes of its weight shards. [`FaceNets`] bundles the three networks and
//! exposes the single-face detect-plus-classify call.

pub mod detector;
pub mod expressions;
pub mod landmarks;
pub mod manifest;
pub mod nets;
mod onnx;

pub use detector::{Bbox, CropRect, DetectorOptions};
pub use expressions::ExpressionScores;
pub use landmarks::FaceLandmarks;
pub use manifest::ModelManifest;
pub use nets::{FaceDetection, FaceNets, NetKind};
