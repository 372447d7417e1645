//! Watch a webcam and report the dominant facial expression.
//!
//! Initialization runs strictly in order: the model manifests are checked, the networks are
//! loaded, the camera is started and finally the detection loop is spawned. Any failure before the
//! loop runs aborts initialization with an [`InitError`]; failures inside the loop only affect the
//! frame they happened on.

pub mod camera;
pub mod config;
pub mod detect;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod models;
pub mod preview;
pub mod report;
pub mod sensors;
pub mod session;

pub use error::InitError;
