//! Errors aborting initialization.
use facenet::NetKind;
use thiserror::Error;

/// Fatal initialization failures. None of them is retried.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("missing model file: {0}")]
    MissingManifest(String),

    #[error("failed to load the {net}")]
    ModelLoad {
        net: NetKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("camera access denied or unavailable")]
    Camera(#[source] anyhow::Error),
}
