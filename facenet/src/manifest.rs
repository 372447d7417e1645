//! Model manifests.
//!
//! A manifest is fetched before the weights and describes how to get from the shard files to a
//! runnable network:
//!
//! ```json
//! {
//!   "paths": ["ultraface-RFB-320.onnx"],
//!   "input_shape": [1, 3, 240, 320],
//!   "mean": [0.498],
//!   "std": [0.502]
//! }
//! ```
//!
//! Unknown fields are ignored so that manifests may carry extra bookkeeping.
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Weight layout and input description of a single network.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ModelManifest {
    /// Shard file names, relative to the model directory. Concatenated in order they form the
    /// ONNX file.
    pub paths: Vec<String>,
    /// `[1, channels, height, width]`
    pub input_shape: Vec<usize>,
    #[serde(default)]
    pub mean: Vec<f32>,
    #[serde(default)]
    pub std: Vec<f32>,
    /// Output labels of classifier networks, in output order.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_softmax")]
    pub softmax: bool,
}

fn default_softmax() -> bool {
    true
}

impl ModelManifest {
    /// Parse and validate a manifest from its JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: ModelManifest =
            serde_json::from_slice(bytes).context("malformed model manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn channels(&self) -> usize {
        self.input_shape[1]
    }

    /// Input size as `(width, height)`.
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_shape[3] as u32, self.input_shape[2] as u32)
    }

    fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            bail!("manifest lists no weight files");
        }
        if let Some(path) = self.paths.iter().find(|p| p.is_empty() || p.contains("..")) {
            bail!("invalid weight file path {path:?}");
        }

        match self.input_shape[..] {
            [1, c, h, w] if (c == 1 || c == 3) && h > 0 && w > 0 => (),
            _ => bail!(
                "input shape must be [1, 1|3, height, width], got {:?}",
                self.input_shape
            ),
        }

        let channels = self.channels();
        for (name, values) in [("mean", &self.mean), ("std", &self.std)] {
            if !(values.is_empty() || values.len() == 1 || values.len() == channels) {
                bail!(
                    "{name} needs 1 or {channels} values, got {}",
                    values.len()
                );
            }
        }
        if self.std.iter().any(|s| *s == 0.0) {
            bail!("std must not contain zeros");
        }

        Ok(())
    }
}
