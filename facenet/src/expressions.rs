//! Facial expression classification.
use anyhow::{bail, Result};
use image::RgbImage;
use serde::Serialize;

use crate::{
    manifest::ModelManifest,
    onnx::{load_runnable, run_flat, InputSpec, NnModel},
};

/// Labels used when the manifest does not name the outputs.
pub const DEFAULT_LABELS: [&str; 7] = [
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

/// Confidence per expression name, in the output order of the classifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExpressionScores(Vec<(String, f32)>);

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the confidence of an expression. A known expression keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, confidence: f32) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = confidence,
            None => self.0.push((name, confidence)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(n, c)| (n.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most confident expression.
    ///
    /// On ties the first maximal entry in insertion order wins.
    pub fn top(&self) -> Option<(&str, f32)> {
        self.iter().fold(None, |best, (name, confidence)| match best {
            // NaN never takes over
            #[allow(clippy::neg_cmp_op_on_partial_ord)]
            Some((_, best_confidence)) if !(confidence > best_confidence) => best,
            _ => Some((name, confidence)),
        })
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut scores = Self::new();
        for (name, confidence) in iter {
            scores.insert(name, confidence);
        }
        scores
    }
}

pub struct ExpressionNet {
    model: NnModel,
    input: InputSpec,
    labels: Vec<String>,
    softmax: bool,
}

impl ExpressionNet {
    pub fn load(manifest: &ModelManifest, weights: &[u8]) -> Result<Self> {
        let labels = match manifest.labels.is_empty() {
            true => DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            false => manifest.labels.clone(),
        };
        let input = InputSpec::from_manifest(manifest);
        let model = load_runnable(weights, &input)?;

        Ok(Self {
            model,
            input,
            labels,
            softmax: manifest.softmax,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Classify a cropped face.
    pub fn classify(&self, face: &RgbImage) -> Result<ExpressionScores> {
        let outputs = run_flat(&self.model, &self.input, face)?;
        let Some(raw) = outputs.first() else {
            bail!("expression net produced no output");
        };

        self.label(raw)
    }

    fn label(&self, raw: &[f32]) -> Result<ExpressionScores> {
        if raw.len() != self.labels.len() {
            bail!(
                "expression net produced {} scores for {} labels",
                raw.len(),
                self.labels.len()
            );
        }

        let confidences = match self.softmax {
            true => softmax(raw),
            false => raw.to_vec(),
        };

        Ok(self.labels.iter().cloned().zip(confidences).collect())
    }
}

/// Numerically stable softmax.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
