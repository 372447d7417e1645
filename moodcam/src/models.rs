//! Model manifest verification and loading.
use std::path::PathBuf;

use anyhow::{Context, Result};
use facenet::{DetectorOptions, FaceNets, ModelManifest, NetKind};
use reqwest::{header::CACHE_CONTROL, Client};

use crate::{
    report::{text, Reporter},
    InitError,
};

/// Where manifests and weight shards are fetched from.
#[derive(Clone, Debug)]
pub enum ModelSource {
    /// Base URL, e.g. `http://127.0.0.1:8080/models`.
    Http { client: Client, base_url: String },
    Dir(PathBuf),
}

impl ModelSource {
    /// An http(s) URL becomes an HTTP source, anything else a directory.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::http(location)
        } else {
            Self::Dir(PathBuf::from(location))
        }
    }

    pub fn http(base_url: &str) -> Self {
        Self::Http {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Full location of a file, for messages.
    pub fn location(&self, filename: &str) -> String {
        match self {
            Self::Http { base_url, .. } => format!("{base_url}/{filename}"),
            Self::Dir(dir) => dir.join(filename).display().to_string(),
        }
    }

    /// Check whether a file is reachable, bypassing caches.
    ///
    /// Every failure counts as unreachable.
    pub async fn exists(&self, filename: &str) -> bool {
        match self {
            Self::Http { client, .. } => {
                let url = self.location(filename);
                match client.get(&url).header(CACHE_CONTROL, "no-store").send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(err) => {
                        log::debug!("Fetching {url} failed: {err}");
                        false
                    }
                }
            }
            Self::Dir(dir) => tokio::fs::metadata(dir.join(filename))
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
        }
    }

    /// Fetch the content of a file.
    pub async fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        let location = self.location(filename);
        let data = match self {
            Self::Http { client, .. } => client
                .get(&location)
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .with_context(|| format!("failed to fetch {location}"))?
                .bytes()
                .await
                .with_context(|| format!("failed to read {location}"))?
                .to_vec(),
            Self::Dir(dir) => tokio::fs::read(dir.join(filename))
                .await
                .with_context(|| format!("failed to read {location}"))?,
        };
        log::debug!("Fetched {location} ({} bytes)", data.len());

        Ok(data)
    }
}

/// Check that all model manifests are reachable, in load order.
///
/// Stops at the first missing manifest.
pub async fn verify_manifests(source: &ModelSource, reporter: &Reporter) -> Result<(), InitError> {
    reporter.set_status(text::CHECKING_MODELS);

    for kind in NetKind::ALL {
        let filename = kind.manifest_file();
        if !source.exists(filename).await {
            let location = source.location(filename);
            log::error!("Missing model file: {location}");
            reporter.set_status(text::MODELS_MISSING);
            return Err(InitError::MissingManifest(location));
        }
    }

    Ok(())
}

/// Verify the manifests, then load the detector, expression and landmark nets one after another.
pub async fn load_models(
    source: &ModelSource,
    options: DetectorOptions,
    reporter: &Reporter,
) -> Result<FaceNets, InitError> {
    verify_manifests(source, reporter).await?;

    reporter.set_status(text::LOADING_MODELS);
    let mut nets = FaceNets::new(options);
    for kind in NetKind::ALL {
        if let Err(err) = load_net(&mut nets, source, kind).await {
            log::error!("MODEL LOAD ERROR: {kind}: {err:#}");
            reporter.set_status(text::MODEL_LOAD_FAILED);
            return Err(InitError::ModelLoad {
                net: kind,
                source: err,
            });
        }
    }

    reporter.set_status(text::MODELS_LOADED);
    reporter.set_debug(&nets.describe());
    log::info!("Models loaded");

    Ok(nets)
}

async fn load_net(nets: &mut FaceNets, source: &ModelSource, kind: NetKind) -> Result<()> {
    let manifest = ModelManifest::from_json(&source.fetch(kind.manifest_file()).await?)
        .with_context(|| format!("in {}", source.location(kind.manifest_file())))?;

    let mut weights = Vec::new();
    for path in manifest.paths.iter() {
        weights.extend(source.fetch(path).await?);
    }

    nets.load(kind, &manifest, &weights)
}
