//! Remote model repository client
//!
//! The download orchestrator talks to a [`ModelRepository`]. Production code
//! uses [`HfHubRepository`], which lists and fetches files through hf-hub and
//! reads file sizes from the Hub model API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Source of model files
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// List every file path in a repository
    async fn list_files(&self, repository: &str) -> Result<Vec<String>>;

    /// Byte sizes keyed by file path; files without a known size are omitted
    async fn file_sizes(&self, repository: &str) -> Result<HashMap<String, u64>>;

    /// Fetch one file into `dest_dir`, preserving its relative path
    async fn fetch_file(&self, repository: &str, file: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Hub model API response (partial)
#[derive(Debug, Deserialize)]
struct HubModelInfo {
    #[serde(default)]
    siblings: Vec<HubSibling>,
}

#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
    size: Option<u64>,
}

/// HuggingFace Hub repository
pub struct HfHubRepository {
    api: Api,
    http: reqwest::Client,
    endpoint: String,
}

impl HfHubRepository {
    /// Build a client for `endpoint`, caching blobs in `cache_dir` (hf-hub default if None)
    pub fn new(endpoint: &str, cache_dir: Option<PathBuf>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let mut builder = ApiBuilder::new()
            .with_endpoint(endpoint.clone())
            .with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir);
        }
        let api = builder.build().context("Failed to create HF API client")?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api,
            http,
            endpoint,
        })
    }

    fn model_info_url(&self, repository: &str) -> String {
        format!("{}/api/models/{}?blobs=true", self.endpoint, repository)
    }
}

#[async_trait]
impl ModelRepository for HfHubRepository {
    async fn list_files(&self, repository: &str) -> Result<Vec<String>> {
        let info = self
            .api
            .model(repository.to_string())
            .info()
            .await
            .with_context(|| format!("Failed to list files for {}", repository))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn file_sizes(&self, repository: &str) -> Result<HashMap<String, u64>> {
        let url = self.model_info_url(repository);

        let info: HubModelInfo = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query {}", url))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to decode model info")?;

        Ok(sizes_from_siblings(info.siblings))
    }

    async fn fetch_file(&self, repository: &str, file: &str, dest_dir: &Path) -> Result<PathBuf> {
        let cached = self
            .api
            .model(repository.to_string())
            .get(file)
            .await
            .with_context(|| format!("Failed to download {}", file))?;

        let target = dest_dir.join(file);
        place_file(&cached, &target).await?;

        tracing::debug!(repository = %repository, file = %file, path = ?target, "Fetched file");

        Ok(target)
    }
}

fn sizes_from_siblings(siblings: Vec<HubSibling>) -> HashMap<String, u64> {
    siblings
        .into_iter()
        .filter_map(|s| s.size.map(|size| (s.rfilename, size)))
        .collect()
}

/// Hard-link a cached blob into place, copying when linking is not possible
async fn place_file(cached: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }

    // Snapshot entries are symlinks into the blob store
    let source = tokio::fs::canonicalize(cached)
        .await
        .with_context(|| format!("Failed to resolve cached file {:?}", cached))?;

    match tokio::fs::remove_file(target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to replace {:?}", target)),
    }

    if tokio::fs::hard_link(&source, target).await.is_err() {
        tokio::fs::copy(&source, target)
            .await
            .with_context(|| format!("Failed to copy {:?} to {:?}", source, target))?;
    }

    Ok(())
}
