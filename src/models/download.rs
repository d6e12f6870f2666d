//! Download orchestration
//!
//! At most one download task runs per model. Concurrent callers for the same
//! id share the running task's result. Files are fetched sequentially and
//! progress is published before each file and once more at completion.

use super::registry::{ModelRegistry, ModelStatus};
use super::repository::ModelRepository;
use crate::error::{ModelError, ModelResult};
use crate::state::RegistryStore;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast};
use tokio::task::AbortHandle;

const ESSENTIAL_EXTENSIONS: &[&str] = &[".json", ".txt", ".safetensors", ".bin", ".py", ".md", ".model"];

/// Path fragments that mark weights for other runtimes
const FOREIGN_RUNTIME_MARKERS: &[&str] =
    &["onnx", "flax", "tf_model", "rust_model", "coreml", "openvino"];

const WEIGHT_SIZE_ESTIMATE: u64 = 100 * 1024 * 1024;
const SMALL_FILE_ESTIMATE: u64 = 1024;

/// Snapshot of a running download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub model_id: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Percent complete
    pub progress: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_secs: f64,
    pub status: String,
}

impl DownloadProgress {
    fn measure(
        model_id: &str,
        downloaded_bytes: u64,
        total_bytes: u64,
        elapsed_secs: f64,
        status: String,
    ) -> Self {
        let progress = if total_bytes == 0 {
            0.0
        } else {
            (downloaded_bytes as f64 / total_bytes as f64 * 100.0).min(100.0)
        };
        let speed = if elapsed_secs > 0.0 {
            downloaded_bytes as f64 / elapsed_secs
        } else {
            0.0
        };
        let eta = if speed > 0.0 {
            total_bytes.saturating_sub(downloaded_bytes) as f64 / speed
        } else {
            0.0
        };

        Self {
            model_id: model_id.to_string(),
            total_bytes,
            downloaded_bytes,
            progress,
            speed_bytes_per_sec: speed,
            eta_secs: eta,
            status,
        }
    }
}

/// Whether a repository file is needed to run the model locally
pub fn is_essential_file(path: &str) -> bool {
    if path.split('/').any(|component| component.starts_with(".git")) {
        return false;
    }

    let lower = path.to_lowercase();
    if FOREIGN_RUNTIME_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }

    ESSENTIAL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Size guess for a file when the repository did not report one
pub fn estimated_size(path: &str) -> u64 {
    if path.ends_with(".safetensors") || path.ends_with(".bin") {
        WEIGHT_SIZE_ESTIMATE
    } else {
        SMALL_FILE_ESTIMATE
    }
}

type SharedOutcome = Shared<BoxFuture<'static, bool>>;

struct InFlight {
    outcome: SharedOutcome,
    abort: AbortHandle,
}

/// Runs and deduplicates model downloads
pub struct DownloadOrchestrator {
    registry: Arc<ModelRegistry>,
    store: Arc<RegistryStore>,
    repository: Arc<dyn ModelRepository>,
    models_dir: PathBuf,
    in_flight: Mutex<HashMap<String, InFlight>>,
    progress: DashMap<String, DownloadProgress>,
    progress_tx: broadcast::Sender<DownloadProgress>,
}

impl DownloadOrchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RegistryStore>,
        repository: Arc<dyn ModelRepository>,
        models_dir: PathBuf,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(256);

        Self {
            registry,
            store,
            repository,
            models_dir,
            in_flight: Mutex::new(HashMap::new()),
            progress: DashMap::new(),
            progress_tx,
        }
    }

    /// Directory a model's files are placed in
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id)
    }

    /// Latest progress of an in-flight download
    pub fn progress(&self, model_id: &str) -> Option<DownloadProgress> {
        self.progress.get(model_id).map(|p| p.value().clone())
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Download a model, or join the download already running for it
    ///
    /// Returns `Ok(true)` when the model's files are on disk afterwards and
    /// `Ok(false)` when the run failed (the reason is on the registry entry).
    pub async fn download(self: &Arc<Self>, model_id: &str) -> ModelResult<bool> {
        let outcome = self.start_or_join(model_id).await?;
        match outcome {
            Some(outcome) => Ok(outcome.await),
            None => Ok(true),
        }
    }

    /// Like [`download`](Self::download), delivering progress for this id to `listener`
    pub async fn download_with_progress<F>(
        self: &Arc<Self>,
        model_id: &str,
        mut listener: F,
    ) -> ModelResult<bool>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let mut rx = self.progress_tx.subscribe();

        let Some(outcome) = self.start_or_join(model_id).await? else {
            return Ok(true);
        };
        tokio::pin!(outcome);

        loop {
            tokio::select! {
                biased;
                Ok(update) = rx.recv() => {
                    if update.model_id == model_id {
                        listener(&update);
                    }
                }
                result = &mut outcome => {
                    while let Ok(update) = rx.try_recv() {
                        if update.model_id == model_id {
                            listener(&update);
                        }
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// Returns `None` when the model is already on disk
    async fn start_or_join(self: &Arc<Self>, model_id: &str) -> ModelResult<Option<SharedOutcome>> {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }

        let mut in_flight = self.in_flight.lock().await;

        if let Some(task) = in_flight.get(model_id) {
            tracing::debug!(model_id = %model_id, "Joining in-flight download");
            return Ok(Some(task.outcome.clone()));
        }

        match self.registry.status(model_id).await {
            Some(ModelStatus::Downloaded | ModelStatus::Loaded) => {
                tracing::debug!(model_id = %model_id, "Model already downloaded");
                return Ok(None);
            }
            Some(_) => {}
            None => return Err(ModelError::NotFound(model_id.to_string())),
        }

        self.registry
            .transition(model_id, ModelStatus::Downloading, "download")
            .await?;
        self.registry
            .update(model_id, |entry| entry.download_progress = 0.0)
            .await?;

        crate::metrics::record_download_started(model_id);

        let this = Arc::clone(self);
        let id = model_id.to_string();
        let handle = tokio::spawn(async move {
            let ok = this.run(&id).await;
            this.in_flight.lock().await.remove(&id);
            crate::metrics::update_downloads_in_flight(this.in_flight.lock().await.len());
            ok
        });

        let abort = handle.abort_handle();
        let outcome = handle.map(|joined| joined.unwrap_or(false)).boxed().shared();

        in_flight.insert(
            model_id.to_string(),
            InFlight {
                outcome: outcome.clone(),
                abort,
            },
        );
        crate::metrics::update_downloads_in_flight(in_flight.len());

        Ok(Some(outcome))
    }

    async fn run(&self, model_id: &str) -> bool {
        let Some(descriptor) = self.registry.descriptor(model_id) else {
            return false;
        };
        let repository = descriptor.repository.as_str();

        tracing::info!(model_id = %model_id, repository = %repository, "Starting model download");

        let listed = match self.repository.list_files(repository).await {
            Ok(files) => files,
            Err(e) => {
                let err = ModelError::RepositoryUnreachable {
                    model_id: model_id.to_string(),
                    reason: format!("{:#}", e),
                };
                return self.fail(model_id, err).await;
            }
        };

        let files: Vec<String> = listed.into_iter().filter(|f| is_essential_file(f)).collect();
        if files.is_empty() {
            let err = ModelError::RepositoryUnreachable {
                model_id: model_id.to_string(),
                reason: "no essential files".to_string(),
            };
            return self.fail(model_id, err).await;
        }

        let sizes: Vec<u64> = match self.repository.file_sizes(repository).await {
            Ok(known) => files
                .iter()
                .map(|f| known.get(f).copied().unwrap_or(SMALL_FILE_ESTIMATE))
                .collect(),
            Err(e) => {
                tracing::warn!(
                    model_id = %model_id,
                    error = %e,
                    "File size lookup failed, using estimates"
                );
                files.iter().map(|f| estimated_size(f)).collect()
            }
        };
        let total_bytes: u64 = sizes.iter().sum();

        let dest_dir = self.model_dir(model_id);
        if let Err(e) = tokio::fs::create_dir_all(&dest_dir).await {
            let err = ModelError::FileFetchFailed {
                model_id: model_id.to_string(),
                file: dest_dir.display().to_string(),
                reason: e.to_string(),
            };
            return self.fail(model_id, err).await;
        }

        tracing::info!(
            model_id = %model_id,
            files = files.len(),
            total_bytes = total_bytes,
            "Downloading essential files"
        );

        let started = Instant::now();
        let mut downloaded_bytes = 0u64;

        for (i, (file, size)) in files.iter().zip(&sizes).enumerate() {
            let status = format!("Downloading {} ({}/{})", file, i + 1, files.len());
            self.publish(DownloadProgress::measure(
                model_id,
                downloaded_bytes,
                total_bytes,
                started.elapsed().as_secs_f64(),
                status,
            ))
            .await;

            if let Err(e) = self.repository.fetch_file(repository, file, &dest_dir).await {
                let err = ModelError::FileFetchFailed {
                    model_id: model_id.to_string(),
                    file: file.clone(),
                    reason: format!("{:#}", e),
                };
                tracing::warn!(model_id = %model_id, error = %err, "Skipping file");
                crate::metrics::record_file_fetch_failure(model_id);
            }

            downloaded_bytes += size;
        }

        self.publish(DownloadProgress::measure(
            model_id,
            total_bytes,
            total_bytes,
            started.elapsed().as_secs_f64(),
            "Download completed".to_string(),
        ))
        .await;

        if !self.complete(model_id, dest_dir).await {
            tracing::warn!(model_id = %model_id, "Download finished after cancellation");
            return false;
        }

        tracing::info!(
            model_id = %model_id,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Model download completed"
        );

        true
    }

    async fn publish(&self, update: DownloadProgress) {
        let _ = self.registry.set_progress(&update.model_id, update.progress).await;
        self.progress.insert(update.model_id.clone(), update.clone());
        let _ = self.progress_tx.send(update);
    }

    /// Returns false when the entry left `downloading` meanwhile
    async fn complete(&self, model_id: &str, dest_dir: PathBuf) -> bool {
        let completed = self
            .registry
            .update(model_id, |entry| {
                if entry.status != ModelStatus::Downloading {
                    return false;
                }
                entry.status = ModelStatus::Downloaded;
                entry.local_path = Some(dest_dir);
                entry.download_progress = 100.0;
                true
            })
            .await
            .unwrap_or(false);

        self.progress.remove(model_id);
        if completed {
            self.store.persist(&self.registry).await;
            crate::metrics::record_download_completed(model_id);
        }
        completed
    }

    async fn fail(&self, model_id: &str, err: ModelError) -> bool {
        tracing::error!(model_id = %model_id, error = %err, "Model download failed");

        let _ = self.registry.set_failed(model_id, err.to_string()).await;
        self.progress.remove(model_id);
        self.store.persist(&self.registry).await;
        crate::metrics::record_download_failed(model_id);

        false
    }

    /// Abort every in-flight download, marking each model failed
    pub async fn cancel_all(&self) -> Vec<String> {
        let drained: Vec<(String, InFlight)> = self.in_flight.lock().await.drain().collect();
        crate::metrics::update_downloads_in_flight(0);

        let mut cancelled = Vec::with_capacity(drained.len());
        for (model_id, task) in drained {
            // Marked before the abort so woken waiters read the error.
            // A task that already completed keeps its outcome.
            let marked = self
                .registry
                .update(&model_id, |entry| {
                    if entry.status == ModelStatus::Downloading {
                        entry.status = ModelStatus::Error;
                        entry.validation_status = Some("download cancelled".to_string());
                        true
                    } else {
                        false
                    }
                })
                .await
                .unwrap_or(false);

            task.abort.abort();
            self.progress.remove(&model_id);

            if marked {
                tracing::warn!(model_id = %model_id, "Download cancelled");
                cancelled.push(model_id);
            }
        }

        if !cancelled.is_empty() {
            self.store.persist(&self.registry).await;
        }

        cancelled
    }
}
