//! Model manager context
//!
//! [`ModelManager`] is built once at start-up and owns the registry, the
//! download orchestrator, the validation engine, the runtime pool, the
//! benchmark recorder and the eviction sweeper. The HTTP layer and the
//! binary only talk to this type.

use crate::benchmark::{BenchmarkRecorder, PerformanceSample, ResourceSampler, SystemSampler};
use crate::capability::{CapabilityProvider, HardwareCapabilityProvider, PerformanceTier};
use crate::config::ManagerConfig;
use crate::error::ModelResult;
use crate::eviction::EvictionSweeper;
use crate::models::catalog::{ModelCategory, ModelDescriptor, default_catalog};
use crate::models::download::{DownloadOrchestrator, DownloadProgress};
use crate::models::registry::{ModelEvent, ModelInfo, ModelRegistry, ModelStatus};
use crate::models::repository::{HfHubRepository, ModelRepository};
use crate::models::validation::ValidationEngine;
use crate::runtime::{CandleBackend, InferenceBackend, RuntimePool, WorkerPool};
use crate::state::{FileSystemStorage, RegistryStore, StorageBackend};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

/// Overview of the registry and host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total_models: usize,
    pub loaded_models: usize,
    pub status_counts: BTreeMap<ModelStatus, usize>,
    pub hardware_tier: PerformanceTier,
    pub gpu_count: usize,
    pub recommended_models: Vec<String>,
    pub advice: BTreeMap<String, String>,
}

/// Optional collaborators; anything unset gets the production default
#[derive(Default)]
pub struct ManagerBuilder {
    catalog: Option<Vec<ModelDescriptor>>,
    repository: Option<Arc<dyn ModelRepository>>,
    backend: Option<Arc<dyn InferenceBackend>>,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
    storage: Option<Arc<dyn StorageBackend>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
}

impl ManagerBuilder {
    pub fn catalog(mut self, catalog: Vec<ModelDescriptor>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn ModelRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Wire every component and restore cached registry state
    pub async fn build(self, config: ManagerConfig) -> Result<Arc<ModelManager>> {
        let repository: Arc<dyn ModelRepository> = match self.repository {
            Some(repository) => repository,
            None => Arc::new(HfHubRepository::new(
                &config.hub_endpoint,
                config.hub_cache_dir.clone(),
                config.download_timeout(),
            )?),
        };
        let backend: Arc<dyn InferenceBackend> = self
            .backend
            .unwrap_or_else(|| Arc::new(CandleBackend::new()));
        let capabilities: Arc<dyn CapabilityProvider> = self
            .capabilities
            .unwrap_or_else(|| Arc::new(HardwareCapabilityProvider::detect(config.enable_gpu)));
        let storage: Arc<dyn StorageBackend> = self
            .storage
            .unwrap_or_else(|| Arc::new(FileSystemStorage::new()));
        let sampler: Arc<dyn ResourceSampler> =
            self.sampler.unwrap_or_else(|| Arc::new(SystemSampler));

        let registry = Arc::new(ModelRegistry::new(
            self.catalog.unwrap_or_else(default_catalog),
        ));
        let store = Arc::new(RegistryStore::new_with_storage(
            config.registry_cache_path(),
            storage,
        ));
        store.restore(&registry).await;

        let workers = WorkerPool::new(config.inference_workers);
        let construction = Arc::new(Mutex::new(()));

        let downloads = Arc::new(DownloadOrchestrator::new(
            registry.clone(),
            store.clone(),
            repository,
            config.models_dir().to_path_buf(),
        ));
        let validator = ValidationEngine::new(
            registry.clone(),
            store.clone(),
            backend.clone(),
            workers.clone(),
            construction.clone(),
            config.models_dir().to_path_buf(),
            config.enable_gpu,
        );
        let pool = Arc::new(RuntimePool::new(
            registry.clone(),
            store.clone(),
            backend,
            workers.clone(),
            construction,
            config.enable_gpu,
            config.max_loaded_models,
        ));
        let benchmarks =
            BenchmarkRecorder::new(registry.clone(), pool.clone(), workers, sampler);
        let sweeper = Arc::new(EvictionSweeper::new(
            registry.clone(),
            store.clone(),
            pool.clone(),
            config.eviction_interval(),
            config.idle_threshold(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            models = registry.count(),
            models_dir = ?config.models_dir,
            cache = ?store.cache_file(),
            "Model manager initialized"
        );

        Ok(Arc::new(ModelManager {
            registry,
            store,
            capabilities,
            downloads,
            validator,
            pool,
            benchmarks,
            sweeper,
            shutdown_tx,
            sweeper_task: Mutex::new(None),
        }))
    }
}

/// Lifecycle manager for catalogued models
pub struct ModelManager {
    registry: Arc<ModelRegistry>,
    store: Arc<RegistryStore>,
    capabilities: Arc<dyn CapabilityProvider>,
    downloads: Arc<DownloadOrchestrator>,
    validator: ValidationEngine,
    pool: Arc<RuntimePool>,
    benchmarks: BenchmarkRecorder,
    sweeper: Arc<EvictionSweeper>,
    shutdown_tx: watch::Sender<bool>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl ModelManager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Catalogued models with status, filtered and sorted by (tier, size, id)
    pub async fn list(
        &self,
        category: Option<ModelCategory>,
        tier: Option<PerformanceTier>,
    ) -> Vec<ModelInfo> {
        self.registry.list(category, tier).await
    }

    pub async fn get(&self, model_id: &str) -> ModelResult<ModelInfo> {
        self.registry.get(model_id).await
    }

    /// Models suited to this host
    pub async fn recommendations(&self) -> Vec<ModelInfo> {
        let capabilities = self.capabilities.capabilities();
        self.registry.recommendations(&capabilities).await
    }

    pub async fn download(&self, model_id: &str) -> ModelResult<bool> {
        self.downloads.download(model_id).await
    }

    pub async fn download_with_progress<F>(&self, model_id: &str, listener: F) -> ModelResult<bool>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        self.downloads
            .download_with_progress(model_id, listener)
            .await
    }

    /// Progress of an in-flight download
    pub fn progress(&self, model_id: &str) -> Option<DownloadProgress> {
        self.downloads.progress(model_id)
    }

    pub async fn validate(&self, model_id: &str) -> ModelResult<bool> {
        self.validator.validate(model_id).await
    }

    pub async fn load(&self, model_id: &str) -> ModelResult<bool> {
        self.pool.load(model_id).await
    }

    pub async fn unload(&self, model_id: &str) -> ModelResult<bool> {
        self.pool.unload(model_id).await
    }

    pub async fn loaded_ids(&self) -> Vec<String> {
        self.pool.loaded_ids().await
    }

    pub async fn benchmark(&self, model_id: &str) -> ModelResult<Option<PerformanceSample>> {
        self.benchmarks.benchmark(model_id).await
    }

    pub async fn performance_history(&self, model_id: &str) -> ModelResult<Vec<PerformanceSample>> {
        self.benchmarks.history(model_id).await
    }

    pub async fn status_summary(&self) -> StatusSummary {
        let capabilities = self.capabilities.capabilities();

        StatusSummary {
            total_models: self.registry.count(),
            loaded_models: self.pool.loaded_count().await,
            status_counts: self.registry.status_counts().await,
            hardware_tier: capabilities.performance_tier,
            gpu_count: capabilities.gpu_count,
            recommended_models: capabilities.recommended_models,
            advice: capabilities.advice,
        }
    }

    /// Run one eviction sweep with the configured threshold
    pub async fn sweep_idle(&self) -> Vec<String> {
        self.sweeper.sweep_once().await
    }

    /// Run one eviction sweep with an explicit threshold
    pub async fn sweep_older_than(&self, threshold: Duration) -> Vec<String> {
        self.sweeper.sweep_older_than(threshold).await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ModelEvent> {
        self.registry.subscribe_events()
    }

    /// Start the background eviction loop (once)
    pub async fn spawn_sweeper(&self) {
        let mut task = self.sweeper_task.lock().await;
        if task.is_some() {
            return;
        }
        let sweeper = self.sweeper.clone();
        *task = Some(tokio::spawn(sweeper.run(self.shutdown_tx.subscribe())));
    }

    /// Cancel downloads, stop the sweeper and save the registry
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down model manager");

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.sweeper_task.lock().await.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Eviction sweeper ended abnormally");
        }

        let cancelled = self.downloads.cancel_all().await;
        if !cancelled.is_empty() {
            tracing::info!(cancelled = ?cancelled, "Cancelled in-flight downloads");
        }

        self.store.persist(&self.registry).await;
    }
}
