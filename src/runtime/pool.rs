//! Pool of loaded model handles
//!
//! A handle exists exactly while its registry entry is `loaded`: the status
//! flip happens while the pool write lock is held. Readers take a
//! [`HandleLease`] under the read lock; leased handles cannot be unloaded.
//! Lock order is pool, then registry.

use super::backend::{ComputeDevice, InferenceBackend, LoadedModel, TextCodec, probe_tokens};
use super::{ConstructionLock, WorkerPool};
use crate::error::{ModelError, ModelResult};
use crate::models::metadata::parse_model_config;
use crate::models::registry::{ModelRegistry, ModelStatus};
use crate::state::RegistryStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A model and tokenizer held in memory
pub struct RuntimeHandle {
    model_id: String,
    model: Box<dyn LoadedModel>,
    tokenizer: Box<dyn TextCodec>,
    device: ComputeDevice,
    loaded_at: DateTime<Utc>,
    loaded_instant: Instant,
    in_use: AtomicUsize,
}

impl RuntimeHandle {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Time since the handle was created
    pub fn age(&self) -> Duration {
        self.loaded_instant.elapsed()
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst) > 0
    }

    /// Token ids for `text`, falling back to fixed ids
    pub fn encode(&self, text: &str) -> Vec<u32> {
        probe_tokens(Some(self.tokenizer.as_ref()), text)
    }

    pub fn forward(&self, tokens: &[u32]) -> Result<()> {
        self.model.forward(tokens)
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("model_id", &self.model_id)
            .field("device", &self.device)
            .field("loaded_at", &self.loaded_at)
            .field("in_use", &self.in_use.load(Ordering::SeqCst))
            .finish()
    }
}

/// Shared use of a handle; released on drop
pub struct HandleLease {
    handle: Arc<RuntimeHandle>,
}

impl HandleLease {
    fn new(handle: Arc<RuntimeHandle>) -> Self {
        handle.in_use.fetch_add(1, Ordering::SeqCst);
        Self { handle }
    }
}

impl Deref for HandleLease {
    type Target = RuntimeHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.handle.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded set of loaded models
pub struct RuntimePool {
    registry: Arc<ModelRegistry>,
    store: Arc<RegistryStore>,
    backend: Arc<dyn InferenceBackend>,
    workers: WorkerPool,
    construction: ConstructionLock,
    handles: RwLock<HashMap<String, Arc<RuntimeHandle>>>,
    allow_accelerator: bool,
    capacity: usize,
}

impl RuntimePool {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RegistryStore>,
        backend: Arc<dyn InferenceBackend>,
        workers: WorkerPool,
        construction: ConstructionLock,
        allow_accelerator: bool,
        capacity: usize,
    ) -> Self {
        Self {
            registry,
            store,
            backend,
            workers,
            construction,
            handles: RwLock::new(HashMap::new()),
            allow_accelerator,
            capacity: capacity.max(1),
        }
    }

    /// Sorted ids of loaded models
    pub async fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn loaded_count(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_loaded(&self, model_id: &str) -> bool {
        self.handles.read().await.contains_key(model_id)
    }

    /// Lease a loaded handle
    pub async fn lease(&self, model_id: &str) -> Option<HandleLease> {
        let handles = self.handles.read().await;
        handles.get(model_id).cloned().map(HandleLease::new)
    }

    /// Load a downloaded model into the pool
    ///
    /// Returns `Ok(false)` when construction fails; the registry entry is
    /// left unchanged in that case.
    pub async fn load(&self, model_id: &str) -> ModelResult<bool> {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }
        if self.is_loaded(model_id).await {
            return Ok(true);
        }

        let _construction = self.construction.lock().await;

        // Another caller may have finished loading while we waited
        if self.is_loaded(model_id).await {
            return Ok(true);
        }

        let entry = self
            .registry
            .entry(model_id)
            .await
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;
        if entry.status != ModelStatus::Downloaded {
            return Err(ModelError::InvalidState {
                model_id: model_id.to_string(),
                status: entry.status,
                operation: "load",
            });
        }
        let Some(model_dir) = entry.local_path else {
            let err = ModelError::ConstructionFailed {
                model_id: model_id.to_string(),
                reason: "no local path".to_string(),
            };
            tracing::error!(error = %err, "Model load failed");
            return Ok(false);
        };

        self.make_room(model_id).await?;

        let (device, tokenizer, model) = match self.construct(model_dir).await {
            Ok(parts) => parts,
            Err(e) => {
                let err = ModelError::ConstructionFailed {
                    model_id: model_id.to_string(),
                    reason: format!("{:#}", e),
                };
                tracing::error!(error = %err, "Model load failed");
                // make_room may have unloaded a model
                self.store.persist(&self.registry).await;
                return Ok(false);
            }
        };

        let handle = Arc::new(RuntimeHandle {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            loaded_at: Utc::now(),
            loaded_instant: Instant::now(),
            in_use: AtomicUsize::new(0),
        });

        let mut handles = self.handles.write().await;
        if let Err(e) = self
            .registry
            .transition(model_id, ModelStatus::Loaded, "load")
            .await
        {
            drop(handles);
            self.teardown(handle).await;
            return Err(e);
        }
        handles.insert(model_id.to_string(), handle);
        let count = handles.len();
        drop(handles);

        tracing::info!(model_id = %model_id, device = %device, "Model loaded");
        crate::metrics::record_model_loaded(model_id, &device.to_string());
        crate::metrics::update_loaded_count(count);

        self.store.persist(&self.registry).await;

        Ok(true)
    }

    async fn construct(
        &self,
        model_dir: PathBuf,
    ) -> Result<(ComputeDevice, Box<dyn TextCodec>, Box<dyn LoadedModel>)> {
        let backend = self.backend.clone();
        let allow_accelerator = self.allow_accelerator;

        self.workers
            .run(move || -> Result<(ComputeDevice, Box<dyn TextCodec>, Box<dyn LoadedModel>)> {
                let metadata = parse_model_config(&model_dir)?;
                let device = backend.select_device(allow_accelerator);
                let tokenizer = backend.load_tokenizer(&model_dir)?;
                let model = backend.load_model(&model_dir, &metadata, device)?;
                Ok((device, tokenizer, model))
            })
            .await?
    }

    /// Evict the oldest idle handle when the pool is full
    async fn make_room(&self, incoming: &str) -> ModelResult<()> {
        let victim = {
            let handles = self.handles.read().await;
            if handles.len() < self.capacity {
                return Ok(());
            }
            handles
                .values()
                .filter(|h| !h.is_in_use())
                .min_by_key(|h| h.loaded_instant)
                .map(|h| h.model_id.clone())
        };

        let Some(victim) = victim else {
            tracing::warn!(model_id = %incoming, capacity = self.capacity, "Pool full and every model in use");
            return Err(ModelError::ResourceBusy(incoming.to_string()));
        };

        tracing::info!(model_id = %victim, incoming = %incoming, "Pool full, unloading oldest model");
        self.detach(&victim).await?;
        Ok(())
    }

    /// Unload a model and persist the registry
    pub async fn unload(&self, model_id: &str) -> ModelResult<bool> {
        let unloaded = self.detach(model_id).await?;
        if unloaded {
            self.store.persist(&self.registry).await;
        }
        Ok(unloaded)
    }

    /// Unload without persisting; callers persist once for a batch
    pub async fn detach(&self, model_id: &str) -> ModelResult<bool> {
        self.detach_where(model_id, |_| true).await
    }

    /// Like [`detach`](Self::detach), but only a handle at least `threshold` old
    ///
    /// The age is checked under the write lock, so a handle reloaded after
    /// [`expired`](Self::expired) listed its id is left alone.
    pub async fn detach_if_older(&self, model_id: &str, threshold: Duration) -> ModelResult<bool> {
        self.detach_where(model_id, |handle| handle.age() >= threshold)
            .await
    }

    async fn detach_where<F>(&self, model_id: &str, eligible: F) -> ModelResult<bool>
    where
        F: Fn(&RuntimeHandle) -> bool,
    {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }

        let mut handles = self.handles.write().await;
        match handles.get(model_id) {
            None => return Ok(false),
            Some(handle) if !eligible(handle.as_ref()) => return Ok(false),
            Some(handle) if handle.is_in_use() => {
                return Err(ModelError::ResourceBusy(model_id.to_string()));
            }
            Some(_) => {}
        }

        let Some(handle) = handles.remove(model_id) else {
            return Ok(false);
        };
        if let Err(e) = self
            .registry
            .transition(model_id, ModelStatus::Downloaded, "unload")
            .await
        {
            tracing::warn!(model_id = %model_id, error = %e, "Unexpected status while unloading");
        }
        let count = handles.len();
        drop(handles);

        self.teardown(handle).await;

        tracing::info!(model_id = %model_id, "Model unloaded");
        crate::metrics::record_model_unloaded(model_id);
        crate::metrics::update_loaded_count(count);

        Ok(true)
    }

    /// Ids of handles older than `threshold`, oldest first
    pub async fn expired(&self, threshold: Duration) -> Vec<String> {
        let handles = self.handles.read().await;
        let mut expired: Vec<&Arc<RuntimeHandle>> =
            handles.values().filter(|h| h.age() >= threshold).collect();
        expired.sort_by_key(|h| h.loaded_instant);
        expired.into_iter().map(|h| h.model_id.clone()).collect()
    }

    async fn teardown(&self, handle: Arc<RuntimeHandle>) {
        let backend = self.backend.clone();
        let result = self
            .workers
            .run(move || {
                let device = handle.device;
                drop(handle);
                backend.release(device);
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Model teardown failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::runtime::backend::mocks::MockBackend;

    #[tokio::test]
    async fn test_load_flips_status() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);

        assert!(pool.load("gpt2").await.unwrap());
        assert_eq!(pool.loaded_ids().await, vec!["gpt2".to_string()]);
        assert_eq!(fixture.registry.status("gpt2").await, Some(ModelStatus::Loaded));
    }

    #[tokio::test]
    async fn test_repeated_load_single_handle() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);

        let (a, b) = tokio::join!(pool.load("gpt2"), pool.load("gpt2"));
        assert!(a.unwrap() && b.unwrap());
        assert!(pool.load("gpt2").await.unwrap());

        assert_eq!(fixture.backend.models_built(), 1);
        assert_eq!(pool.loaded_count().await, 1);
    }

    #[tokio::test]
    async fn test_load_requires_downloaded() {
        let fixture = Fixture::new(MockBackend::default());
        let pool = fixture.pool(3);

        let err = pool.load("gpt2").await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidState {
                status: ModelStatus::Available,
                ..
            }
        ));
        assert!(matches!(
            pool.load("nonexistent").await.unwrap_err(),
            ModelError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_construction_failure_leaves_status() {
        let fixture = Fixture::new(MockBackend::failing_model());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);

        assert!(!pool.load("gpt2").await.unwrap());
        assert!(pool.loaded_ids().await.is_empty());
        assert_eq!(
            fixture.registry.status("gpt2").await,
            Some(ModelStatus::Downloaded)
        );
    }

    #[tokio::test]
    async fn test_missing_tokenizer_fails_load() {
        let backend = MockBackend::default();
        backend.fail_tokenizer.store(true, Ordering::SeqCst);
        let fixture = Fixture::new(backend);
        fixture.downloaded("gpt2").await;

        assert!(!fixture.pool(3).load("gpt2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unload_returns_to_downloaded() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);

        pool.load("gpt2").await.unwrap();
        assert!(pool.unload("gpt2").await.unwrap());
        assert!(!pool.unload("gpt2").await.unwrap());

        assert_eq!(
            fixture.registry.status("gpt2").await,
            Some(ModelStatus::Downloaded)
        );
        assert_eq!(fixture.backend.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leased_handle_cannot_unload() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);
        pool.load("gpt2").await.unwrap();

        let lease = pool.lease("gpt2").await.unwrap();
        assert!(lease.is_in_use());
        assert!(matches!(
            pool.unload("gpt2").await.unwrap_err(),
            ModelError::ResourceBusy(_)
        ));

        drop(lease);
        assert!(pool.unload("gpt2").await.unwrap());
    }

    #[tokio::test]
    async fn test_full_pool_evicts_oldest_idle() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        fixture.downloaded("distilgpt2").await;
        fixture.downloaded("codebert-base").await;
        let pool = fixture.pool(2);

        pool.load("gpt2").await.unwrap();
        pool.load("distilgpt2").await.unwrap();
        pool.load("codebert-base").await.unwrap();

        assert_eq!(
            pool.loaded_ids().await,
            vec!["codebert-base".to_string(), "distilgpt2".to_string()]
        );
        assert_eq!(
            fixture.registry.status("gpt2").await,
            Some(ModelStatus::Downloaded)
        );
    }

    #[tokio::test]
    async fn test_full_pool_all_busy() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        fixture.downloaded("distilgpt2").await;
        let pool = fixture.pool(1);

        pool.load("gpt2").await.unwrap();
        let _lease = pool.lease("gpt2").await.unwrap();

        assert!(matches!(
            pool.load("distilgpt2").await.unwrap_err(),
            ModelError::ResourceBusy(_)
        ));
        assert_eq!(pool.loaded_ids().await, vec!["gpt2".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_with_zero_threshold() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);
        pool.load("gpt2").await.unwrap();

        assert_eq!(pool.expired(Duration::ZERO).await, vec!["gpt2".to_string()]);
        assert!(pool.expired(Duration::from_secs(3600)).await.is_empty());
    }

    #[tokio::test]
    async fn test_detach_if_older_spares_reloaded_handle() {
        let fixture = Fixture::new(MockBackend::default());
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);
        pool.load("gpt2").await.unwrap();

        let stale = pool.expired(Duration::ZERO).await;
        assert_eq!(stale, vec!["gpt2".to_string()]);

        // Reload between listing and detaching
        pool.unload("gpt2").await.unwrap();
        pool.load("gpt2").await.unwrap();

        let threshold = Duration::from_secs(3600);
        assert!(!pool.detach_if_older("gpt2", threshold).await.unwrap());
        assert_eq!(pool.loaded_ids().await, vec!["gpt2".to_string()]);
        assert_eq!(fixture.registry.status("gpt2").await, Some(ModelStatus::Loaded));

        assert!(pool.detach_if_older("gpt2", Duration::ZERO).await.unwrap());
        assert!(pool.loaded_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_lease_exposes_handle() {
        let fixture = Fixture::new(MockBackend {
            accelerator: true,
            ..Default::default()
        });
        fixture.downloaded("gpt2").await;
        let pool = fixture.pool(3);
        pool.load("gpt2").await.unwrap();

        let lease = pool.lease("gpt2").await.unwrap();
        assert_eq!(lease.model_id(), "gpt2");
        assert_eq!(lease.device(), ComputeDevice::Cuda(0));
        assert!(!lease.encode("hi").is_empty());
        lease.forward(&[1, 2]).unwrap();
        assert!(pool.lease("distilgpt2").await.is_none());
    }
}
