//! Validation engine
//!
//! Smoke-tests a downloaded model: the config must parse, and the model must
//! construct and run one forward pass. A missing tokenizer only downgrades
//! the probe to fixed token ids. Nothing is pooled.

use super::metadata::{ConfigError, parse_model_config};
use super::registry::{ModelRegistry, ModelStatus};
use crate::error::{ModelError, ModelResult};
use crate::runtime::backend::{InferenceBackend, probe_tokens};
use crate::runtime::{ConstructionLock, WorkerPool};
use crate::state::RegistryStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Text used for the validation forward pass
pub const VALIDATION_PROBE: &str = "Hello world";

/// Result of the smoke test
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Valid,
    Invalid(String),
}

pub struct ValidationEngine {
    registry: Arc<ModelRegistry>,
    store: Arc<RegistryStore>,
    backend: Arc<dyn InferenceBackend>,
    workers: WorkerPool,
    construction: ConstructionLock,
    models_dir: PathBuf,
    allow_accelerator: bool,
}

impl ValidationEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RegistryStore>,
        backend: Arc<dyn InferenceBackend>,
        workers: WorkerPool,
        construction: ConstructionLock,
        models_dir: PathBuf,
        allow_accelerator: bool,
    ) -> Self {
        Self {
            registry,
            store,
            backend,
            workers,
            construction,
            models_dir,
            allow_accelerator,
        }
    }

    /// Validate a downloaded model
    ///
    /// Returns `Ok(true)` when the smoke test passes. Failures are recorded
    /// on the entry (status `error`) and reported as `Ok(false)`.
    pub async fn validate(&self, model_id: &str) -> ModelResult<bool> {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }

        let _construction = self.construction.lock().await;

        // Refuses anything but `downloaded` without touching the entry
        self.registry
            .transition(model_id, ModelStatus::Validating, "validate")
            .await?;

        let model_dir = self
            .registry
            .entry(model_id)
            .await
            .and_then(|e| e.local_path)
            .unwrap_or_else(|| self.models_dir.join(model_id));

        tracing::info!(model_id = %model_id, path = ?model_dir, "Validating model");

        let backend = self.backend.clone();
        let allow_accelerator = self.allow_accelerator;
        let verdict = self
            .workers
            .run(move || smoke_test(backend.as_ref(), &model_dir, allow_accelerator))
            .await
            .unwrap_or_else(|e| Verdict::Invalid(format!("model load failed: {:#}", e)));

        let valid = match verdict {
            Verdict::Valid => {
                self.registry
                    .update(model_id, |entry| {
                        entry.status = ModelStatus::Downloaded;
                        entry.validation_status = Some("valid".to_string());
                    })
                    .await?;
                tracing::info!(model_id = %model_id, "Model validated");
                crate::metrics::record_validation(model_id, "valid");
                true
            }
            Verdict::Invalid(reason) => {
                let err = ModelError::ValidationFailed {
                    model_id: model_id.to_string(),
                    reason: reason.clone(),
                };
                tracing::warn!(error = %err, "Model validation failed");
                self.registry.set_failed(model_id, reason).await?;
                crate::metrics::record_validation(model_id, "invalid");
                false
            }
        };

        self.store.persist(&self.registry).await;

        Ok(valid)
    }
}

fn smoke_test(backend: &dyn InferenceBackend, model_dir: &Path, allow_accelerator: bool) -> Verdict {
    let metadata = match parse_model_config(model_dir) {
        Ok(metadata) => metadata,
        Err(ConfigError::Missing) => return Verdict::Invalid("missing config".to_string()),
        Err(e) => return Verdict::Invalid(format!("config validation failed: {}", e)),
    };

    let tokenizer = match backend.load_tokenizer(model_dir) {
        Ok(tokenizer) => Some(tokenizer),
        Err(e) => {
            tracing::warn!(path = ?model_dir, error = %e, "Tokenizer unavailable, probing with fallback tokens");
            None
        }
    };
    let tokens = probe_tokens(tokenizer.as_deref(), VALIDATION_PROBE);

    let device = backend.select_device(allow_accelerator);
    let verdict = match backend
        .load_model(model_dir, &metadata, device)
        .and_then(|model| model.forward(&tokens))
    {
        Ok(()) => Verdict::Valid,
        Err(e) => Verdict::Invalid(format!("model load failed: {:#}", e)),
    };

    drop(tokenizer);
    backend.release(device);

    verdict
}
