//! Model registry for tracking lifecycle state of catalogued models

use super::catalog::{ModelCategory, ModelDescriptor};
use crate::benchmark::{HISTORY_CAPACITY, PerformanceSample};
use crate::capability::{PerformanceTier, SystemCapabilities};
use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Status of a model in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Model is known but not downloaded
    Available,
    /// Model files are being fetched
    Downloading,
    /// Model files are on disk
    Downloaded,
    /// Smoke test in progress
    Validating,
    /// Model is held in the runtime pool
    Loaded,
    /// Last operation failed; retry by downloading again
    Error,
}

impl ModelStatus {
    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(self, next: ModelStatus) -> bool {
        use ModelStatus::*;

        match (self, next) {
            (_, Error) => true,
            (Available, Downloading) => true,
            (Downloading, Downloaded) => true,
            (Downloaded, Validating) | (Downloaded, Loaded) => true,
            (Validating, Downloaded) => true,
            (Loaded, Downloaded) => true,
            (Error, Downloading) => true,
            (Available, _)
            | (Downloading, _)
            | (Downloaded, _)
            | (Validating, _)
            | (Loaded, _)
            | (Error, _) => false,
        }
    }

    /// Whether the model's files are present on disk
    pub fn is_on_disk(self) -> bool {
        match self {
            Self::Downloaded | Self::Validating | Self::Loaded => true,
            Self::Available | Self::Downloading | Self::Error => false,
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Downloading => write!(f, "downloading"),
            Self::Downloaded => write!(f, "downloaded"),
            Self::Validating => write!(f, "validating"),
            Self::Loaded => write!(f, "loaded"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Mutable lifecycle state attached to a descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub status: ModelStatus,
    /// Per-model directory, set once downloaded
    pub local_path: Option<PathBuf>,
    /// Percent complete of the current or last download run
    pub download_progress: f64,
    /// Outcome of the last validation, or the reason for an error
    pub validation_status: Option<String>,
    /// Most recent benchmark samples, oldest first
    pub performance_history: VecDeque<PerformanceSample>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new() -> Self {
        Self {
            status: ModelStatus::Available,
            local_path: None,
            download_progress: 0.0,
            validation_status: None,
            performance_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            updated_at: Utc::now(),
        }
    }

    /// Append a sample, dropping the oldest beyond capacity
    pub fn push_sample(&mut self, sample: PerformanceSample) {
        self.performance_history.push_back(sample);
        while self.performance_history.len() > HISTORY_CAPACITY {
            self.performance_history.pop_front();
        }
    }
}

impl Default for RegistryEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor plus lifecycle state, as presented to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub status: ModelStatus,
    pub local_path: Option<PathBuf>,
    pub download_progress: f64,
    pub validation_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ModelInfo {
    fn new(descriptor: &ModelDescriptor, entry: &RegistryEntry) -> Self {
        Self {
            descriptor: descriptor.clone(),
            status: entry.status,
            local_path: entry.local_path.clone(),
            download_progress: entry.download_progress,
            validation_status: entry.validation_status.clone(),
            updated_at: entry.updated_at,
        }
    }
}

/// Subset of an entry that survives restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub status: ModelStatus,
    pub local_path: Option<PathBuf>,
    pub validation_status: Option<String>,
}

/// Lifecycle notifications
#[derive(Debug, Clone)]
pub enum ModelEvent {
    StatusChanged {
        model_id: String,
        from: ModelStatus,
        to: ModelStatus,
    },
}

/// Registry for tracking models
pub struct ModelRegistry {
    descriptors: HashMap<String, Arc<ModelDescriptor>>,
    /// Catalog order, used for deterministic iteration
    order: Vec<String>,
    entries: RwLock<HashMap<String, RegistryEntry>>,
    event_tx: broadcast::Sender<ModelEvent>,
}

impl ModelRegistry {
    /// Seed one `Available` entry per catalog descriptor
    pub fn new(catalog: Vec<ModelDescriptor>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        let mut descriptors = HashMap::with_capacity(catalog.len());
        let mut order = Vec::with_capacity(catalog.len());
        let mut entries = HashMap::with_capacity(catalog.len());

        for descriptor in catalog {
            if descriptors.contains_key(&descriptor.id) {
                tracing::warn!(model_id = %descriptor.id, "Duplicate catalog id ignored");
                continue;
            }
            order.push(descriptor.id.clone());
            entries.insert(descriptor.id.clone(), RegistryEntry::new());
            descriptors.insert(descriptor.id.clone(), Arc::new(descriptor));
        }

        Self {
            descriptors,
            order,
            entries: RwLock::new(entries),
            event_tx,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ModelEvent> {
        self.event_tx.subscribe()
    }

    /// Check if a model is in the registry
    pub fn contains(&self, model_id: &str) -> bool {
        self.descriptors.contains_key(model_id)
    }

    /// Catalog metadata for a model
    pub fn descriptor(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.descriptors.get(model_id).cloned()
    }

    /// Get count of models in registry
    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Get a model by id
    pub async fn get(&self, model_id: &str) -> ModelResult<ModelInfo> {
        let descriptor = self
            .descriptors
            .get(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        let entries = self.entries.read().await;
        let entry = entries
            .get(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        Ok(ModelInfo::new(descriptor, entry))
    }

    /// Clone of the raw lifecycle state
    pub async fn entry(&self, model_id: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(model_id).cloned()
    }

    pub async fn status(&self, model_id: &str) -> Option<ModelStatus> {
        self.entries.read().await.get(model_id).map(|e| e.status)
    }

    /// List models, optionally filtered, sorted by (tier, size, id)
    pub async fn list(
        &self,
        category: Option<ModelCategory>,
        tier: Option<PerformanceTier>,
    ) -> Vec<ModelInfo> {
        let entries = self.entries.read().await;

        let mut models: Vec<ModelInfo> = self
            .order
            .iter()
            .filter_map(|id| {
                let descriptor = self.descriptors.get(id)?;
                let entry = entries.get(id)?;
                Some(ModelInfo::new(descriptor, entry))
            })
            .filter(|m| category.is_none_or(|c| m.descriptor.category == c))
            .filter(|m| tier.is_none_or(|t| m.descriptor.performance_tier == t))
            .collect();

        models.sort_by(|a, b| {
            (a.descriptor.performance_tier, a.descriptor.size, &a.descriptor.id).cmp(&(
                b.descriptor.performance_tier,
                b.descriptor.size,
                &b.descriptor.id,
            ))
        });

        models
    }

    /// Rank registry entries against host recommendations, capped at 5
    ///
    /// Recommended ids match an entry by repository reference, by id equal
    /// to the last path segment, or by the last segment appearing in the id.
    /// With fewer than 3 matches the list is backfilled with same-tier models.
    pub async fn recommendations(&self, capabilities: &SystemCapabilities) -> Vec<ModelInfo> {
        const MAX_RECOMMENDATIONS: usize = 5;
        const MIN_BEFORE_BACKFILL: usize = 3;

        let mut picked: Vec<&str> = Vec::new();

        for wanted in &capabilities.recommended_models {
            let Some(short) = wanted.rsplit('/').find(|segment| !segment.is_empty()) else {
                continue;
            };
            let found = self.order.iter().find(|id| {
                let d = &self.descriptors[id.as_str()];
                d.repository == *wanted || d.id == short || d.id.contains(short)
            });

            if let Some(id) = found
                && !picked.contains(&id.as_str())
            {
                picked.push(id);
            }
        }

        if picked.len() < MIN_BEFORE_BACKFILL {
            for id in &self.order {
                if picked.len() >= MAX_RECOMMENDATIONS {
                    break;
                }
                let d = &self.descriptors[id.as_str()];
                if d.performance_tier == capabilities.performance_tier
                    && !picked.contains(&id.as_str())
                {
                    picked.push(id);
                }
            }
        }

        picked.truncate(MAX_RECOMMENDATIONS);

        let entries = self.entries.read().await;
        picked
            .into_iter()
            .filter_map(|id| {
                Some(ModelInfo::new(
                    self.descriptors.get(id)?,
                    entries.get(id)?,
                ))
            })
            .collect()
    }

    /// Apply a mutation to one entry, broadcasting any status change
    pub async fn update<R>(
        &self,
        model_id: &str,
        f: impl FnOnce(&mut RegistryEntry) -> R,
    ) -> ModelResult<R> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(model_id)
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;

        let before = entry.status;
        let result = f(entry);
        let after = entry.status;
        entry.updated_at = Utc::now();
        drop(entries);

        if before != after {
            tracing::debug!(model_id = %model_id, from = %before, to = %after, "Model status changed");
            let _ = self.event_tx.send(ModelEvent::StatusChanged {
                model_id: model_id.to_string(),
                from: before,
                to: after,
            });
        }

        Ok(result)
    }

    /// Move to `next` if the lifecycle permits it, returning the previous status
    pub async fn transition(
        &self,
        model_id: &str,
        next: ModelStatus,
        operation: &'static str,
    ) -> ModelResult<ModelStatus> {
        let outcome = self
            .update(model_id, |entry| {
                let current = entry.status;
                if current.can_transition_to(next) {
                    entry.status = next;
                    Ok(current)
                } else {
                    Err(current)
                }
            })
            .await?;

        outcome.map_err(|status| ModelError::InvalidState {
            model_id: model_id.to_string(),
            status,
            operation,
        })
    }

    /// Mark a model failed and record the reason
    pub async fn set_failed(&self, model_id: &str, reason: String) -> ModelResult<()> {
        self.update(model_id, |entry| {
            entry.status = ModelStatus::Error;
            entry.validation_status = Some(reason);
        })
        .await
    }

    /// Record download progress for the active run
    pub async fn set_progress(&self, model_id: &str, progress: f64) -> ModelResult<()> {
        self.update(model_id, |entry| {
            entry.download_progress = progress.clamp(0.0, 100.0);
        })
        .await
    }

    /// Snapshot of the fields written to the registry cache
    pub async fn persisted_snapshot(&self) -> BTreeMap<String, PersistedEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    PersistedEntry {
                        status: e.status,
                        local_path: e.local_path.clone(),
                        validation_status: e.validation_status.clone(),
                    },
                )
            })
            .collect()
    }

    /// Merge cached lifecycle state over the catalog
    ///
    /// Unknown ids are ignored. States that cannot survive a restart are
    /// normalized: `loaded` and `validating` come back as `downloaded`, an
    /// interrupted `downloading` comes back as `error`.
    pub async fn restore(&self, cached: BTreeMap<String, PersistedEntry>) -> usize {
        let mut entries = self.entries.write().await;
        let mut restored = 0;

        for (id, saved) in cached {
            let Some(entry) = entries.get_mut(&id) else {
                tracing::debug!(model_id = %id, "Ignoring cached state for unknown model");
                continue;
            };

            entry.local_path = saved.local_path;
            entry.validation_status = saved.validation_status;
            entry.status = match saved.status {
                ModelStatus::Loaded | ModelStatus::Validating => ModelStatus::Downloaded,
                ModelStatus::Downloading => {
                    entry.validation_status = Some("download interrupted".to_string());
                    ModelStatus::Error
                }
                status @ (ModelStatus::Available
                | ModelStatus::Downloaded
                | ModelStatus::Error) => status,
            };
            if entry.status == ModelStatus::Downloaded {
                entry.download_progress = 100.0;
            }
            entry.updated_at = Utc::now();
            restored += 1;
        }

        restored
    }

    /// Count of entries per status
    pub async fn status_counts(&self) -> BTreeMap<ModelStatus, usize> {
        let entries = self.entries.read().await;
        let mut counts = BTreeMap::new();
        for entry in entries.values() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }
}
