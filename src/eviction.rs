//! Idle eviction for loaded models

use crate::models::registry::ModelRegistry;
use crate::runtime::RuntimePool;
use crate::state::RegistryStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Periodically unloads models held longer than the idle threshold
pub struct EvictionSweeper {
    registry: Arc<ModelRegistry>,
    store: Arc<RegistryStore>,
    pool: Arc<RuntimePool>,
    sweep_interval: Duration,
    idle_threshold: Duration,
}

impl EvictionSweeper {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RegistryStore>,
        pool: Arc<RuntimePool>,
        sweep_interval: Duration,
        idle_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            pool,
            sweep_interval,
            idle_threshold,
        }
    }

    /// Start the sweep loop; returns when `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.sweep_interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "Eviction sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Eviction sweeper stopped");
    }

    /// Unload every handle past the configured threshold
    pub async fn sweep_once(&self) -> Vec<String> {
        self.sweep_older_than(self.idle_threshold).await
    }

    /// Unload every handle loaded for at least `threshold`
    ///
    /// Busy or failing models are logged and skipped. The registry is
    /// persisted once if anything was unloaded.
    pub async fn sweep_older_than(&self, threshold: Duration) -> Vec<String> {
        let candidates = self.pool.expired(threshold).await;
        let mut evicted = Vec::with_capacity(candidates.len());

        for model_id in candidates {
            match self.pool.detach_if_older(&model_id, threshold).await {
                Ok(true) => {
                    tracing::info!(model_id = %model_id, "Evicted idle model");
                    crate::metrics::record_eviction(&model_id);
                    evicted.push(model_id);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(model_id = %model_id, error = %e, "Skipping eviction");
                }
            }
        }

        if !evicted.is_empty() {
            self.store.persist(&self.registry).await;
        }

        evicted
    }
}
