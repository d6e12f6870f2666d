//! Model runtime
//!
//! Provides:
//! - The inference backend traits and the candle backend
//! - A bounded worker pool for blocking model work
//! - The pool of loaded model handles

pub mod backend;
pub mod candle;
pub mod pool;

pub use backend::{ComputeDevice, InferenceBackend, LoadedModel, TextCodec};
pub use candle::CandleBackend;
pub use pool::{HandleLease, RuntimeHandle, RuntimePool};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Serializes model construction across load and validation
pub type ConstructionLock = Arc<Mutex<()>>;

/// Bounded pool for blocking CPU/accelerator work
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run `task` on a blocking thread once a worker slot is free
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        })
        .await
        .context("Worker task panicked")
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
