//! Benchmark recorder
//!
//! Measures throughput of a loaded model and keeps the last
//! [`HISTORY_CAPACITY`] samples per model.

use crate::error::{ModelError, ModelResult};
use crate::models::registry::ModelRegistry;
use crate::runtime::pool::{RuntimeHandle, RuntimePool};
use crate::runtime::{ComputeDevice, WorkerPool};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Samples kept per model
pub const HISTORY_CAPACITY: usize = 10;

pub const BENCHMARK_PROBE: &str = "def fibonacci(n):";
pub const BENCHMARK_ITERATIONS: u32 = 5;

/// One benchmark measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Tokens per second over the mean forward latency
    pub inference_speed: f64,
    /// Process resident memory
    pub memory_usage_mb: f64,
    /// Percent; 0 on CPU
    pub gpu_utilization: f64,
    pub device: ComputeDevice,
    pub recorded_at: DateTime<Utc>,
}

/// Host resource readings taken alongside a benchmark
pub trait ResourceSampler: Send + Sync {
    fn process_memory_mb(&self) -> f64;
    fn gpu_utilization(&self) -> f64;
}

/// Reads RSS via sysinfo and utilization via nvidia-smi
#[derive(Debug, Default)]
pub struct SystemSampler;

impl ResourceSampler for SystemSampler {
    fn process_memory_mb(&self) -> f64 {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return 0.0;
        };

        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);

        sys.process(pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    fn gpu_utilization(&self) -> f64 {
        crate::gpu::query_utilization().map(f64::from).unwrap_or(0.0)
    }
}

pub struct BenchmarkRecorder {
    registry: Arc<ModelRegistry>,
    pool: Arc<RuntimePool>,
    workers: WorkerPool,
    sampler: Arc<dyn ResourceSampler>,
}

impl BenchmarkRecorder {
    pub fn new(
        registry: Arc<ModelRegistry>,
        pool: Arc<RuntimePool>,
        workers: WorkerPool,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        Self {
            registry,
            pool,
            workers,
            sampler,
        }
    }

    /// Benchmark a loaded model; `Ok(None)` when it is not loaded or the run fails
    pub async fn benchmark(&self, model_id: &str) -> ModelResult<Option<PerformanceSample>> {
        if !self.registry.contains(model_id) {
            return Err(ModelError::NotFound(model_id.to_string()));
        }

        let Some(lease) = self.pool.lease(model_id).await else {
            tracing::debug!(model_id = %model_id, "Benchmark skipped, model not loaded");
            return Ok(None);
        };
        let device = lease.device();

        let sampler = self.sampler.clone();
        let outcome = self
            .workers
            .run(move || -> Result<(f64, f64, f64)> {
                let speed = measure_throughput(&lease)?;
                let memory = sampler.process_memory_mb();
                let gpu = if lease.device().is_accelerator() {
                    sampler.gpu_utilization()
                } else {
                    0.0
                };
                Ok((speed, memory, gpu))
            })
            .await;

        let (inference_speed, memory_usage_mb, gpu_utilization) = match outcome {
            Ok(Ok(readings)) => readings,
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "Benchmark failed");
                return Ok(None);
            }
        };

        let sample = PerformanceSample {
            inference_speed,
            memory_usage_mb,
            gpu_utilization,
            device,
            recorded_at: Utc::now(),
        };

        self.registry
            .update(model_id, |entry| entry.push_sample(sample.clone()))
            .await?;

        tracing::info!(
            model_id = %model_id,
            tokens_per_sec = inference_speed,
            memory_mb = memory_usage_mb,
            "Benchmark recorded"
        );
        crate::metrics::record_benchmark(model_id);

        Ok(Some(sample))
    }

    /// Recorded samples, oldest first
    pub async fn history(&self, model_id: &str) -> ModelResult<Vec<PerformanceSample>> {
        let entry = self
            .registry
            .entry(model_id)
            .await
            .ok_or_else(|| ModelError::NotFound(model_id.to_string()))?;
        Ok(entry.performance_history.into_iter().collect())
    }
}

fn measure_throughput(handle: &RuntimeHandle) -> Result<f64> {
    let tokens = handle.encode(BENCHMARK_PROBE);

    let mut total = Duration::ZERO;
    for _ in 0..BENCHMARK_ITERATIONS {
        let started = Instant::now();
        handle.forward(&tokens)?;
        total += started.elapsed();
    }

    let mean = total.as_secs_f64() / f64::from(BENCHMARK_ITERATIONS);
    Ok(if mean > 0.0 {
        tokens.len() as f64 / mean
    } else {
        0.0
    })
}
