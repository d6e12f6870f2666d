//! GPU detection via nvidia-smi
//!
//! Detection runs once when the capability provider is built. Utilization is
//! sampled on demand by the benchmark recorder.

use std::process::Command;

/// Information about available GPUs
#[derive(Debug, Clone, Default)]
pub struct GpuInfo {
    /// GPU indices visible to this process (from nvidia-smi)
    pub indices: Vec<u32>,
    /// Total memory per visible GPU in MB, same order as `indices`
    pub memory_total_mb: Vec<u64>,
}

impl GpuInfo {
    /// Get the number of available GPUs
    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Largest per-device memory in MB, 0 without GPUs
    pub fn max_memory_mb(&self) -> u64 {
        self.memory_total_mb.iter().copied().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Parse `index, memory.total` csv rows (noheader, nounits)
pub fn parse_gpu_listing(stdout: &str) -> GpuInfo {
    let mut info = GpuInfo::default();

    for line in stdout.lines() {
        let mut fields = line.split(',').map(str::trim);
        let Some(index) = fields.next().and_then(|f| f.parse::<u32>().ok()) else {
            continue;
        };
        let memory = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .unwrap_or(0);

        info.indices.push(index);
        info.memory_total_mb.push(memory);
    }

    info
}

/// Detect available GPUs using nvidia-smi
pub fn detect_gpus() -> GpuInfo {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let info = parse_gpu_listing(&stdout);

            tracing::info!(
                gpu_count = info.count(),
                indices = ?info.indices,
                memory_total_mb = ?info.memory_total_mb,
                "Detected available GPUs"
            );

            info
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                stderr = %stderr,
                "nvidia-smi failed, assuming no GPUs available"
            );
            GpuInfo::default()
        }
        Err(e) => {
            tracing::debug!(
                error = %e,
                "Failed to run nvidia-smi, assuming no GPUs available"
            );
            GpuInfo::default()
        }
    }
}

/// Sample utilization (percent) of the first visible GPU
pub fn query_utilization() -> Option<f32> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=utilization.gpu",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_utilization(&String::from_utf8_lossy(&output.stdout))
}

fn parse_utilization(stdout: &str) -> Option<f32> {
    stdout
        .lines()
        .next()
        .and_then(|line| line.trim().parse::<f32>().ok())
}
