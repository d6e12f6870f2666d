//! Host capability reporting
//!
//! The registry's recommendation query and the status summary consume a
//! [`CapabilityProvider`]. Production code probes the host once at start-up;
//! tests inject a [`StaticCapabilityProvider`].

use crate::gpu::{self, GpuInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse hardware class used to pick models
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Lightweight,
    Medium,
    Powerful,
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lightweight => write!(f, "lightweight"),
            Self::Medium => write!(f, "medium"),
            Self::Powerful => write!(f, "powerful"),
        }
    }
}

impl std::str::FromStr for PerformanceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lightweight" => Ok(Self::Lightweight),
            "medium" => Ok(Self::Medium),
            "powerful" => Ok(Self::Powerful),
            other => Err(format!("unknown performance tier '{}'", other)),
        }
    }
}

/// Snapshot of what the host can run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCapabilities {
    pub performance_tier: PerformanceTier,
    /// Ranked repository references or model ids
    pub recommended_models: Vec<String>,
    pub cpu_score: u8,
    pub total_memory_mb: u64,
    pub gpu_count: usize,
    pub max_gpu_memory_mb: u64,
    /// Human-readable hardware advice keyed by subsystem
    #[serde(default)]
    pub advice: BTreeMap<String, String>,
}

/// Source of hardware tier and model recommendations
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> SystemCapabilities;
}

/// Fixed capabilities, useful for tests and for hosts that pin a tier
pub struct StaticCapabilityProvider {
    capabilities: SystemCapabilities,
}

impl StaticCapabilityProvider {
    pub fn new(performance_tier: PerformanceTier, recommended_models: Vec<String>) -> Self {
        Self {
            capabilities: SystemCapabilities {
                performance_tier,
                recommended_models,
                cpu_score: 1,
                total_memory_mb: 0,
                gpu_count: 0,
                max_gpu_memory_mb: 0,
                advice: BTreeMap::new(),
            },
        }
    }
}

impl CapabilityProvider for StaticCapabilityProvider {
    fn capabilities(&self) -> SystemCapabilities {
        self.capabilities.clone()
    }
}

/// Capabilities probed from the running host
pub struct HardwareCapabilityProvider {
    capabilities: SystemCapabilities,
}

impl HardwareCapabilityProvider {
    /// Probe CPU, memory and (if enabled) GPUs once
    pub fn detect(enable_gpu: bool) -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        let total_memory_mb = sys.total_memory() / (1024 * 1024);
        let threads = sys.cpus().len();
        let (frequency_mhz, brand) = sys
            .cpus()
            .first()
            .map(|cpu| (cpu.frequency(), cpu.brand().to_string()))
            .unwrap_or((0, String::new()));

        let gpus = if enable_gpu {
            gpu::detect_gpus()
        } else {
            GpuInfo::default()
        };

        let cpu_score = cpu_score(threads, frequency_mhz, &brand);
        let capabilities = build_capabilities(cpu_score, total_memory_mb, &gpus);

        tracing::info!(
            tier = %capabilities.performance_tier,
            cpu_score = cpu_score,
            total_memory_mb = total_memory_mb,
            gpu_count = gpus.count(),
            "Host capabilities detected"
        );

        Self { capabilities }
    }
}

impl CapabilityProvider for HardwareCapabilityProvider {
    fn capabilities(&self) -> SystemCapabilities {
        self.capabilities.clone()
    }
}

/// Score a CPU on a 1-10 scale from thread count, clock and brand
pub fn cpu_score(threads: usize, frequency_mhz: u64, brand: &str) -> u8 {
    let mut score: u8 = 1;

    score += match threads {
        t if t >= 16 => 4,
        t if t >= 8 => 3,
        t if t >= 4 => 2,
        t if t >= 2 => 1,
        _ => 0,
    };

    score += match frequency_mhz {
        f if f >= 4000 => 2,
        f if f >= 3000 => 1,
        _ => 0,
    };

    let brand = brand.to_lowercase();
    if ["i9", "ryzen 9", "threadripper"]
        .iter()
        .any(|b| brand.contains(b))
    {
        score += 2;
    } else if ["i7", "ryzen 7"].iter().any(|b| brand.contains(b)) {
        score += 1;
    }

    score.min(10)
}

/// Classify the host. GPUs reported by nvidia-smi are NVIDIA by construction.
pub fn determine_tier(cpu_score: u8, total_memory_mb: u64, max_gpu_memory_mb: u64) -> PerformanceTier {
    if cpu_score >= 8 && total_memory_mb >= 32_000 && max_gpu_memory_mb >= 12_000 {
        return PerformanceTier::Powerful;
    }

    if cpu_score >= 5
        && total_memory_mb >= 16_000
        && (max_gpu_memory_mb >= 6_000 || total_memory_mb >= 24_000)
    {
        return PerformanceTier::Medium;
    }

    PerformanceTier::Lightweight
}

/// Ranked repository references suited to a tier
pub fn recommended_for_tier(tier: PerformanceTier) -> Vec<String> {
    let ids: &[&str] = match tier {
        PerformanceTier::Powerful => &[
            "microsoft/codebert-base",
            "Salesforce/codet5-large",
            "bigcode/starcoder",
            "deepseek-ai/deepseek-coder-6.7b-base",
            "WizardLM/WizardCoder-15B-V1.0",
        ],
        PerformanceTier::Medium => &[
            "microsoft/codebert-base",
            "Salesforce/codet5-base",
            "microsoft/codebert-base-mlm",
            "huggingface/CodeBERTa-small-v1",
            "microsoft/DialoGPT-medium",
        ],
        PerformanceTier::Lightweight => &[
            "microsoft/codebert-base-mlm",
            "huggingface/CodeBERTa-small-v1",
            "distilgpt2",
            "microsoft/DialoGPT-small",
            "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        ],
    };

    ids.iter().map(|s| s.to_string()).collect()
}

fn build_capabilities(cpu_score: u8, total_memory_mb: u64, gpus: &GpuInfo) -> SystemCapabilities {
    let max_gpu_memory_mb = gpus.max_memory_mb();
    let performance_tier = determine_tier(cpu_score, total_memory_mb, max_gpu_memory_mb);

    let mut advice = BTreeMap::new();
    if total_memory_mb < 8_000 {
        advice.insert(
            "memory".to_string(),
            "Low system memory; 16GB or more is recommended for local models".to_string(),
        );
    }
    if gpus.is_empty() {
        advice.insert(
            "gpu".to_string(),
            "No GPU detected; inference will run on the CPU".to_string(),
        );
    } else if max_gpu_memory_mb < 6_000 {
        advice.insert(
            "gpu".to_string(),
            "GPU memory is limited; 8GB+ VRAM is needed for larger models".to_string(),
        );
    }
    if cpu_score < 4 {
        advice.insert(
            "cpu".to_string(),
            "CPU performance may limit inference throughput".to_string(),
        );
    }

    SystemCapabilities {
        performance_tier,
        recommended_models: recommended_for_tier(performance_tier),
        cpu_score,
        total_memory_mb,
        gpu_count: gpus.count(),
        max_gpu_memory_mb,
        advice,
    }
}
