//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    /// Root directory for per-model folders
    pub models_dir: PathBuf,
    /// Registry cache path; `models_dir/registry_cache.json` when unset
    pub registry_cache_file: Option<PathBuf>,
    pub eviction_interval_secs: u64,
    /// Loaded models older than this are unloaded by the sweeper (0 = all)
    pub idle_threshold_secs: u64,
    pub max_loaded_models: usize,
    pub enable_gpu: bool,
    /// Concurrent blocking model operations
    pub inference_workers: usize,
    pub hub_endpoint: String,
    /// hf-hub blob cache; hf-hub default when unset
    pub hub_cache_dir: Option<PathBuf>,
    pub download_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            models_dir: default_models_dir(),
            registry_cache_file: None,
            eviction_interval_secs: default_eviction_interval(),
            idle_threshold_secs: default_idle_threshold(),
            max_loaded_models: default_max_loaded_models(),
            enable_gpu: true,
            inference_workers: default_inference_workers(),
            hub_endpoint: default_hub_endpoint(),
            hub_cache_dir: None,
            download_timeout_secs: default_download_timeout(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var("MODEL_MANAGER_API_PORT") {
            self.api_port = port
                .parse()
                .context("Invalid MODEL_MANAGER_API_PORT value")?;
        }
        if let Some(dir) = var("MODEL_MANAGER_MODELS_DIR") {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(file) = var("MODEL_MANAGER_REGISTRY_CACHE") {
            self.registry_cache_file = Some(PathBuf::from(file));
        }
        if let Some(threshold) = var("MODEL_MANAGER_IDLE_THRESHOLD") {
            self.idle_threshold_secs = threshold
                .parse()
                .context("Invalid MODEL_MANAGER_IDLE_THRESHOLD value")?;
        }
        if let Some(interval) = var("MODEL_MANAGER_EVICTION_INTERVAL") {
            self.eviction_interval_secs = interval
                .parse()
                .context("Invalid MODEL_MANAGER_EVICTION_INTERVAL value")?;
        }
        if let Some(enable) = var("MODEL_MANAGER_ENABLE_GPU") {
            self.enable_gpu = parse_bool(&enable)
                .with_context(|| format!("Invalid MODEL_MANAGER_ENABLE_GPU value: {}", enable))?;
        }
        if let Some(endpoint) = var("HF_ENDPOINT") {
            self.hub_endpoint = endpoint;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.eviction_interval_secs == 0 {
            anyhow::bail!("eviction_interval_secs must be greater than 0");
        }
        if self.max_loaded_models == 0 {
            anyhow::bail!("max_loaded_models must be greater than 0");
        }
        if self.inference_workers == 0 {
            anyhow::bail!("inference_workers must be greater than 0");
        }
        if !self.hub_endpoint.starts_with("http://") && !self.hub_endpoint.starts_with("https://")
        {
            anyhow::bail!("hub_endpoint must be an http(s) URL (got {})", self.hub_endpoint);
        }

        // Ensure models directory exists or can be created
        if !self.models_dir.exists() {
            std::fs::create_dir_all(&self.models_dir).with_context(|| {
                format!("Cannot create models directory: {:?}", self.models_dir)
            })?;
        }

        Ok(())
    }

    /// Effective registry cache path
    pub fn registry_cache_path(&self) -> PathBuf {
        self.registry_cache_file
            .clone()
            .unwrap_or_else(|| self.models_dir.join("registry_cache.json"))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}

// Default functions
fn default_api_port() -> u16 {
    8000
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("./models")
}
fn default_eviction_interval() -> u64 {
    300
}
fn default_idle_threshold() -> u64 {
    3600
}
fn default_max_loaded_models() -> usize {
    3
}
fn default_inference_workers() -> usize {
    2
}
fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_download_timeout() -> u64 {
    3600
}
fn default_graceful_shutdown_timeout() -> u64 {
    30
}
