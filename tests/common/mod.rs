//! Shared fakes for integration tests
//!
//! A scripted in-memory repository and an inference backend that never
//! touches real weights, plus a helper that wires them into a manager.

#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use model_manager::benchmark::ResourceSampler;
use model_manager::capability::{PerformanceTier, StaticCapabilityProvider};
use model_manager::models::ModelMetadata;
use model_manager::models::ModelRepository;
use model_manager::runtime::{ComputeDevice, InferenceBackend, LoadedModel, TextCodec};
use model_manager::{ManagerConfig, ModelManager};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const BERT_CONFIG: &str = r#"{"model_type": "bert", "hidden_size": 768, "num_hidden_layers": 12}"#;

/// Repository serving the same small file set for every model
pub struct ScriptedRepository {
    pub files: Vec<(String, u64)>,
    pub fetch_delay: Duration,
    pub unreachable: AtomicBool,
    pub list_calls: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self {
            files: vec![
                ("config.json".to_string(), 1_000),
                ("tokenizer.json".to_string(), 4_000),
                ("model.safetensors".to_string(), 95_000),
                ("onnx/model.onnx".to_string(), 90_000),
            ],
            fetch_delay: Duration::ZERO,
            unreachable: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: delay,
            ..Self::new()
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRepository for ScriptedRepository {
    async fn list_files(&self, _repository: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(self.files.iter().map(|(f, _)| f.clone()).collect())
    }

    async fn file_sizes(&self, _repository: &str) -> Result<HashMap<String, u64>> {
        Ok(self.files.iter().cloned().collect())
    }

    async fn fetch_file(&self, _repository: &str, file: &str, dest_dir: &Path) -> Result<PathBuf> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let target = dest_dir.join(file);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = if file == "config.json" {
            BERT_CONFIG
        } else {
            "stub"
        };
        tokio::fs::write(&target, content).await?;
        Ok(target)
    }
}

struct WordCodec;

impl TextCodec for WordCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
    }
}

struct NullModel {
    fail: bool,
}

impl LoadedModel for NullModel {
    fn forward(&self, tokens: &[u32]) -> Result<()> {
        if self.fail || tokens.is_empty() {
            bail!("forward failed");
        }
        Ok(())
    }
}

/// Backend producing models that accept any non-empty input
#[derive(Default)]
pub struct FakeBackend {
    pub fail_model: AtomicBool,
    pub fail_forward: AtomicBool,
    pub models_built: AtomicUsize,
}

impl InferenceBackend for FakeBackend {
    fn select_device(&self, _allow_accelerator: bool) -> ComputeDevice {
        ComputeDevice::Cpu
    }

    fn load_tokenizer(&self, _model_dir: &Path) -> Result<Box<dyn TextCodec>> {
        Ok(Box::new(WordCodec))
    }

    fn load_model(
        &self,
        _model_dir: &Path,
        _metadata: &ModelMetadata,
        _device: ComputeDevice,
    ) -> Result<Box<dyn LoadedModel>> {
        if self.fail_model.load(Ordering::SeqCst) {
            return Err(anyhow!("weights corrupt"));
        }
        self.models_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullModel {
            fail: self.fail_forward.load(Ordering::SeqCst),
        }))
    }
}

pub struct FixedSampler;

impl ResourceSampler for FixedSampler {
    fn process_memory_mb(&self) -> f64 {
        256.0
    }

    fn gpu_utilization(&self) -> f64 {
        0.0
    }
}

pub fn test_config(dir: &TempDir) -> ManagerConfig {
    ManagerConfig {
        models_dir: dir.path().join("models"),
        enable_gpu: false,
        max_loaded_models: 2,
        ..Default::default()
    }
}

/// Manager wired to the fakes, persisting under `dir`
pub async fn build_manager(
    dir: &TempDir,
    repository: Arc<ScriptedRepository>,
    backend: Arc<FakeBackend>,
) -> Arc<ModelManager> {
    build_manager_with_config(test_config(dir), repository, backend).await
}

pub async fn build_manager_with_config(
    config: ManagerConfig,
    repository: Arc<ScriptedRepository>,
    backend: Arc<FakeBackend>,
) -> Arc<ModelManager> {
    ModelManager::builder()
        .repository(repository)
        .backend(backend)
        .capabilities(Arc::new(StaticCapabilityProvider::new(
            PerformanceTier::Lightweight,
            vec!["gpt2".to_string(), "distilgpt2".to_string()],
        )))
        .sampler(Arc::new(FixedSampler))
        .build(config)
        .await
        .expect("Failed to build manager")
}
