//! Inference backend abstraction
//!
//! Backend calls are blocking and run on the bounded worker pool. The pool,
//! validation engine and benchmark recorder only see these traits.

use crate::models::metadata::ModelMetadata;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Token ids for "[CLS] hello world [SEP]" in BERT-style vocabularies
pub const FALLBACK_TOKENS: &[u32] = &[101, 7592, 2088, 102];

/// Where a model's tensors live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl ComputeDevice {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Self::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

/// Text to token ids
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

/// A constructed model able to run a forward pass
pub trait LoadedModel: Send + Sync {
    fn forward(&self, tokens: &[u32]) -> Result<()>;
}

/// Builds tokenizers and models from a model directory
pub trait InferenceBackend: Send + Sync {
    /// Accelerator when allowed and present, CPU otherwise
    fn select_device(&self, allow_accelerator: bool) -> ComputeDevice;

    fn load_tokenizer(&self, model_dir: &Path) -> Result<Box<dyn TextCodec>>;

    fn load_model(
        &self,
        model_dir: &Path,
        metadata: &ModelMetadata,
        device: ComputeDevice,
    ) -> Result<Box<dyn LoadedModel>>;

    /// Return cached accelerator memory after a model is dropped
    fn release(&self, _device: ComputeDevice) {}
}

/// Encode a probe with the tokenizer, or fall back to fixed ids
pub fn probe_tokens(codec: Option<&dyn TextCodec>, probe: &str) -> Vec<u32> {
    codec
        .and_then(|c| match c.encode(probe) {
            Ok(ids) if !ids.is_empty() => Some(ids),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Probe encoding failed, using fallback tokens");
                None
            }
        })
        .unwrap_or_else(|| FALLBACK_TOKENS.to_vec())
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Backend that "constructs" instantly and counts calls
    #[derive(Default)]
    pub struct MockBackend {
        pub fail_tokenizer: AtomicBool,
        pub fail_model: AtomicBool,
        pub fail_forward: AtomicBool,
        pub accelerator: bool,
        pub models_built: AtomicUsize,
        pub forwards: std::sync::Arc<AtomicUsize>,
        pub releases: AtomicUsize,
    }

    impl MockBackend {
        pub fn failing_model() -> Self {
            let backend = Self::default();
            backend.fail_model.store(true, Ordering::SeqCst);
            backend
        }

        pub fn models_built(&self) -> usize {
            self.models_built.load(Ordering::SeqCst)
        }
    }

    struct MockCodec;

    impl TextCodec for MockCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.bytes().map(u32::from).collect())
        }
    }

    struct MockModel {
        fail: bool,
        forwards: std::sync::Arc<AtomicUsize>,
    }

    impl LoadedModel for MockModel {
        fn forward(&self, tokens: &[u32]) -> Result<()> {
            if self.fail {
                anyhow::bail!("forward failed");
            }
            assert!(!tokens.is_empty());
            self.forwards.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl InferenceBackend for MockBackend {
        fn select_device(&self, allow_accelerator: bool) -> ComputeDevice {
            if allow_accelerator && self.accelerator {
                ComputeDevice::Cuda(0)
            } else {
                ComputeDevice::Cpu
            }
        }

        fn load_tokenizer(&self, _model_dir: &Path) -> Result<Box<dyn TextCodec>> {
            if self.fail_tokenizer.load(Ordering::SeqCst) {
                anyhow::bail!("tokenizer.json missing");
            }
            Ok(Box::new(MockCodec))
        }

        fn load_model(
            &self,
            _model_dir: &Path,
            _metadata: &ModelMetadata,
            _device: ComputeDevice,
        ) -> Result<Box<dyn LoadedModel>> {
            if self.fail_model.load(Ordering::SeqCst) {
                anyhow::bail!("weights corrupt");
            }
            self.models_built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockModel {
                fail: self.fail_forward.load(Ordering::SeqCst),
                forwards: self.forwards.clone(),
            }))
        }

        fn release(&self, _device: ComputeDevice) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
