//! Candle inference backend
//!
//! Builds models from safetensors or PyTorch weights for these families:
//!
//! - `bert`, `roberta`: encoder-only [`BertModel`]
//! - `llama`: decoder [`Llama`], run without a KV cache
//! - `t5`: the encoder half of T5
//! - `gpt_bigcode`: StarCoder-style [`GPTBigCode`]
//!
//! Candle has no GPT-2 implementation, so `gpt2` checkpoints (GPT-2,
//! DistilGPT2, DialoGPT) and anything else fail construction with
//! "unsupported architecture".

use super::backend::{ComputeDevice, InferenceBackend, LoadedModel, TextCodec};
use crate::models::metadata::{CONFIG_FILE, ModelMetadata};
use anyhow::{Context, Result, anyhow, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{bert, bigcode, llama, t5};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";
const WEIGHT_DTYPE: DType = DType::F32;

/// Backend built on candle
#[derive(Debug, Default)]
pub struct CandleBackend;

impl CandleBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Model families this backend can construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Architecture {
    Bert,
    Llama,
    T5,
    BigCode,
}

impl Architecture {
    fn from_family(family: Option<&str>) -> Result<Self> {
        match family {
            Some("bert" | "roberta") => Ok(Self::Bert),
            Some("llama") => Ok(Self::Llama),
            Some("t5") => Ok(Self::T5),
            Some("gpt_bigcode") => Ok(Self::BigCode),
            other => bail!("unsupported architecture: {}", other.unwrap_or("unknown")),
        }
    }
}

struct HfTokenizer(Tokenizer);

impl TextCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .0
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }
}

fn input_ids(tokens: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::new(tokens, device)?.unsqueeze(0)?)
}

struct CandleBert {
    model: bert::BertModel,
    device: Device,
}

impl LoadedModel for CandleBert {
    fn forward(&self, tokens: &[u32]) -> Result<()> {
        let input_ids = input_ids(tokens, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        self.model.forward(&input_ids, &token_type_ids, None)?;
        Ok(())
    }
}

struct CandleLlama {
    model: llama::Llama,
    config: llama::Config,
    device: Device,
}

impl LoadedModel for CandleLlama {
    fn forward(&self, tokens: &[u32]) -> Result<()> {
        // Fresh cache per call keeps forwards independent
        let mut cache = llama::Cache::new(false, WEIGHT_DTYPE, &self.config, &self.device)?;
        self.model
            .forward(&input_ids(tokens, &self.device)?, 0, &mut cache)?;
        Ok(())
    }
}

struct CandleT5 {
    encoder: Mutex<t5::T5EncoderModel>,
    device: Device,
}

impl LoadedModel for CandleT5 {
    fn forward(&self, tokens: &[u32]) -> Result<()> {
        let input_ids = input_ids(tokens, &self.device)?;
        let mut encoder = self
            .encoder
            .lock()
            .map_err(|_| anyhow!("T5 encoder lock poisoned"))?;
        encoder.forward(&input_ids)?;
        Ok(())
    }
}

struct CandleBigCode {
    model: Mutex<bigcode::GPTBigCode>,
    device: Device,
}

impl LoadedModel for CandleBigCode {
    fn forward(&self, tokens: &[u32]) -> Result<()> {
        let input_ids = input_ids(tokens, &self.device)?;
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("BigCode model lock poisoned"))?;
        model.forward(&input_ids, 0)?;
        Ok(())
    }
}

/// `config.json` fields of a `gpt_bigcode` checkpoint
#[derive(Debug, Deserialize)]
struct BigCodeConfig {
    vocab_size: usize,
    n_positions: usize,
    n_layer: usize,
    n_embd: usize,
    n_head: usize,
    #[serde(default)]
    n_inner: Option<usize>,
    #[serde(default = "default_layer_norm_epsilon")]
    layer_norm_epsilon: f64,
    #[serde(default = "default_multi_query")]
    multi_query: bool,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

fn default_multi_query() -> bool {
    true
}

impl BigCodeConfig {
    fn into_config(self) -> bigcode::Config {
        bigcode::Config {
            vocab_size: self.vocab_size,
            max_position_embeddings: self.n_positions,
            num_hidden_layers: self.n_layer,
            hidden_size: self.n_embd,
            layer_norm_epsilon: self.layer_norm_epsilon,
            n_inner: self.n_inner,
            num_attention_heads: self.n_head,
            multi_query: self.multi_query,
            use_cache: false,
        }
    }
}

fn to_candle_device(device: ComputeDevice) -> Result<Device> {
    Ok(match device {
        ComputeDevice::Cpu => Device::Cpu,
        ComputeDevice::Cuda(ordinal) => Device::new_cuda(ordinal)?,
        ComputeDevice::Metal(ordinal) => Device::new_metal(ordinal)?,
    })
}

fn read_config<T: DeserializeOwned>(model_dir: &Path, architecture: Architecture) -> Result<T> {
    let raw = std::fs::read_to_string(model_dir.join(CONFIG_FILE))
        .context("Failed to read model config")?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {:?} config", architecture))
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join(SAFETENSORS_FILE);
    if safetensors.exists() {
        // SAFETY: the file is not modified while mapped
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[safetensors], WEIGHT_DTYPE, device)?
        };
        return Ok(vb);
    }

    let pytorch = model_dir.join(PYTORCH_FILE);
    if pytorch.exists() {
        return Ok(VarBuilder::from_pth(&pytorch, WEIGHT_DTYPE, device)?);
    }

    bail!("no weight file ({} or {})", SAFETENSORS_FILE, PYTORCH_FILE)
}

impl InferenceBackend for CandleBackend {
    fn select_device(&self, allow_accelerator: bool) -> ComputeDevice {
        if allow_accelerator {
            if candle_core::utils::cuda_is_available() {
                match Device::new_cuda(0) {
                    Ok(_) => return ComputeDevice::Cuda(0),
                    Err(e) => tracing::warn!(error = %e, "CUDA unavailable, falling back"),
                }
            }
            if candle_core::utils::metal_is_available() {
                return ComputeDevice::Metal(0);
            }
        }
        ComputeDevice::Cpu
    }

    fn load_tokenizer(&self, model_dir: &Path) -> Result<Box<dyn TextCodec>> {
        let path = model_dir.join(TOKENIZER_FILE);
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow!("Failed to load tokenizer {:?}: {}", path, e))?;
        Ok(Box::new(HfTokenizer(tokenizer)))
    }

    fn load_model(
        &self,
        model_dir: &Path,
        metadata: &ModelMetadata,
        device: ComputeDevice,
    ) -> Result<Box<dyn LoadedModel>> {
        let architecture = Architecture::from_family(metadata.family())?;
        let device = to_candle_device(device)?;

        tracing::debug!(architecture = ?architecture, model_dir = ?model_dir, "Building candle model");

        let model: Box<dyn LoadedModel> = match architecture {
            Architecture::Bert => {
                let config: bert::Config = read_config(model_dir, architecture)?;
                let vb = load_weights(model_dir, &device)?;
                let model = bert::BertModel::load(vb, &config).context("Failed to build model")?;
                Box::new(CandleBert { model, device })
            }
            Architecture::Llama => {
                let config: llama::LlamaConfig = read_config(model_dir, architecture)?;
                let config = config.into_config(false);
                let vb = load_weights(model_dir, &device)?;
                let model = llama::Llama::load(vb, &config).context("Failed to build model")?;
                Box::new(CandleLlama {
                    model,
                    config,
                    device,
                })
            }
            Architecture::T5 => {
                let config: t5::Config = read_config(model_dir, architecture)?;
                let vb = load_weights(model_dir, &device)?;
                let encoder =
                    t5::T5EncoderModel::load(vb, &config).context("Failed to build model")?;
                Box::new(CandleT5 {
                    encoder: Mutex::new(encoder),
                    device,
                })
            }
            Architecture::BigCode => {
                let config: BigCodeConfig = read_config(model_dir, architecture)?;
                let vb = load_weights(model_dir, &device)?;
                let model = bigcode::GPTBigCode::load(vb, config.into_config())
                    .context("Failed to build model")?;
                Box::new(CandleBigCode {
                    model: Mutex::new(model),
                    device,
                })
            }
        };

        Ok(model)
    }

    fn release(&self, device: ComputeDevice) {
        // Candle frees device buffers when the last tensor is dropped
        tracing::debug!(device = %device, "Released model tensors");
    }
}
