//! Model metadata parsing
//!
//! Reads the architecture fields of a downloaded model's config.json. The
//! validation engine uses this both as the "config present and sane" check
//! and to decide which backend architecture to construct.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the model configuration file inside a model directory
pub const CONFIG_FILE: &str = "config.json";

/// Model metadata extracted from config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    /// Model architecture type (e.g., "bert", "gpt2", "llama")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    /// Declared architectures (e.g., "BertForMaskedLM")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    /// Maximum sequence length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u32>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
    hidden_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    vocab_size: Option<u32>,
    num_hidden_layers: Option<u32>,
    // GPT-2 style names
    n_embd: Option<u32>,
    n_positions: Option<u32>,
    n_layer: Option<u32>,
    // T5 style names
    d_model: Option<u32>,
    num_layers: Option<u32>,
}

/// Why a config could not be read
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config.json not found")]
    Missing,
    #[error("{0}")]
    Unreadable(#[from] std::io::Error),
    #[error("{0}")]
    Invalid(#[from] serde_json::Error),
}

impl ModelMetadata {
    /// Architecture family used to pick a backend implementation
    pub fn family(&self) -> Option<&str> {
        self.model_type.as_deref()
    }
}

/// Parse metadata from a model directory's config.json
pub fn parse_model_config(model_dir: &Path) -> Result<ModelMetadata, ConfigError> {
    let config_path = model_dir.join(CONFIG_FILE);

    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ConfigError::Missing),
        Err(e) => return Err(e.into()),
    };

    let raw: RawConfig = serde_json::from_str(&content)?;

    Ok(ModelMetadata {
        model_type: raw.model_type,
        architectures: raw.architectures,
        hidden_size: raw.hidden_size.or(raw.n_embd).or(raw.d_model),
        max_position_embeddings: raw.max_position_embeddings.or(raw.n_positions),
        vocab_size: raw.vocab_size,
        num_hidden_layers: raw.num_hidden_layers.or(raw.n_layer).or(raw.num_layers),
    })
}
