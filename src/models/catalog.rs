//! Static model catalog
//!
//! The catalog is the source of truth for model metadata. Registry entries
//! reference descriptors by id and only carry lifecycle state.

use crate::capability::PerformanceTier;
use serde::{Deserialize, Serialize};

/// Artifact format of a model's weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Safetensors,
    Pytorch,
    Gguf,
    Huggingface,
}

/// What a model is intended for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Programming,
    CodeAnalysis,
    SystemAdmin,
    General,
    Conversational,
}

impl std::str::FromStr for ModelCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "programming" => Ok(Self::Programming),
            "code_analysis" => Ok(Self::CodeAnalysis),
            "system_admin" => Ok(Self::SystemAdmin),
            "general" => Ok(Self::General),
            "conversational" => Ok(Self::Conversational),
            other => Err(format!("unknown model category '{}'", other)),
        }
    }
}

/// Size class by download footprint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    /// < 1GB
    Tiny,
    /// 1-4GB
    Small,
    /// 4-13GB
    Medium,
    /// 13-30GB
    Large,
    /// > 30GB
    Xlarge,
}

/// Immutable catalog metadata for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ModelCategory,
    pub size: ModelSize,
    pub format: ModelFormat,
    pub performance_tier: PerformanceTier,
    pub download_size_mb: u64,
    pub memory_requirement_mb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_requirement_mb: Option<u64>,
    /// Remote repository reference (e.g. "microsoft/codebert-base")
    pub repository: String,
    pub license: String,
    pub tags: Vec<String>,
}

impl ModelDescriptor {
    /// Last path segment of the repository reference
    pub fn repository_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

struct Entry {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: ModelCategory,
    size: ModelSize,
    tier: PerformanceTier,
    download_mb: u64,
    memory_mb: u64,
    vram_mb: Option<u64>,
    repository: &'static str,
    license: &'static str,
    tags: &'static [&'static str],
}

const CATALOG: &[Entry] = &[
    Entry {
        id: "gpt2",
        name: "GPT-2 (Small)",
        description: "OpenAI's GPT-2 small model for text and code generation",
        category: ModelCategory::Programming,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 500,
        memory_mb: 2000,
        vram_mb: None,
        repository: "gpt2",
        license: "MIT",
        tags: &["text-generation", "gpt", "lightweight", "generation"],
    },
    Entry {
        id: "microsoft-dialoGPT-small",
        name: "DialoGPT Small",
        description: "Microsoft's DialoGPT small model for conversational AI",
        category: ModelCategory::Conversational,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 350,
        memory_mb: 1500,
        vram_mb: None,
        repository: "microsoft/DialoGPT-small",
        license: "MIT",
        tags: &["conversational", "dialogue", "lightweight", "generation"],
    },
    Entry {
        id: "codebert-base-mlm",
        name: "CodeBERT Base MLM",
        description: "Microsoft's CodeBERT for masked language modeling on code",
        category: ModelCategory::Programming,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 500,
        memory_mb: 2000,
        vram_mb: None,
        repository: "microsoft/codebert-base-mlm",
        license: "MIT",
        tags: &["code", "programming", "mlm", "lightweight"],
    },
    Entry {
        id: "distilgpt2",
        name: "DistilGPT-2",
        description: "Distilled version of GPT-2 for text generation",
        category: ModelCategory::Programming,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 350,
        memory_mb: 1500,
        vram_mb: None,
        repository: "distilgpt2",
        license: "Apache-2.0",
        tags: &["text-generation", "gpt", "lightweight"],
    },
    Entry {
        id: "tinyllama-1.1b",
        name: "TinyLlama 1.1B",
        description: "Compact language model for code and chat",
        category: ModelCategory::Conversational,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 2200,
        memory_mb: 4000,
        vram_mb: Some(2000),
        repository: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        license: "Apache-2.0",
        tags: &["llama", "chat", "lightweight", "multilingual"],
    },
    Entry {
        id: "codebert-base",
        name: "CodeBERT Base",
        description: "Microsoft's CodeBERT for code understanding",
        category: ModelCategory::Programming,
        size: ModelSize::Medium,
        tier: PerformanceTier::Medium,
        download_mb: 1200,
        memory_mb: 6000,
        vram_mb: Some(4000),
        repository: "microsoft/codebert-base",
        license: "MIT",
        tags: &["code", "programming", "bert", "medium"],
    },
    Entry {
        id: "codet5-base",
        name: "CodeT5 Base",
        description: "Salesforce's CodeT5 for code generation and understanding",
        category: ModelCategory::Programming,
        size: ModelSize::Medium,
        tier: PerformanceTier::Medium,
        download_mb: 900,
        memory_mb: 5000,
        vram_mb: Some(3000),
        repository: "Salesforce/codet5-base",
        license: "Apache-2.0",
        tags: &["code", "t5", "generation", "medium"],
    },
    Entry {
        id: "starcoder-base",
        name: "StarCoder Base",
        description: "BigCode's StarCoder for advanced code generation",
        category: ModelCategory::Programming,
        size: ModelSize::Large,
        tier: PerformanceTier::Powerful,
        download_mb: 15000,
        memory_mb: 32000,
        vram_mb: Some(16000),
        repository: "bigcode/starcoder",
        license: "BigCode OpenRAIL-M",
        tags: &["code", "large", "powerful", "generation"],
    },
    Entry {
        id: "deepseek-coder-6.7b",
        name: "DeepSeek Coder 6.7B",
        description: "DeepSeek's advanced code generation model",
        category: ModelCategory::Programming,
        size: ModelSize::Large,
        tier: PerformanceTier::Powerful,
        download_mb: 13000,
        memory_mb: 28000,
        vram_mb: Some(14000),
        repository: "deepseek-ai/deepseek-coder-6.7b-base",
        license: "Custom",
        tags: &["code", "deepseek", "large", "advanced"],
    },
    Entry {
        id: "bash-gpt",
        name: "Bash GPT",
        description: "Specialized model for bash scripting and system administration",
        category: ModelCategory::SystemAdmin,
        size: ModelSize::Small,
        tier: PerformanceTier::Lightweight,
        download_mb: 800,
        memory_mb: 3000,
        vram_mb: Some(1500),
        repository: "microsoft/DialoGPT-medium",
        license: "MIT",
        tags: &["bash", "system", "admin", "scripting"],
    },
];

/// Build the built-in catalog
pub fn default_catalog() -> Vec<ModelDescriptor> {
    CATALOG
        .iter()
        .map(|e| ModelDescriptor {
            id: e.id.to_string(),
            name: e.name.to_string(),
            description: e.description.to_string(),
            category: e.category,
            size: e.size,
            format: ModelFormat::Huggingface,
            performance_tier: e.tier,
            download_size_mb: e.download_mb,
            memory_requirement_mb: e.memory_mb,
            vram_requirement_mb: e.vram_mb,
            repository: e.repository.to_string(),
            license: e.license.to_string(),
            tags: e.tags.iter().map(|t| t.to_string()).collect(),
        })
        .collect()
}
