//! Model catalog and lifecycle
//!
//! - Static catalog of supported models
//! - Registry tracking per-model status and history
//! - Downloading from the HuggingFace Hub
//! - Parsing config.json metadata
//! - Smoke-test validation

pub mod catalog;
pub mod download;
pub mod metadata;
pub mod registry;
pub mod repository;
pub mod validation;

pub use catalog::{ModelCategory, ModelDescriptor, ModelFormat, ModelSize, default_catalog};
pub use download::{DownloadOrchestrator, DownloadProgress};
pub use metadata::{ModelMetadata, parse_model_config};
pub use registry::{ModelEvent, ModelInfo, ModelRegistry, ModelStatus, RegistryEntry};
pub use repository::{HfHubRepository, ModelRepository};
pub use validation::ValidationEngine;
