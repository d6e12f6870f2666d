//! Model Manager - lifecycle service for local transformer models
//!
//! Catalogs a fixed set of HuggingFace models, downloads them on demand,
//! validates them with a smoke test, keeps a bounded pool of loaded runtimes
//! and evicts idle ones.

pub mod api;
pub mod benchmark;
pub mod capability;
pub mod config;
pub mod error;
pub mod eviction;
pub mod gpu;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod runtime;
pub mod state;

pub use benchmark::PerformanceSample;
pub use capability::{PerformanceTier, SystemCapabilities};
pub use config::ManagerConfig;
pub use error::{ApiError, ModelError, ModelResult};
pub use manager::{ManagerBuilder, ModelManager, StatusSummary};
pub use models::{ModelCategory, ModelInfo, ModelRegistry, ModelStatus};
pub use state::RegistryStore;
