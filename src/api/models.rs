//! API request and response models

use crate::benchmark::PerformanceSample;
use crate::models::ModelStatus;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub loaded_models: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Filters for `GET /models`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

/// Outcome of a lifecycle operation
///
/// `success` mirrors the boolean result; `status` and `reason` are read back
/// from the registry afterwards.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse {
    pub model_id: String,
    pub success: bool,
    pub status: ModelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Loaded model ids
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadedResponse {
    pub models: Vec<String>,
    pub count: usize,
}

/// Benchmark result; `sample` is absent when the model was not loaded
#[derive(Debug, Serialize, Deserialize)]
pub struct BenchmarkResponse {
    pub model_id: String,
    pub sample: Option<PerformanceSample>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PerformanceResponse {
    pub model_id: String,
    pub samples: Vec<PerformanceSample>,
}
