//! API request handlers

use super::models::{
    BenchmarkResponse, HealthResponse, ListQuery, LoadedResponse, OperationResponse,
    PerformanceResponse,
};
use super::routes::AppState;
use crate::capability::PerformanceTier;
use crate::error::ApiError;
use crate::manager::StatusSummary;
use crate::models::download::DownloadProgress;
use crate::models::{ModelCategory, ModelInfo};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// GET /health - Liveness and loaded models
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            loaded_models: state.manager.loaded_ids().await,
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /models - List catalogued models, optionally filtered
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let category = query
        .category
        .as_deref()
        .map(str::parse::<ModelCategory>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let tier = query
        .tier
        .as_deref()
        .map(str::parse::<PerformanceTier>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    Ok(Json(state.manager.list(category, tier).await))
}

/// GET /models/recommendations - Models suited to this host
pub async fn recommendations(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.manager.recommendations().await)
}

/// GET /models/loaded - Models with a live runtime
pub async fn loaded_models(State(state): State<AppState>) -> Json<LoadedResponse> {
    let models = state.manager.loaded_ids().await;
    crate::metrics::update_loaded_count(models.len());

    Json(LoadedResponse {
        count: models.len(),
        models,
    })
}

/// GET /models/status - Registry and hardware overview
pub async fn status_summary(State(state): State<AppState>) -> Json<StatusSummary> {
    Json(state.manager.status_summary().await)
}

/// GET /models/{id} - Model details
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelInfo>, ApiError> {
    Ok(Json(state.manager.get(&id).await?))
}

/// POST /models/{id}/download - Download and wait for completion
pub async fn download_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let success = state.manager.download(&id).await?;
    operation_response(&state, id, success).await
}

/// GET /models/{id}/progress - Progress of an in-flight download
pub async fn download_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DownloadProgress>, ApiError> {
    state
        .manager
        .progress(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No download in progress for '{}'", id)))
}

/// POST /models/{id}/validate - Smoke-test a downloaded model
pub async fn validate_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let success = state.manager.validate(&id).await?;
    operation_response(&state, id, success).await
}

/// POST /models/{id}/load - Build a runtime for a downloaded model
pub async fn load_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let success = state.manager.load(&id).await?;
    crate::metrics::update_loaded_count(state.manager.loaded_ids().await.len());
    operation_response(&state, id, success).await
}

/// POST /models/{id}/unload - Release a loaded runtime
pub async fn unload_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let success = state.manager.unload(&id).await?;
    crate::metrics::update_loaded_count(state.manager.loaded_ids().await.len());
    operation_response(&state, id, success).await
}

/// POST /models/{id}/benchmark - Measure a loaded model
pub async fn benchmark_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BenchmarkResponse>, ApiError> {
    let sample = state.manager.benchmark(&id).await?;
    Ok(Json(BenchmarkResponse {
        model_id: id,
        sample,
    }))
}

/// GET /models/{id}/performance - Recorded benchmark samples
pub async fn performance_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PerformanceResponse>, ApiError> {
    let samples = state.manager.performance_history(&id).await?;
    Ok(Json(PerformanceResponse {
        model_id: id,
        samples,
    }))
}

async fn operation_response(
    state: &AppState,
    model_id: String,
    success: bool,
) -> Result<Json<OperationResponse>, ApiError> {
    let info = state.manager.get(&model_id).await?;
    let reason = if success { None } else { info.validation_status };

    Ok(Json(OperationResponse {
        model_id,
        success,
        status: info.status,
        reason,
    }))
}
