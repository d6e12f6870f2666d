//! API route definitions

use crate::manager::ModelManager;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Catalog views
        .route("/models", get(handlers::list_models))
        .route("/models/recommendations", get(handlers::recommendations))
        .route("/models/loaded", get(handlers::loaded_models))
        .route("/models/status", get(handlers::status_summary))
        .route("/models/{id}", get(handlers::get_model))
        // Lifecycle
        .route("/models/{id}/download", post(handlers::download_model))
        .route("/models/{id}/progress", get(handlers::download_progress))
        .route("/models/{id}/validate", post(handlers::validate_model))
        .route("/models/{id}/load", post(handlers::load_model))
        .route("/models/{id}/unload", post(handlers::unload_model))
        // Performance
        .route("/models/{id}/benchmark", post(handlers::benchmark_model))
        .route("/models/{id}/performance", get(handlers::performance_history))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
