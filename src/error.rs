//! Error types for model lifecycle operations and API responses

use crate::models::ModelStatus;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Failures surfaced by the model lifecycle core
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Unknown model id
    #[error("Model '{0}' not found")]
    NotFound(String),

    /// Operation not valid for the model's current status
    #[error("Cannot {operation} model '{model_id}' while it is {status}")]
    InvalidState {
        model_id: String,
        status: ModelStatus,
        operation: &'static str,
    },

    /// Listing or metadata lookup failed before any file transfer
    #[error("Repository unreachable for '{model_id}': {reason}")]
    RepositoryUnreachable { model_id: String, reason: String },

    /// A single file fetch failed (absorbed by the orchestrator)
    #[error("Failed to fetch '{file}' for '{model_id}': {reason}")]
    FileFetchFailed {
        model_id: String,
        file: String,
        reason: String,
    },

    /// Missing config or smoke test failure
    #[error("Validation failed for '{model_id}': {reason}")]
    ValidationFailed { model_id: String, reason: String },

    /// Model or tokenizer could not be built at load time
    #[error("Failed to construct '{model_id}': {reason}")]
    ConstructionFailed { model_id: String, reason: String },

    /// Runtime handle is leased by an in-flight operation
    #[error("Model '{0}' is in use")]
    ResourceBusy(String),

    /// Registry cache could not be written
    #[error("Failed to persist registry: {0}")]
    Persistence(String),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ModelError::InvalidState { .. } | ModelError::ResourceBusy(_) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
