use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::drops::RepositoryError;
use crate::username::ClaimError;

/// Failure reported by an external delivery service (geofence or push).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<ClaimError> for AppError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Validation(reason) => AppError::Validation(reason.code()),
            ClaimError::Conflict => AppError::Conflict("ALREADY_EXISTS".to_string()),
            ClaimError::Repository(e) => AppError::Repository(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", "Not found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                *reason,
                "Validation failed".to_string(),
            ),
            AppError::Conflict(reason) => (
                StatusCode::CONFLICT,
                "ALREADY_EXISTS",
                reason.clone(),
            ),
            AppError::Repository(e) => {
                tracing::error!("Repository error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": code, "message": message });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
