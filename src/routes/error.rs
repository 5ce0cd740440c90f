use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::job_store::StoreError;
use crate::services::status::ResolveError;

/// Error type returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(#[from] garde::Report),

    #[error("Resource not found: {message}")]
    NotFound { message: String, hints: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound { task_id, hints } => ApiError::NotFound {
                message: format!("Task {} not found", task_id),
                hints,
            },
            ResolveError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(report) => {
                let fields: Vec<_> = report
                    .iter()
                    .map(|(path, error)| json!({ "field": path.to_string(), "message": error.to_string() }))
                    .collect();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "error": { "code": "VALIDATION_FAILED", "message": "Invalid analysis request", "fields": fields } }),
                )
            }
            ApiError::NotFound { message, hints } => (
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": "NOT_FOUND", "message": message, "hints": hints } }),
            ),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Job store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": { "code": "INTERNAL_ERROR", "message": "Job store unavailable" } }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
