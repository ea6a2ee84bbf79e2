//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Caller identity is missing or unreadable.
    #[error("{0}")]
    Unauthenticated(String),
    /// Caller may not access the resource.
    #[error("{0}")]
    Forbidden(String),
    /// Saga execution error.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, error_body(msg)),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, error_body(msg)),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        SagaError::Validation(_) | SagaError::Webhook(_) => StatusCode::BAD_REQUEST,
        SagaError::ProductNotFound(_) | SagaError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InsufficientStock { .. } | SagaError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        SagaError::Gateway { order_id, .. } => {
            let body = serde_json::json!({
                "error": err.to_string(),
                "kind": err.kind(),
                "order_id": order_id.to_string(),
            });
            return (StatusCode::BAD_GATEWAY, body);
        }
        SagaError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "internal server error", "kind": err.kind() }),
            );
        }
    };

    let body = serde_json::json!({ "error": err.to_string(), "kind": err.kind() });
    (status, body)
}
