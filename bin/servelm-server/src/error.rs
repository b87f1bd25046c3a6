//! Unified server error type.
//!
//! Handlers return `Result<T, ServerError>`. Errors render as an
//! OpenAI-style body, `{"error": {"message", "type", "param", "code"}}`.
//! Client errors carry their message through; server errors are logged in
//! full and answered with a generic message so prompts, paths and engine
//! internals never reach the caller.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use servelm_core::CompletionError;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The body was not JSON or did not match the request schema.
    #[error("malformed request body: {0}")]
    Json(#[from] JsonRejection),

    /// The body parsed but broke a validation rule.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
    },

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl From<ValidationErrors> for ServerError {
    fn from(errors: ValidationErrors) -> Self {
        let param = errors.field_errors().keys().next().map(|k| k.to_string());
        ServerError::InvalidRequest {
            message: errors.to_string(),
            param,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind, message, param) = match &self {
            ServerError::Json(rejection) => (
                rejection.status(),
                "invalid_request_error",
                rejection.body_text(),
                None,
            ),
            ServerError::InvalidRequest { message, param } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                message.clone(),
                param.clone(),
            ),
            ServerError::Completion(e) if e.is_client_error() => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                e.to_string(),
                Some("messages".to_owned()),
            ),
            ServerError::Completion(CompletionError::WorkerUnavailable) => {
                error!("generation worker is not running");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "server_error",
                    "the model is not available".to_owned(),
                    None,
                )
            }
            ServerError::Completion(e) => {
                error!(error = %e, "chat completion failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal server error".to_owned(),
                    None,
                )
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
                "param": param,
                "code": null,
            }
        });
        (status, Json(body)).into_response()
    }
}
