//! HTTP request handlers.

pub mod context_tools;
pub mod ollama;
pub mod run;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Uniform `{"error": …}` JSON error body.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}
