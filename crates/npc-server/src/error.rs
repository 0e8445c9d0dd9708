//! Maps dispatch outcomes onto the status-code contract spec.md §6 names,
//! grounded on `restflow-core/daemon/http/error.rs`'s `ApiError` pattern.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn upstream_failure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<npc_engine::DispatchError> for ApiError {
    fn from(err: npc_engine::DispatchError) -> Self {
        tracing::error!(error = %err, "llm dispatch failed");
        Self::upstream_failure(err.to_string())
    }
}
