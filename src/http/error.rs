//! Error responses for the operator HTTP surface.

use crate::agent_runtime::{error::RuntimeError, services::OrchestratorError};
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

/// Body of every non-proxy error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable machine code.
    pub code: &'static str,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Runtime error rendered as an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError(RuntimeError);

impl ApiError {
    /// Wraps a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self(RuntimeError::Validation(message.into()))
    }

    /// Returns the wrapped runtime error.
    #[must_use]
    pub const fn inner(&self) -> &RuntimeError {
        &self.0
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        Self(err)
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
            details: None,
        };
        (self.0.status_code(), Json(body)).into_response()
    }
}
