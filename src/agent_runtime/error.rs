//! Error taxonomy surfaced by the runtime's outer interfaces.
//!
//! Lower layers carry the server id and underlying message; this type only
//! decides the status code, the stable machine code, and the response shape.

use super::{
    adapters::PoolError,
    domain::jsonrpc::EnvelopeError,
    ports::{BackendError, RepositoryError},
    services::OrchestratorError,
};
use http::StatusCode;
use thiserror::Error;

/// Externally visible runtime failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The request is malformed.
    #[error("{0}")]
    Validation(String),
    /// The addressed server or deployment does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The caller is not authenticated.
    #[error("{0}")]
    Authentication(String),
    /// The caller may not perform the operation.
    #[error("{0}")]
    Authorization(String),
    /// A deployment operation failed.
    #[error("{0}")]
    Deployment(String),
    /// Forwarding to a backend failed.
    #[error("{0}")]
    Proxy(String),
}

impl RuntimeError {
    /// Returns the HTTP status associated with the class.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Deployment(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Proxy(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns the stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Authentication(_) => "AUTHENTICATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Deployment(_) => "DEPLOYMENT_ERROR",
            Self::Proxy(_) => "PROXY_ERROR",
        }
    }

    /// Returns whether a caller with a valid envelope gets a JSON-RPC error
    /// object instead of a plain error body.
    #[must_use]
    pub const fn is_jsonrpc_shaped(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Deployment(_) | Self::Proxy(_)
        )
    }
}

impl From<EnvelopeError> for RuntimeError {
    fn from(err: EnvelopeError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PoolError> for RuntimeError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::DuplicateRequestId { .. } => Self::Validation(err.to_string()),
            _ => Self::Proxy(err.to_string()),
        }
    }
}

impl From<RepositoryError> for RuntimeError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ServerNotFound(_) => Self::NotFound(err.to_string()),
            _ => Self::Deployment(err.to_string()),
        }
    }
}

impl From<BackendError> for RuntimeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotRunning(_) => Self::NotFound(err.to_string()),
            BackendError::UnsupportedConfig { .. } => Self::Validation(err.to_string()),
            _ => Self::Deployment(err.to_string()),
        }
    }
}

impl From<OrchestratorError> for RuntimeError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::ServerNotFound(_)
            | OrchestratorError::DeploymentNotFound(_)
            | OrchestratorError::NoRunningDeployment(_) => Self::NotFound(err.to_string()),
            OrchestratorError::Domain(_) => Self::Validation(err.to_string()),
            OrchestratorError::Repository(inner) => inner.into(),
            OrchestratorError::Backend(inner) => inner.into(),
            OrchestratorError::AlreadyRunning { .. }
            | OrchestratorError::BackendUnavailable(_) => Self::Deployment(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runtime::domain::ServerId;
    use rstest::rstest;

    #[rstest]
    #[case(RuntimeError::Validation("x".into()), 400, "VALIDATION_ERROR", false)]
    #[case(RuntimeError::NotFound("x".into()), 404, "NOT_FOUND", true)]
    #[case(RuntimeError::Authentication("x".into()), 401, "AUTHENTICATION_ERROR", false)]
    #[case(RuntimeError::Authorization("x".into()), 403, "AUTHORIZATION_ERROR", false)]
    #[case(RuntimeError::Deployment("x".into()), 500, "DEPLOYMENT_ERROR", true)]
    #[case(RuntimeError::Proxy("x".into()), 502, "PROXY_ERROR", true)]
    fn classes_map_to_status_and_code(
        #[case] error: RuntimeError,
        #[case] status: u16,
        #[case] code: &str,
        #[case] jsonrpc_shaped: bool,
    ) {
        assert_eq!(error.status_code().as_u16(), status);
        assert_eq!(error.code(), code);
        assert_eq!(error.is_jsonrpc_shaped(), jsonrpc_shaped);
    }

    #[test]
    fn already_running_is_a_deployment_error() {
        let error = RuntimeError::from(OrchestratorError::AlreadyRunning {
            server_id: ServerId::new(),
            deployment_id: crate::agent_runtime::domain::DeploymentId::new(),
        });

        assert_eq!(error.code(), "DEPLOYMENT_ERROR");
        assert!(error.to_string().contains("already running"));
    }

    #[test]
    fn pool_timeout_is_a_proxy_error() {
        let server_id = ServerId::new();
        let error = RuntimeError::from(PoolError::Timeout {
            server_id,
            id: "1".to_owned(),
            timeout_ms: 50,
        });

        assert_eq!(error.code(), "PROXY_ERROR");
        assert!(error.to_string().contains(&server_id.to_string()));
    }
}
