//! Execution backend port: where a deployment's instance actually runs.

use crate::agent_runtime::domain::{DeploymentKind, LogicalServer, ServerId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for execution backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Connection details of a freshly started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedInstance {
    /// Process id or container id.
    pub handle: String,
    /// Host the instance listens on.
    pub host: String,
    /// Port the instance listens on, when it publishes one.
    pub port: Option<u16>,
}

/// Liveness as observed by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStatus {
    /// Whether the instance is alive.
    pub running: bool,
    /// Handle of the live instance.
    pub handle: Option<String>,
}

impl BackendStatus {
    /// Status of an instance that is not running.
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            running: false,
            handle: None,
        }
    }

    /// Status of a live instance.
    #[must_use]
    pub fn running(handle: impl Into<String>) -> Self {
        Self {
            running: true,
            handle: Some(handle.into()),
        }
    }
}

/// Contract shared by the local process and Docker Compose strategies.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Returns the deployment kind this backend produces.
    fn kind(&self) -> DeploymentKind;

    /// Starts an instance of `server`, optionally on a requested port.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::AlreadyRunning`] when a live instance is
    /// already tracked for the server.
    async fn start(
        &self,
        server: &LogicalServer,
        port: Option<u16>,
    ) -> BackendResult<StartedInstance>;

    /// Stops the instance of `server_id`.
    ///
    /// `handle` is the persisted process or container id, used when the
    /// backend has no in-memory bookkeeping for the server.
    async fn stop(&self, server_id: ServerId, handle: Option<&str>) -> BackendResult<()>;

    /// Queries liveness of the instance of `server_id`.
    ///
    /// `handle` is the persisted process or container id, consulted when the
    /// backend has no in-memory bookkeeping for the server, so instances
    /// started by an earlier supervisor run are still seen as live.
    async fn status(
        &self,
        server_id: ServerId,
        handle: Option<&str>,
    ) -> BackendResult<BackendStatus>;

    /// Returns up to `tail` recent log lines.
    async fn logs(&self, server_id: ServerId, tail: usize) -> BackendResult<String>;
}

/// Errors returned by execution backends.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// A live instance is already tracked for the server.
    #[error("server {server_id} is already running with handle {handle}")]
    AlreadyRunning {
        /// Server identifier.
        server_id: ServerId,
        /// Handle of the live instance.
        handle: String,
    },

    /// No instance is tracked for the server.
    #[error("server {0} is not running")]
    NotRunning(ServerId),

    /// The server's configuration cannot run on this backend.
    #[error("unsupported configuration for server {server_id}: {reason}")]
    UnsupportedConfig {
        /// Server identifier.
        server_id: ServerId,
        /// Reason string.
        reason: String,
    },

    /// An external command exited unsuccessfully.
    #[error("{program} {action} failed for server {server_id}: {stderr}")]
    CommandFailed {
        /// Server identifier.
        server_id: ServerId,
        /// Program name.
        program: String,
        /// What the command was doing.
        action: &'static str,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// Generic runtime failure.
    #[error("execution backend error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Wraps a runtime error from the backend adapter.
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }
}
