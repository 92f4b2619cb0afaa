//! Persistence port for servers, deployments, and health history.

use crate::agent_runtime::domain::{
    Deployment, DeploymentId, HealthCheckResult, LogicalServer, ServerId, ServerStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for runtime persistence operations.
pub type RuntimeRepositoryResult<T> = Result<T, RepositoryError>;

/// Persistence contract consumed by the runtime services.
///
/// Implementations decode stored configuration into domain types once, at
/// this boundary.
#[async_trait]
pub trait RuntimeRepository: Send + Sync {
    /// Finds a logical server by identifier.
    async fn find_server(&self, server_id: ServerId)
    -> RuntimeRepositoryResult<Option<LogicalServer>>;

    /// Returns every logical server.
    async fn list_servers(&self) -> RuntimeRepositoryResult<Vec<LogicalServer>>;

    /// Inserts or replaces a logical server.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DuplicateServerName`] when another server
    /// already uses the same name.
    async fn save_server(&self, server: &LogicalServer) -> RuntimeRepositoryResult<()>;

    /// Sets the operator-visible status of a server.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ServerNotFound`] when the server does not
    /// exist.
    async fn update_server_status(
        &self,
        server_id: ServerId,
        status: ServerStatus,
    ) -> RuntimeRepositoryResult<()>;

    /// Finds a deployment by identifier.
    async fn find_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> RuntimeRepositoryResult<Option<Deployment>>;

    /// Returns the most recent running deployment of a server.
    async fn find_running_deployment(
        &self,
        server_id: ServerId,
    ) -> RuntimeRepositoryResult<Option<Deployment>>;

    /// Returns every running deployment.
    async fn list_running_deployments(&self) -> RuntimeRepositoryResult<Vec<Deployment>>;

    /// Inserts or replaces a deployment row.
    async fn upsert_deployment(&self, deployment: &Deployment) -> RuntimeRepositoryResult<()>;

    /// Appends a probe result to the deployment's history.
    async fn record_health_check(&self, result: &HealthCheckResult)
    -> RuntimeRepositoryResult<()>;

    /// Returns up to `limit` most recent probe results, newest first.
    async fn health_history(
        &self,
        deployment_id: DeploymentId,
        limit: usize,
    ) -> RuntimeRepositoryResult<Vec<HealthCheckResult>>;
}

/// Errors returned by runtime repository implementations.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The server was not found.
    #[error("server not found: {0}")]
    ServerNotFound(ServerId),

    /// Another server already uses the name.
    #[error("duplicate server name: {0}")]
    DuplicateServerName(String),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl RepositoryError {
    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
