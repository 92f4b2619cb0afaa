//! In-memory repository for servers, deployments, and health history.

use crate::agent_runtime::{
    domain::{
        Deployment, DeploymentId, HealthCheckResult, LogicalServer, ServerId, ServerStatus,
    },
    ports::{RepositoryError, RuntimeRepository, RuntimeRepositoryResult},
};
use async_trait::async_trait;
use mockable::DefaultClock;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory runtime repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuntimeRepository {
    state: Arc<RwLock<InMemoryRuntimeState>>,
}

#[derive(Debug, Default)]
struct InMemoryRuntimeState {
    servers: HashMap<ServerId, LogicalServer>,
    deployments: HashMap<DeploymentId, Deployment>,
    health: HashMap<DeploymentId, Vec<HealthCheckResult>>,
}

impl InMemoryRuntimeRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeRepository for InMemoryRuntimeRepository {
    async fn find_server(
        &self,
        server_id: ServerId,
    ) -> RuntimeRepositoryResult<Option<LogicalServer>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.servers.get(&server_id).cloned())
    }

    async fn list_servers(&self) -> RuntimeRepositoryResult<Vec<LogicalServer>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let mut servers: Vec<LogicalServer> = state.servers.values().cloned().collect();
        servers.sort_by(|left, right| left.name().as_str().cmp(right.name().as_str()));
        Ok(servers)
    }

    async fn save_server(&self, server: &LogicalServer) -> RuntimeRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let name_taken = state
            .servers
            .values()
            .any(|existing| existing.id() != server.id() && existing.name() == server.name());
        if name_taken {
            return Err(RepositoryError::DuplicateServerName(
                server.name().as_str().to_owned(),
            ));
        }

        state.servers.insert(server.id(), server.clone());
        Ok(())
    }

    async fn update_server_status(
        &self,
        server_id: ServerId,
        status: ServerStatus,
    ) -> RuntimeRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let server = state
            .servers
            .get_mut(&server_id)
            .ok_or(RepositoryError::ServerNotFound(server_id))?;
        server.set_status(status, &DefaultClock);
        Ok(())
    }

    async fn find_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> RuntimeRepositoryResult<Option<Deployment>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.deployments.get(&deployment_id).cloned())
    }

    async fn find_running_deployment(
        &self,
        server_id: ServerId,
    ) -> RuntimeRepositoryResult<Option<Deployment>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state
            .deployments
            .values()
            .filter(|deployment| deployment.server_id() == server_id && deployment.is_running())
            .max_by_key(|deployment| deployment.created_at())
            .cloned())
    }

    async fn list_running_deployments(&self) -> RuntimeRepositoryResult<Vec<Deployment>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let mut running: Vec<Deployment> = state
            .deployments
            .values()
            .filter(|deployment| deployment.is_running())
            .cloned()
            .collect();
        running.sort_by_key(Deployment::created_at);
        Ok(running)
    }

    async fn upsert_deployment(&self, deployment: &Deployment) -> RuntimeRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        if !state.servers.contains_key(&deployment.server_id()) {
            return Err(RepositoryError::ServerNotFound(deployment.server_id()));
        }
        state.deployments.insert(deployment.id(), deployment.clone());
        Ok(())
    }

    async fn record_health_check(
        &self,
        result: &HealthCheckResult,
    ) -> RuntimeRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        state
            .health
            .entry(result.deployment_id())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn health_history(
        &self,
        deployment_id: DeploymentId,
        limit: usize,
    ) -> RuntimeRepositoryResult<Vec<HealthCheckResult>> {
        let state = self.state.read().map_err(|err| {
            RepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state
            .health
            .get(&deployment_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
