//! Deployment orchestration: the single source of truth for what runs where.

use crate::agent_runtime::{
    domain::{
        Deployment, DeploymentId, DeploymentKind, DeploymentStatus, LogicalServer,
        RuntimeDomainError, ServerId, ServerStatus,
    },
    ports::{BackendError, ExecutionBackend, RepositoryError, RuntimeRepository},
};
use mockable::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// Service-level errors for deployment orchestration.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] RuntimeDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Execution backend operation failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// No server exists with the given identifier.
    #[error("server {0} not found")]
    ServerNotFound(ServerId),
    /// No deployment exists with the given identifier.
    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),
    /// A confirmed-live deployment already exists.
    #[error("server {server_id} is already running (deployment {deployment_id})")]
    AlreadyRunning {
        /// Server identifier.
        server_id: ServerId,
        /// Live deployment.
        deployment_id: DeploymentId,
    },
    /// The server has no running deployment.
    #[error("no running deployment for server {0}")]
    NoRunningDeployment(ServerId),
    /// No backend is registered for the requested kind.
    #[error("no {0} execution backend is configured")]
    BackendUnavailable(DeploymentKind),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Persisted deployment state merged with a live backend probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentStatusReport {
    /// Server identifier.
    pub server_id: ServerId,
    /// Operator-visible server status.
    pub server_status: ServerStatus,
    /// Persisted running deployment, if any.
    pub deployment: Option<Deployment>,
    /// Whether the instance is actually alive.
    pub running: bool,
    /// Whether persistence claims `running` but the backend disagrees.
    pub stale: bool,
}

/// Outcome of startup reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Deployments marked running before reconciliation.
    pub checked: usize,
    /// Deployments confirmed alive.
    pub alive: usize,
    /// Deployments demoted to stopped.
    pub demoted: usize,
    /// Deployments whose backend could not be queried.
    pub unknown: usize,
}

/// Starts, stops, and reconciles deployments across execution backends.
pub struct DeploymentOrchestrator<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    backends: HashMap<DeploymentKind, Arc<dyn ExecutionBackend>>,
    clock: Arc<C>,
    locks: Mutex<HashMap<ServerId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R, C> DeploymentOrchestrator<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    /// Creates an orchestrator without backends.
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self {
            repository,
            backends: HashMap::new(),
            clock,
            locks: Mutex::default(),
        }
    }

    /// Registers `backend` for the kind it reports.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Returns the shared repository.
    #[must_use]
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Starts a deployment for `server_id`.
    ///
    /// Remote transports are marked active and receive a synthetic, unpersisted
    /// descriptor. A persisted running deployment is checked first: a live one
    /// is rejected, a stale one is demoted and superseded. A live instance the
    /// backend still holds without a running row, such as one left behind by
    /// a deployment marked `error` or `failed`, is stopped before the new
    /// instance starts.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyRunning`] for a confirmed-live
    /// deployment, and backend or repository errors otherwise.
    pub async fn start(
        &self,
        server_id: ServerId,
        kind: Option<DeploymentKind>,
    ) -> OrchestratorResult<Deployment> {
        let server_lock = self.server_lock(server_id);
        let _guard = server_lock.lock().await;

        let server = self.load_server(server_id).await?;
        if server.config().transport.is_remote() {
            self.repository
                .update_server_status(server_id, ServerStatus::Active)
                .await?;
            info!(server_id = %server_id, "remote server marked active");
            return Ok(Deployment::remote(server_id, &*self.clock));
        }

        let resolved = resolve_kind(&server, kind)?;
        let backend = self.backend(resolved)?;

        let mut stale_handle = None;
        if let Some(mut existing) = self.repository.find_running_deployment(server_id).await? {
            if self.is_live(&existing).await? {
                return Err(OrchestratorError::AlreadyRunning {
                    server_id,
                    deployment_id: existing.id(),
                });
            }
            existing.mark_stopped(&*self.clock)?;
            self.repository.upsert_deployment(&existing).await?;
            info!(
                server_id = %server_id,
                deployment_id = %existing.id(),
                "superseding stale deployment"
            );
            if existing.kind() == resolved {
                stale_handle = existing.handle().map(ToOwned::to_owned);
            }
        }

        let leftover = backend.status(server_id, stale_handle.as_deref()).await?;
        if leftover.running {
            match backend.stop(server_id, leftover.handle.as_deref()).await {
                Ok(()) | Err(BackendError::NotRunning(_)) => {}
                Err(err) => return Err(err.into()),
            }
            info!(
                server_id = %server_id,
                handle = ?leftover.handle,
                "stopped leftover instance"
            );
        }

        let instance = backend.start(&server, None).await?;
        let deployment = Deployment::running(
            server_id,
            resolved,
            instance.host,
            instance.port,
            instance.handle,
            &*self.clock,
        );
        self.repository.upsert_deployment(&deployment).await?;
        self.repository
            .update_server_status(server_id, ServerStatus::Active)
            .await?;

        info!(
            server_id = %server_id,
            deployment_id = %deployment.id(),
            kind = %resolved,
            handle = ?deployment.handle(),
            port = ?deployment.port(),
            "deployment started"
        );
        Ok(deployment)
    }

    /// Stops the running deployment of `server_id`.
    ///
    /// Returns `None` for remote transports, which only change status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoRunningDeployment`] when nothing runs.
    pub async fn stop(&self, server_id: ServerId) -> OrchestratorResult<Option<Deployment>> {
        let server_lock = self.server_lock(server_id);
        let _guard = server_lock.lock().await;

        let server = self.load_server(server_id).await?;
        if server.config().transport.is_remote() {
            self.repository
                .update_server_status(server_id, ServerStatus::Stopped)
                .await?;
            info!(server_id = %server_id, "remote server marked stopped");
            return Ok(None);
        }

        let mut deployment = self
            .repository
            .find_running_deployment(server_id)
            .await?
            .ok_or(OrchestratorError::NoRunningDeployment(server_id))?;
        let backend = self.backend(deployment.kind())?;

        match backend.stop(server_id, deployment.handle()).await {
            Ok(()) => {}
            Err(BackendError::NotRunning(_)) => {
                warn!(server_id = %server_id, "instance was already gone");
            }
            Err(err) => return Err(err.into()),
        }

        deployment.mark_stopped(&*self.clock)?;
        self.repository.upsert_deployment(&deployment).await?;
        self.repository
            .update_server_status(server_id, ServerStatus::Stopped)
            .await?;
        info!(
            server_id = %server_id,
            deployment_id = %deployment.id(),
            "deployment stopped"
        );
        Ok(Some(deployment))
    }

    /// Reports persisted state merged with a live backend probe.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ServerNotFound`] for unknown servers.
    pub async fn status(&self, server_id: ServerId) -> OrchestratorResult<DeploymentStatusReport> {
        let server = self.load_server(server_id).await?;
        if server.config().transport.is_remote() {
            return Ok(DeploymentStatusReport {
                server_id,
                server_status: server.status(),
                deployment: None,
                running: server.status() == ServerStatus::Active,
                stale: false,
            });
        }

        let deployment = self.repository.find_running_deployment(server_id).await?;
        let running = match &deployment {
            Some(existing) => self.is_live(existing).await?,
            None => false,
        };
        Ok(DeploymentStatusReport {
            server_id,
            server_status: server.status(),
            stale: deployment.is_some() && !running,
            deployment,
            running,
        })
    }

    /// Returns up to `tail` recent log lines of the server's instance.
    ///
    /// # Errors
    ///
    /// Returns backend errors when no logs are available.
    pub async fn logs(&self, server_id: ServerId, tail: usize) -> OrchestratorResult<String> {
        let server = self.load_server(server_id).await?;
        let kind = match self.repository.find_running_deployment(server_id).await? {
            Some(deployment) => deployment.kind(),
            None => resolve_kind(&server, None)?,
        };
        Ok(self.backend(kind)?.logs(server_id, tail).await?)
    }

    /// Returns whether the deployment's instance is alive.
    ///
    /// # Errors
    ///
    /// Returns backend errors when liveness cannot be determined.
    pub async fn is_live(&self, deployment: &Deployment) -> OrchestratorResult<bool> {
        if deployment.kind() == DeploymentKind::Remote {
            return Ok(deployment.is_running());
        }
        let status = self
            .backend(deployment.kind())?
            .status(deployment.server_id(), deployment.handle())
            .await?;
        Ok(status.running)
    }

    /// Corrects persisted running deployments to match observed reality.
    ///
    /// # Errors
    ///
    /// Returns repository errors; individual backend failures are logged and
    /// counted as unknown.
    pub async fn reconcile(&self) -> OrchestratorResult<ReconcileReport> {
        let running = self.repository.list_running_deployments().await?;
        let mut report = ReconcileReport {
            checked: running.len(),
            ..ReconcileReport::default()
        };

        for mut deployment in running {
            let server_id = deployment.server_id();
            let server_lock = self.server_lock(server_id);
            let _guard = server_lock.lock().await;

            match self.is_live(&deployment).await {
                Ok(true) => report.alive += 1,
                Ok(false) => {
                    deployment.mark_stopped(&*self.clock)?;
                    self.repository.upsert_deployment(&deployment).await?;
                    self.repository
                        .update_server_status(server_id, ServerStatus::Stopped)
                        .await?;
                    report.demoted += 1;
                    info!(
                        server_id = %server_id,
                        deployment_id = %deployment.id(),
                        "reconciled dead deployment to stopped"
                    );
                }
                Err(err) => {
                    report.unknown += 1;
                    warn!(
                        server_id = %server_id,
                        deployment_id = %deployment.id(),
                        error = %err,
                        "could not reconcile deployment"
                    );
                }
            }
        }

        info!(
            checked = report.checked,
            alive = report.alive,
            demoted = report.demoted,
            unknown = report.unknown,
            "reconciliation complete"
        );
        Ok(report)
    }

    /// Stops and restarts the instance behind a running deployment, keeping
    /// the deployment row and its port.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidStatusTransition`] when the
    /// deployment already left `running`, and backend errors when the new
    /// instance cannot be started.
    pub async fn redeploy(&self, deployment_id: DeploymentId) -> OrchestratorResult<Deployment> {
        let mut deployment = self.load_deployment(deployment_id).await?;
        let server_id = deployment.server_id();
        let server_lock = self.server_lock(server_id);
        let _guard = server_lock.lock().await;

        deployment = self.load_deployment(deployment_id).await?;
        if !deployment.is_running() {
            return Err(RuntimeDomainError::InvalidStatusTransition {
                from: deployment.status(),
                to: DeploymentStatus::Running,
            }
            .into());
        }

        let server = self.load_server(server_id).await?;
        let backend = self.backend(deployment.kind())?;
        match backend.stop(server_id, deployment.handle()).await {
            Ok(()) | Err(BackendError::NotRunning(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let instance = backend.start(&server, deployment.port()).await?;
        deployment.replace_instance(instance.host, instance.port, instance.handle, &*self.clock)?;
        self.repository.upsert_deployment(&deployment).await?;
        self.repository
            .update_server_status(server_id, ServerStatus::Active)
            .await?;
        info!(
            server_id = %server_id,
            deployment_id = %deployment_id,
            handle = ?deployment.handle(),
            "deployment redeployed"
        );
        Ok(deployment)
    }

    /// Marks a deployment `failed` after auto-restart gave up.
    ///
    /// # Errors
    ///
    /// Returns repository or transition errors.
    pub async fn mark_failed(
        &self,
        deployment_id: DeploymentId,
        reason: &str,
    ) -> OrchestratorResult<Deployment> {
        self.mark_broken(deployment_id, DeploymentStatus::Failed, reason)
            .await
    }

    /// Marks a deployment `error` when auto-restart is disabled.
    ///
    /// # Errors
    ///
    /// Returns repository or transition errors.
    pub async fn mark_error(
        &self,
        deployment_id: DeploymentId,
        reason: &str,
    ) -> OrchestratorResult<Deployment> {
        self.mark_broken(deployment_id, DeploymentStatus::Error, reason)
            .await
    }

    async fn mark_broken(
        &self,
        deployment_id: DeploymentId,
        target: DeploymentStatus,
        reason: &str,
    ) -> OrchestratorResult<Deployment> {
        let mut deployment = self.load_deployment(deployment_id).await?;
        let server_id = deployment.server_id();
        let server_lock = self.server_lock(server_id);
        let _guard = server_lock.lock().await;

        deployment = self.load_deployment(deployment_id).await?;
        match target {
            DeploymentStatus::Failed => deployment.mark_failed(reason, &*self.clock)?,
            _ => deployment.mark_error(reason, &*self.clock)?,
        }
        self.release_instance(&deployment).await;
        self.repository.upsert_deployment(&deployment).await?;
        self.repository
            .update_server_status(server_id, ServerStatus::Error)
            .await?;
        warn!(
            server_id = %server_id,
            deployment_id = %deployment_id,
            status = %deployment.status(),
            reason,
            "deployment marked broken"
        );
        Ok(deployment)
    }

    /// Stops whatever instance still backs a deployment leaving `running`.
    /// Failures are logged; the status change proceeds regardless.
    async fn release_instance(&self, deployment: &Deployment) {
        let server_id = deployment.server_id();
        if deployment.kind() == DeploymentKind::Remote {
            return;
        }
        let backend = match self.backend(deployment.kind()) {
            Ok(backend) => backend,
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "cannot release instance");
                return;
            }
        };
        match backend.stop(server_id, deployment.handle()).await {
            Ok(()) => info!(
                server_id = %server_id,
                deployment_id = %deployment.id(),
                "released instance of broken deployment"
            ),
            Err(BackendError::NotRunning(_)) => {}
            Err(err) => warn!(
                server_id = %server_id,
                deployment_id = %deployment.id(),
                error = %err,
                "failed to release instance of broken deployment"
            ),
        }
    }

    async fn load_server(&self, server_id: ServerId) -> OrchestratorResult<LogicalServer> {
        self.repository
            .find_server(server_id)
            .await?
            .ok_or(OrchestratorError::ServerNotFound(server_id))
    }

    async fn load_deployment(&self, deployment_id: DeploymentId) -> OrchestratorResult<Deployment> {
        self.repository
            .find_deployment(deployment_id)
            .await?
            .ok_or(OrchestratorError::DeploymentNotFound(deployment_id))
    }

    fn backend(&self, kind: DeploymentKind) -> OrchestratorResult<Arc<dyn ExecutionBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or(OrchestratorError::BackendUnavailable(kind))
    }

    fn server_lock(&self, server_id: ServerId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(server_id).or_default())
    }
}

/// Picks the backend kind for a process-backed server.
fn resolve_kind(
    server: &LogicalServer,
    requested: Option<DeploymentKind>,
) -> Result<DeploymentKind, RuntimeDomainError> {
    let kind = requested.unwrap_or(if server.config().docker.is_some() {
        DeploymentKind::DockerCompose
    } else {
        DeploymentKind::LocalProcess
    });

    let unsupported = match kind {
        DeploymentKind::Remote => true,
        DeploymentKind::DockerCompose => server.config().docker.is_none(),
        DeploymentKind::LocalProcess => false,
    };
    if unsupported {
        return Err(RuntimeDomainError::UnsupportedDeploymentKind {
            server_id: server.id(),
            kind: kind.as_str().to_owned(),
        });
    }
    Ok(kind)
}
