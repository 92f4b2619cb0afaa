//! Runtime facade wiring the pool, router, orchestrator, health monitor, and
//! restart controller together.

use super::{
    health::HealthMonitor,
    orchestrator::{DeploymentOrchestrator, DeploymentStatusReport, OrchestratorError, ReconcileReport},
    proxy::{ProxyRequest, ProxyResponse, ProxyRouter, ProxySettings},
    restart::{RestartController, RestartLedger},
};
use crate::agent_runtime::{
    adapters::ProcessPool,
    domain::{
        Deployment, DeploymentKind, HealthCheckSettings, ServerId, SlidingWindowRateLimiter,
        TransportConfig,
    },
    ports::{FailureHandler, RuntimeRepository},
};
use mockable::Clock;
use std::sync::Arc;
use tracing::{info, warn};

/// Tunables applied when wiring the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Proxy deadlines.
    pub proxy: ProxySettings,
    /// Health check applied to servers without their own block.
    pub health_defaults: HealthCheckSettings,
    /// Restart burst limit.
    pub restart_limiter: SlidingWindowRateLimiter,
}

/// Entry point for deployment control and proxying.
pub struct AgentRuntime<R, C>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    orchestrator: Arc<DeploymentOrchestrator<R, C>>,
    router: ProxyRouter<R>,
    pool: Arc<ProcessPool>,
    monitor: HealthMonitor<R, C>,
    ledger: Arc<RestartLedger>,
}

impl<R, C> AgentRuntime<R, C>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Wires the runtime around an orchestrator with its backends registered.
    #[must_use]
    pub fn new(
        orchestrator: DeploymentOrchestrator<R, C>,
        pool: Arc<ProcessPool>,
        clock: Arc<C>,
        settings: RuntimeSettings,
    ) -> Self {
        let shared = Arc::new(orchestrator);
        let ledger = Arc::new(RestartLedger::new(settings.restart_limiter));
        let controller: Arc<dyn FailureHandler> = Arc::new(RestartController::new(
            Arc::clone(&shared),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));
        let monitor = HealthMonitor::new(
            Arc::clone(&shared),
            controller,
            Arc::clone(&ledger),
            clock,
            settings.health_defaults,
        );
        let router = ProxyRouter::new(
            Arc::clone(shared.repository()),
            Arc::clone(&pool),
            settings.proxy,
        );

        Self {
            orchestrator: shared,
            router,
            pool,
            monitor,
            ledger,
        }
    }

    /// Reconciles persisted deployments and resumes monitoring the live ones.
    ///
    /// # Errors
    ///
    /// Returns repository errors raised during reconciliation.
    pub async fn bootstrap(&self) -> Result<ReconcileReport, OrchestratorError> {
        let report = self.orchestrator.reconcile().await?;
        for deployment in self
            .orchestrator
            .repository()
            .list_running_deployments()
            .await?
        {
            self.monitor.monitor(deployment.id());
        }
        Ok(report)
    }

    /// Starts a deployment and begins monitoring it.
    ///
    /// # Errors
    ///
    /// See [`DeploymentOrchestrator::start`].
    pub async fn start(
        &self,
        server_id: ServerId,
        kind: Option<DeploymentKind>,
    ) -> Result<Deployment, OrchestratorError> {
        let deployment = self.orchestrator.start(server_id, kind).await?;
        if deployment.kind() != DeploymentKind::Remote {
            self.monitor.monitor(deployment.id());
        }
        Ok(deployment)
    }

    /// Stops a deployment, its monitoring, and any pooled stdio process.
    ///
    /// # Errors
    ///
    /// See [`DeploymentOrchestrator::stop`]; a server with only a pooled
    /// process counts as stopped.
    pub async fn stop(&self, server_id: ServerId) -> Result<Option<Deployment>, OrchestratorError> {
        let pooled = self.pool.terminate(server_id).await;
        match self.orchestrator.stop(server_id).await {
            Ok(stopped) => {
                if let Some(deployment) = &stopped {
                    self.monitor.stop(deployment.id());
                }
                Ok(stopped)
            }
            Err(OrchestratorError::NoRunningDeployment(_)) if pooled => {
                info!(server_id = %server_id, "terminated pooled stdio process");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Reports persisted and live deployment state.
    ///
    /// # Errors
    ///
    /// See [`DeploymentOrchestrator::status`].
    pub async fn status(&self, server_id: ServerId) -> Result<DeploymentStatusReport, OrchestratorError> {
        self.orchestrator.status(server_id).await
    }

    /// Returns recent log lines.
    ///
    /// # Errors
    ///
    /// See [`DeploymentOrchestrator::logs`].
    pub async fn logs(&self, server_id: ServerId, tail: usize) -> Result<String, OrchestratorError> {
        self.orchestrator.logs(server_id, tail).await
    }

    /// Proxies one request.
    pub async fn proxy(&self, server_id: ServerId, request: ProxyRequest) -> ProxyResponse {
        self.router.route(server_id, request).await
    }

    /// Pre-spawns the pooled process of a stdio server.
    ///
    /// Returns `false` for servers that are not stdio-backed or unknown.
    pub async fn warm(&self, server_id: ServerId) -> bool {
        let server = match self.orchestrator.repository().find_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => return false,
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "could not load server to warm");
                return false;
            }
        };
        let TransportConfig::Stdio(config) = &server.config().transport else {
            return false;
        };
        match self.pool.ensure_started(server_id, config) {
            Ok(()) => true,
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "could not warm stdio process");
                false
            }
        }
    }

    /// Terminates pooled processes and probe tasks; deployments keep running.
    pub async fn shutdown(&self) {
        self.monitor.stop_all();
        self.pool.terminate_all().await;
        info!("agent runtime shut down");
    }

    /// Returns the orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<DeploymentOrchestrator<R, C>> {
        &self.orchestrator
    }

    /// Returns the process pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ProcessPool> {
        &self.pool
    }

    /// Returns the health monitor.
    #[must_use]
    pub const fn monitor(&self) -> &HealthMonitor<R, C> {
        &self.monitor
    }

    /// Returns the restart ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<RestartLedger> {
        &self.ledger
    }
}
