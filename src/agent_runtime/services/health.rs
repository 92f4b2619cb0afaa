//! Periodic health probing of running deployments.

use super::{orchestrator::DeploymentOrchestrator, restart::RestartLedger};
use crate::agent_runtime::{
    domain::{
        Deployment, DeploymentId, HealthCheckResult, HealthCheckSettings, HealthStatus,
        LogicalServer,
    },
    ports::{FailureDisposition, FailureHandler, RuntimeRepository},
};
use mockable::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FALLBACK_HOST: &str = "127.0.0.1";

/// What the monitoring loop does after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStep {
    /// Keep probing.
    Continue,
    /// The deployment is gone, no longer running, or was given up on.
    Stop,
}

struct MonitorContext<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    orchestrator: Arc<DeploymentOrchestrator<R, C>>,
    handler: Arc<dyn FailureHandler>,
    ledger: Arc<RestartLedger>,
    client: reqwest::Client,
    clock: Arc<C>,
    defaults: HealthCheckSettings,
}

/// Runs one probe task per monitored deployment.
pub struct HealthMonitor<R, C>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    context: Arc<MonitorContext<R, C>>,
    tasks: Mutex<HashMap<DeploymentId, JoinHandle<()>>>,
}

impl<R, C> HealthMonitor<R, C>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a monitor that reports persistent failures to `handler`.
    ///
    /// `defaults` apply to servers without a health check block.
    #[must_use]
    pub fn new(
        orchestrator: Arc<DeploymentOrchestrator<R, C>>,
        handler: Arc<dyn FailureHandler>,
        ledger: Arc<RestartLedger>,
        clock: Arc<C>,
        defaults: HealthCheckSettings,
    ) -> Self {
        Self {
            context: Arc::new(MonitorContext {
                orchestrator,
                handler,
                ledger,
                client: reqwest::Client::new(),
                clock,
                defaults,
            }),
            tasks: Mutex::default(),
        }
    }

    /// Starts a probe task for `deployment_id` unless one is already active.
    pub fn monitor(&self, deployment_id: DeploymentId) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks
            .get(&deployment_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let context = Arc::clone(&self.context);
        let handle = tokio::spawn(async move {
            loop {
                let interval = context.interval_for(deployment_id).await;
                tokio::time::sleep(interval).await;
                if context.tick(deployment_id).await == MonitorStep::Stop {
                    break;
                }
            }
            debug!(deployment_id = %deployment_id, "health monitoring ended");
        });
        tasks.insert(deployment_id, handle);
        info!(deployment_id = %deployment_id, "health monitoring started");
    }

    /// Stops monitoring `deployment_id` and forgets its restart bookkeeping.
    pub fn stop(&self, deployment_id: DeploymentId) {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&deployment_id);
        if let Some(task) = handle {
            task.abort();
            info!(deployment_id = %deployment_id, "health monitoring stopped");
        }
        self.context.ledger.remove(deployment_id);
    }

    /// Stops every probe task.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (deployment_id, task) in drained {
            task.abort();
            self.context.ledger.remove(deployment_id);
        }
    }

    /// Returns whether a live probe task exists for `deployment_id`.
    #[must_use]
    pub fn is_monitoring(&self, deployment_id: DeploymentId) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&deployment_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs one probe with its bookkeeping, outside the periodic loop.
    pub async fn tick(&self, deployment_id: DeploymentId) -> MonitorStep {
        self.context.tick(deployment_id).await
    }

    /// Probes a deployment once without recording anything.
    pub async fn probe(
        &self,
        deployment: &Deployment,
        server: &LogicalServer,
    ) -> HealthCheckResult {
        let settings = self.context.settings_for(server);
        self.context.probe(deployment, &settings).await
    }
}

impl<R, C> Drop for HealthMonitor<R, C>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

impl<R, C> MonitorContext<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    fn settings_for(&self, server: &LogicalServer) -> HealthCheckSettings {
        server
            .config()
            .health_check
            .clone()
            .unwrap_or_else(|| self.defaults.clone())
    }

    async fn load(&self, deployment_id: DeploymentId) -> Option<(Deployment, LogicalServer)> {
        let repository = self.orchestrator.repository();
        let deployment = match repository.find_deployment(deployment_id).await {
            Ok(found) => found?,
            Err(err) => {
                warn!(deployment_id = %deployment_id, error = %err, "could not load deployment for health check");
                return None;
            }
        };
        match repository.find_server(deployment.server_id()).await {
            Ok(server) => server.map(|found| (deployment, found)),
            Err(err) => {
                warn!(deployment_id = %deployment_id, error = %err, "could not load server for health check");
                None
            }
        }
    }

    async fn interval_for(&self, deployment_id: DeploymentId) -> Duration {
        self.load(deployment_id).await.map_or_else(
            || self.defaults.interval(),
            |(_, server)| self.settings_for(&server).interval(),
        )
    }

    async fn tick(&self, deployment_id: DeploymentId) -> MonitorStep {
        let Some((deployment, server)) = self.load(deployment_id).await else {
            return MonitorStep::Stop;
        };
        if !deployment.is_running() {
            return MonitorStep::Stop;
        }

        let settings = self.settings_for(&server);
        let result = self.probe(&deployment, &settings).await;
        if let Err(err) = self
            .orchestrator
            .repository()
            .record_health_check(&result)
            .await
        {
            warn!(deployment_id = %deployment_id, error = %err, "could not record health check");
        }

        match result.status() {
            HealthStatus::Healthy => {
                self.ledger.reset(deployment_id);
                MonitorStep::Continue
            }
            HealthStatus::Degraded => {
                debug!(
                    deployment_id = %deployment_id,
                    message = ?result.message(),
                    "deployment degraded"
                );
                MonitorStep::Continue
            }
            HealthStatus::Unhealthy => {
                let streak = self.ledger.record_unhealthy(deployment_id);
                warn!(
                    server_id = %server.id(),
                    deployment_id = %deployment_id,
                    streak,
                    threshold = settings.retries,
                    message = ?result.message(),
                    "deployment unhealthy"
                );
                if streak < settings.retries {
                    return MonitorStep::Continue;
                }
                self.ledger.clear_failures(deployment_id);
                match self.handler.handle_unhealthy(&deployment, &server).await {
                    FailureDisposition::Continue => MonitorStep::Continue,
                    FailureDisposition::StopMonitoring => MonitorStep::Stop,
                }
            }
        }
    }

    async fn probe(&self, deployment: &Deployment, settings: &HealthCheckSettings) -> HealthCheckResult {
        let started = Instant::now();
        let endpoint = settings.endpoint_for(
            deployment.host().unwrap_or(FALLBACK_HOST),
            deployment.port(),
        );
        let (status, message) = match endpoint {
            Some(url) => self.probe_http(&url, settings).await,
            None => self.probe_liveness(deployment).await,
        };

        HealthCheckResult::new(deployment.id(), status, started.elapsed(), self.clock.utc())
            .with_message(message.unwrap_or_default())
    }

    async fn probe_http(
        &self,
        url: &str,
        settings: &HealthCheckSettings,
    ) -> (HealthStatus, Option<String>) {
        let response = match self.client.get(url).timeout(settings.timeout()).send().await {
            Ok(response) => response,
            Err(err) => return (HealthStatus::Unhealthy, Some(format!("probe request failed: {err}"))),
        };

        let status = response.status();
        if status.as_u16() != settings.expected_status {
            return (
                HealthStatus::Unhealthy,
                Some(format!(
                    "expected status {} but got {}",
                    settings.expected_status,
                    status.as_u16()
                )),
            );
        }

        let pattern = match settings.body_pattern() {
            Ok(Some(pattern)) => pattern,
            Ok(None) => return (HealthStatus::Healthy, None),
            Err(err) => return (HealthStatus::Unhealthy, Some(err.to_string())),
        };
        match response.text().await {
            Ok(body) if pattern.is_match(&body) => (HealthStatus::Healthy, None),
            Ok(_) => (
                HealthStatus::Degraded,
                Some(format!("response body does not match '{}'", pattern.as_str())),
            ),
            Err(err) => (HealthStatus::Unhealthy, Some(format!("could not read probe body: {err}"))),
        }
    }

    async fn probe_liveness(&self, deployment: &Deployment) -> (HealthStatus, Option<String>) {
        match self.orchestrator.is_live(deployment).await {
            Ok(true) => (HealthStatus::Healthy, None),
            Ok(false) => (
                HealthStatus::Unhealthy,
                Some("deployment is not running".to_owned()),
            ),
            Err(err) => (HealthStatus::Unhealthy, Some(err.to_string())),
        }
    }
}
