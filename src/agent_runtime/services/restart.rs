//! Auto-restart controller with exponential backoff and a sliding-window
//! rate limit.

use super::orchestrator::DeploymentOrchestrator;
use crate::agent_runtime::{
    domain::{
        Deployment, DeploymentId, LogicalServer, RestartPolicy, RestartState,
        SlidingWindowRateLimiter,
    },
    ports::{FailureDisposition, FailureHandler, RuntimeRepository},
};
use async_trait::async_trait;
use mockable::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

/// Per-deployment restart bookkeeping shared by the health monitor and the
/// restart controller.
#[derive(Debug, Default)]
pub struct RestartLedger {
    limiter: SlidingWindowRateLimiter,
    states: Mutex<HashMap<DeploymentId, RestartState>>,
}

impl RestartLedger {
    /// Creates an empty ledger using `limiter` for restart bursts.
    #[must_use]
    pub fn new(limiter: SlidingWindowRateLimiter) -> Self {
        Self {
            limiter,
            states: Mutex::default(),
        }
    }

    /// Counts one more consecutive unhealthy probe and returns the streak.
    pub fn record_unhealthy(&self, deployment_id: DeploymentId) -> u32 {
        self.with_state(deployment_id, |state, _| state.record_unhealthy())
    }

    /// Clears the unhealthy streak, keeping restart history.
    pub fn clear_failures(&self, deployment_id: DeploymentId) {
        self.with_state(deployment_id, |state, _| state.clear_failures());
    }

    /// Clears every counter and the restart window.
    pub fn reset(&self, deployment_id: DeploymentId) {
        self.with_state(deployment_id, |state, _| state.reset());
    }

    /// Drops all bookkeeping for a deployment.
    pub fn remove(&self, deployment_id: DeploymentId) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&deployment_id);
    }

    /// Returns a copy of the current state, if any.
    #[must_use]
    pub fn snapshot(&self, deployment_id: DeploymentId) -> Option<RestartState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&deployment_id)
            .cloned()
    }

    /// Runs `update` against the deployment's state under the ledger lock.
    pub fn with_state<T>(
        &self,
        deployment_id: DeploymentId,
        update: impl FnOnce(&mut RestartState, &SlidingWindowRateLimiter) -> T,
    ) -> T {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(deployment_id)
            .or_insert_with(|| RestartState::new(deployment_id));
        update(state, &self.limiter)
    }
}

/// Reason the controller stopped restarting a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestartAbort {
    /// The retry budget is spent.
    #[error("restart retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Failed restart attempts.
        attempts: u32,
    },
    /// Too many restarts inside the rolling window.
    #[error("restart rate limit exceeded ({max} restarts per window)")]
    RateLimited {
        /// Restarts allowed per window.
        max: usize,
    },
}

/// Result of one restart episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A redeploy succeeded after `attempts` tries.
    Restarted {
        /// Attempts including the successful one.
        attempts: u32,
    },
    /// The controller gave up.
    GaveUp(RestartAbort),
}

/// Restarts unhealthy deployments according to their restart policy.
pub struct RestartController<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    orchestrator: Arc<DeploymentOrchestrator<R, C>>,
    ledger: Arc<RestartLedger>,
    clock: Arc<C>,
}

impl<R, C> RestartController<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    /// Creates a controller sharing `ledger` with the health monitor.
    #[must_use]
    pub const fn new(
        orchestrator: Arc<DeploymentOrchestrator<R, C>>,
        ledger: Arc<RestartLedger>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            clock,
        }
    }

    /// Runs the bounded restart loop for one deployment.
    ///
    /// The rate limiter is consulted before each attempt and again after a
    /// failed one, so a burst trips it regardless of the remaining retry
    /// budget.
    pub async fn restart(
        &self,
        deployment_id: DeploymentId,
        policy: &RestartPolicy,
    ) -> RestartOutcome {
        loop {
            let now = self.clock.utc();
            let decision = self.ledger.with_state(deployment_id, |state, limiter| {
                if state.retry_count() >= policy.max_retries {
                    return Err(RestartAbort::RetriesExhausted {
                        attempts: state.retry_count(),
                    });
                }
                if state.is_rate_limited(limiter, now) {
                    return Err(RestartAbort::RateLimited {
                        max: limiter.max_events(),
                    });
                }
                Ok((state.retry_count(), policy.backoff(state.retry_count())))
            });
            let (retry, delay) = match decision {
                Ok(next) => next,
                Err(abort) => return RestartOutcome::GaveUp(abort),
            };

            info!(
                deployment_id = %deployment_id,
                retry,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "restarting deployment after backoff"
            );
            tokio::time::sleep(delay).await;

            let started_at = self.clock.utc();
            self.ledger
                .with_state(deployment_id, |state, _| state.record_restart(started_at));

            match self.orchestrator.redeploy(deployment_id).await {
                Ok(_) => {
                    self.ledger.reset(deployment_id);
                    info!(deployment_id = %deployment_id, "deployment restarted");
                    return RestartOutcome::Restarted {
                        attempts: retry.saturating_add(1),
                    };
                }
                Err(err) => {
                    warn!(deployment_id = %deployment_id, retry, error = %err, "restart attempt failed");
                    let checked_at = self.clock.utc();
                    let tripped = self.ledger.with_state(deployment_id, |state, limiter| {
                        state.record_failed_attempt();
                        state
                            .is_rate_limited(limiter, checked_at)
                            .then(|| limiter.max_events())
                    });
                    if let Some(max) = tripped {
                        return RestartOutcome::GaveUp(RestartAbort::RateLimited { max });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<R, C> FailureHandler for RestartController<R, C>
where
    R: RuntimeRepository,
    C: Clock + Send + Sync,
{
    async fn handle_unhealthy(
        &self,
        deployment: &Deployment,
        server: &LogicalServer,
    ) -> FailureDisposition {
        let deployment_id = deployment.id();
        let policy = server.config().restart_policy.unwrap_or_default();

        if !policy.enabled {
            if let Err(err) = self
                .orchestrator
                .mark_error(deployment_id, "health checks failed and auto-restart is disabled")
                .await
            {
                warn!(deployment_id = %deployment_id, error = %err, "could not mark deployment as errored");
            }
            self.ledger.remove(deployment_id);
            return FailureDisposition::StopMonitoring;
        }

        match self.restart(deployment_id, &policy).await {
            RestartOutcome::Restarted { .. } => FailureDisposition::Continue,
            RestartOutcome::GaveUp(abort) => {
                warn!(
                    server_id = %server.id(),
                    deployment_id = %deployment_id,
                    reason = %abort,
                    "giving up on deployment"
                );
                if let Err(err) = self
                    .orchestrator
                    .mark_failed(deployment_id, &abort.to_string())
                    .await
                {
                    warn!(deployment_id = %deployment_id, error = %err, "could not mark deployment as failed");
                }
                self.ledger.remove(deployment_id);
                FailureDisposition::StopMonitoring
            }
        }
    }
}
