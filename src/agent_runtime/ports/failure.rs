//! Callback port invoked by the health monitor when a deployment stays
//! unhealthy.

use crate::agent_runtime::domain::{Deployment, LogicalServer};
use async_trait::async_trait;

/// What the health monitor should do after a failure was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Keep probing the deployment.
    Continue,
    /// Stop probing; the deployment is no longer supervised.
    StopMonitoring,
}

/// Reacts to a deployment that crossed its unhealthy threshold.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// Handles a deployment whose unhealthy streak reached the threshold.
    async fn handle_unhealthy(
        &self,
        deployment: &Deployment,
        server: &LogicalServer,
    ) -> FailureDisposition;
}
