//! Runtime services: orchestration, proxying, health, and restarts.

mod health;
mod orchestrator;
mod proxy;
mod restart;
mod runtime;

pub use health::{HealthMonitor, MonitorStep};
pub use orchestrator::{
    DeploymentOrchestrator, DeploymentStatusReport, OrchestratorError, OrchestratorResult,
    ReconcileReport,
};
pub use proxy::{ProxyRequest, ProxyResponse, ProxyRouter, ProxySettings};
pub use restart::{RestartAbort, RestartController, RestartLedger, RestartOutcome};
pub use runtime::{AgentRuntime, RuntimeSettings};
