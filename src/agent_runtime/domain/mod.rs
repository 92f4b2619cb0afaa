//! Domain model for the agent runtime.
//!
//! Logical servers, their typed transport configuration, deployments, health
//! results, restart bookkeeping, and the JSON-RPC envelope. Infrastructure
//! concerns remain outside this boundary.

mod deployment;
mod error;
mod health;
mod ids;
pub mod jsonrpc;
mod restart;
mod server;
mod transport;

pub use deployment::{Deployment, DeploymentKind, DeploymentStatus, PersistedDeploymentData};
pub use error::{
    ParseDeploymentKindError, ParseDeploymentStatusError, ParseServerStatusError,
    RuntimeDomainError,
};
pub use health::{HealthCheckResult, HealthCheckSettings, HealthStatus};
pub use ids::{DeploymentId, ServerId, ServerName};
pub use restart::{RestartPolicy, RestartState, SlidingWindowRateLimiter};
pub use server::{LogicalServer, ServerStatus};
pub use transport::{
    DockerSettings, ExecutableTransportConfig, LambdaTransportConfig, ProcessSpec, ServerConfig,
    SseTransportConfig, StdioTransportConfig, TransportConfig,
};
