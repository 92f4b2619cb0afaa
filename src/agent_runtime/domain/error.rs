//! Error types for runtime domain validation and parsing.

use super::{DeploymentStatus, ServerId};
use thiserror::Error;

/// Errors returned while constructing runtime domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeDomainError {
    /// The server name is empty after trimming.
    #[error("server name must not be empty")]
    EmptyServerName,

    /// The server name contains characters outside `[a-z0-9_-]`.
    #[error(
        "server name '{0}' contains invalid characters (only lowercase alphanumeric, '-' and '_' allowed)"
    )]
    InvalidServerName(String),

    /// The server name exceeds the storage limit.
    #[error("server name exceeds 100 character limit: {0}")]
    ServerNameTooLong(String),

    /// The STDIO command is empty.
    #[error("STDIO command must not be empty")]
    EmptyStdioCommand,

    /// The STDIO working directory is empty after trimming.
    #[error("STDIO working directory must not be empty when provided")]
    EmptyWorkingDirectory,

    /// The executable path is empty.
    #[error("executable path must not be empty")]
    EmptyExecutablePath,

    /// The SSE URL is empty.
    #[error("SSE URL must not be empty")]
    EmptySseUrl,

    /// The SSE URL does not have an `http://` or `https://` prefix.
    #[error("SSE URL '{0}' must start with 'http://' or 'https://'")]
    InvalidSseUrl(String),

    /// The Lambda function name is empty.
    #[error("Lambda function name must not be empty")]
    EmptyLambdaFunctionName,

    /// A Docker block is attached to a transport that never runs locally.
    #[error("docker settings are only valid for stdio or executable transports")]
    DockerRequiresProcessTransport,

    /// The Docker image is empty.
    #[error("docker image must not be empty")]
    EmptyDockerImage,

    /// The health check interval or retry count is zero.
    #[error("health check {0} must be greater than zero")]
    InvalidHealthCheck(&'static str),

    /// The restart policy would never back off.
    #[error("restart policy backoff multiplier must be at least 1")]
    InvalidBackoffMultiplier,

    /// The expected health body pattern is not a valid regular expression.
    #[error("invalid health check body pattern '{pattern}': {reason}")]
    InvalidBodyPattern {
        /// Pattern as configured.
        pattern: String,
        /// Regex compiler message.
        reason: String,
    },

    /// Transitioning a deployment between two statuses is invalid.
    #[error("invalid deployment status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: DeploymentStatus,
        /// Requested target status.
        to: DeploymentStatus,
    },

    /// The deployment kind cannot host the server's transport.
    #[error("deployment kind {kind} cannot host server {server_id}")]
    UnsupportedDeploymentKind {
        /// Server identifier.
        server_id: ServerId,
        /// Requested deployment kind in canonical string form.
        kind: String,
    },
}

/// Error returned while parsing a server status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown server status: {0}")]
pub struct ParseServerStatusError(pub String);

/// Error returned while parsing a deployment status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown deployment status: {0}")]
pub struct ParseDeploymentStatusError(pub String);

/// Error returned while parsing a deployment kind from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown deployment kind: {0}")]
pub struct ParseDeploymentKindError(pub String);
