//! Deployment aggregate: one concrete instance of a logical server.

use super::{
    DeploymentId, ParseDeploymentKindError, ParseDeploymentStatusError, RuntimeDomainError,
    ServerId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution strategy behind a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    /// Bare local process.
    LocalProcess,
    /// Single-service Docker Compose project.
    DockerCompose,
    /// Synthetic record for SSE and Lambda servers.
    Remote,
}

impl DeploymentKind {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalProcess => "local_process",
            Self::DockerCompose => "docker_compose",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DeploymentKind {
    type Error = ParseDeploymentKindError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local_process" => Ok(Self::LocalProcess),
            "docker_compose" => Ok(Self::DockerCompose),
            "remote" => Ok(Self::Remote),
            _ => Err(ParseDeploymentKindError(value.to_owned())),
        }
    }
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Instance is believed to be running.
    Running,
    /// Instance was stopped or found dead.
    Stopped,
    /// Instance broke and auto-restart is disabled.
    Error,
    /// Auto-restart gave up; a manual start is required.
    Failed,
}

impl DeploymentStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }

    /// Returns whether transition to `target` is allowed.
    ///
    /// A row never returns to `running` once it has left it; a new start
    /// writes a new deployment instead.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Running, _) | (Self::Stopped | Self::Error | Self::Failed, Self::Stopped)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DeploymentStatus {
    type Error = ParseDeploymentStatusError;

    fn try_from(value: &str) -> Result<Self, ParseDeploymentStatusError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseDeploymentStatusError(value.to_owned())),
        }
    }
}

/// Deployment aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    id: DeploymentId,
    server_id: ServerId,
    kind: DeploymentKind,
    status: DeploymentStatus,
    host: Option<String>,
    port: Option<u16>,
    handle: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing persisted deployment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedDeploymentData {
    /// Persisted deployment identifier.
    pub id: DeploymentId,
    /// Owning server.
    pub server_id: ServerId,
    /// Execution strategy.
    pub kind: DeploymentKind,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// Reachable host.
    pub host: Option<String>,
    /// Reachable port.
    pub port: Option<u16>,
    /// Process id or container id.
    pub handle: Option<String>,
    /// Last recorded failure.
    pub last_error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Creates a running deployment for a freshly started instance.
    #[must_use]
    pub fn running(
        server_id: ServerId,
        kind: DeploymentKind,
        host: impl Into<String>,
        port: Option<u16>,
        handle: impl Into<String>,
        clock: &impl Clock,
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: DeploymentId::new(),
            server_id,
            kind,
            status: DeploymentStatus::Running,
            host: Some(host.into()),
            port,
            handle: Some(handle.into()),
            last_error: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Creates the synthetic descriptor used for remote transports.
    #[must_use]
    pub fn remote(server_id: ServerId, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: DeploymentId::new(),
            server_id,
            kind: DeploymentKind::Remote,
            status: DeploymentStatus::Running,
            host: None,
            port: None,
            handle: None,
            last_error: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a deployment from persistence.
    #[must_use]
    pub fn from_persisted(data: PersistedDeploymentData) -> Self {
        Self {
            id: data.id,
            server_id: data.server_id,
            kind: data.kind,
            status: data.status,
            host: data.host,
            port: data.port,
            handle: data.handle,
            last_error: data.last_error,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the deployment identifier.
    #[must_use]
    pub const fn id(&self) -> DeploymentId {
        self.id
    }

    /// Returns the owning server.
    #[must_use]
    pub const fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Returns the execution strategy.
    #[must_use]
    pub const fn kind(&self) -> DeploymentKind {
        self.kind
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Returns whether the status is `running`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, DeploymentStatus::Running)
    }

    /// Returns the reachable host.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the reachable port.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the process id or container id.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Returns the last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Records a replacement instance on a still-running deployment.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidStatusTransition`] when the
    /// deployment has already left `running`.
    pub fn replace_instance(
        &mut self,
        host: impl Into<String>,
        port: Option<u16>,
        handle: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), RuntimeDomainError> {
        self.transition_to(DeploymentStatus::Running)?;
        self.host = Some(host.into());
        self.port = port;
        self.handle = Some(handle.into());
        self.last_error = None;
        self.touch(clock);
        Ok(())
    }

    /// Marks the deployment as stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidStatusTransition`] when the
    /// transition is not allowed.
    pub fn mark_stopped(&mut self, clock: &impl Clock) -> Result<(), RuntimeDomainError> {
        self.transition_to(DeploymentStatus::Stopped)?;
        self.touch(clock);
        Ok(())
    }

    /// Marks the deployment as broken without auto-restart.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidStatusTransition`] when the
    /// transition is not allowed.
    pub fn mark_error(
        &mut self,
        reason: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), RuntimeDomainError> {
        self.transition_to(DeploymentStatus::Error)?;
        self.last_error = Some(reason.into());
        self.touch(clock);
        Ok(())
    }

    /// Marks the deployment as permanently failed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidStatusTransition`] when the
    /// transition is not allowed.
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), RuntimeDomainError> {
        self.transition_to(DeploymentStatus::Failed)?;
        self.last_error = Some(reason.into());
        self.touch(clock);
        Ok(())
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }

    fn transition_to(&mut self, target: DeploymentStatus) -> Result<(), RuntimeDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(RuntimeDomainError::InvalidStatusTransition {
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        Ok(())
    }
}
