//! Logical server aggregate.

use super::{ParseServerStatusError, RuntimeDomainError, ServerConfig, ServerId, ServerName};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator-visible status of a logical server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Server is reachable or has a running deployment.
    Active,
    /// Server was stopped or never started.
    Stopped,
    /// Server failed and needs a manual start.
    Error,
}

impl ServerStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ServerStatus {
    type Error = ParseServerStatusError;

    fn try_from(value: &str) -> Result<Self, ParseServerStatusError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            _ => Err(ParseServerStatusError(value.to_owned())),
        }
    }
}

/// A configured backend, independent of where it currently runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalServer {
    id: ServerId,
    name: ServerName,
    config: ServerConfig,
    status: ServerStatus,
    updated_at: DateTime<Utc>,
}

impl LogicalServer {
    /// Creates a stopped server after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError`] when the configuration is invalid.
    pub fn new(
        name: ServerName,
        config: ServerConfig,
        clock: &impl Clock,
    ) -> Result<Self, RuntimeDomainError> {
        Self::with_id(ServerId::new(), name, config, clock)
    }

    /// Creates a stopped server with a caller-chosen identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError`] when the configuration is invalid.
    pub fn with_id(
        id: ServerId,
        name: ServerName,
        config: ServerConfig,
        clock: &impl Clock,
    ) -> Result<Self, RuntimeDomainError> {
        config.validate()?;
        Ok(Self {
            id,
            name,
            config,
            status: ServerStatus::Stopped,
            updated_at: clock.utc(),
        })
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn id(&self) -> ServerId {
        self.id
    }

    /// Returns the validated server name.
    #[must_use]
    pub const fn name(&self) -> &ServerName {
        &self.name
    }

    /// Returns the full configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> ServerStatus {
        self.status
    }

    /// Returns the last status change timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Sets the status.
    pub fn set_status(&mut self, status: ServerStatus, clock: &impl Clock) {
        self.status = status;
        self.updated_at = clock.utc();
    }
}
