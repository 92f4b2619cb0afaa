//! Health probe settings and results.

use super::{DeploymentId, RuntimeDomainError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome class of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Probe passed.
    Healthy,
    /// Endpoint answered with the expected status but an unexpected body.
    Degraded,
    /// Network failure, wrong status, non-running deployment, or exception.
    Unhealthy,
}

impl HealthStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Ephemeral output of one health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    deployment_id: DeploymentId,
    status: HealthStatus,
    response_time_ms: u64,
    message: Option<String>,
    checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Creates a probe result.
    #[must_use]
    pub fn new(
        deployment_id: DeploymentId,
        status: HealthStatus,
        response_time: Duration,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            deployment_id,
            status,
            response_time_ms: u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX),
            message: None,
            checked_at,
        }
    }

    /// Adds an explanatory message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let normalized = message.into().trim().to_owned();
        if !normalized.is_empty() {
            self.message = Some(normalized);
        }
        self
    }

    /// Returns the probed deployment.
    #[must_use]
    pub const fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    /// Returns the outcome class.
    #[must_use]
    pub const fn status(&self) -> HealthStatus {
        self.status
    }

    /// Returns the probe duration in milliseconds.
    #[must_use]
    pub const fn response_time_ms(&self) -> u64 {
        self.response_time_ms
    }

    /// Returns an optional detail message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns when the probe completed.
    #[must_use]
    pub const fn checked_at(&self) -> DateTime<Utc> {
        self.checked_at
    }
}

/// Per-server health probe configuration.
///
/// Without `path` or `url` the probe degrades to "deployment is running".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    /// Path appended to `http://host:port` of the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Absolute URL; takes precedence over `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Seconds between probes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds before a probe request is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive unhealthy probes that trigger the restart controller.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Expected HTTP status code.
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Regular expression the response body must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_body: Option<String>,
}

const fn default_interval_secs() -> u64 {
    30
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_retries() -> u32 {
    3
}

const fn default_expected_status() -> u16 {
    200
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            expected_status: default_expected_status(),
            expected_body: None,
        }
    }
}

impl HealthCheckSettings {
    /// Returns the probe interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the probe request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolves the probe URL against a deployment address.
    #[must_use]
    pub fn endpoint_for(&self, host: &str, port: Option<u16>) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let path = self.path.as_deref()?;
        let port = port?;
        let normalized = path.trim_start_matches('/');
        Some(format!("http://{host}:{port}/{normalized}"))
    }

    /// Compiles the expected body pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::InvalidBodyPattern`] when the pattern
    /// does not compile.
    pub fn body_pattern(&self) -> Result<Option<Regex>, RuntimeDomainError> {
        self.expected_body
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| RuntimeDomainError::InvalidBodyPattern {
                    pattern: pattern.to_owned(),
                    reason: err.to_string(),
                })
            })
            .transpose()
    }

    pub(super) fn validate(&self) -> Result<(), RuntimeDomainError> {
        if self.interval_secs == 0 {
            return Err(RuntimeDomainError::InvalidHealthCheck("interval_secs"));
        }
        if self.timeout_secs == 0 {
            return Err(RuntimeDomainError::InvalidHealthCheck("timeout_secs"));
        }
        if self.retries == 0 {
            return Err(RuntimeDomainError::InvalidHealthCheck("retries"));
        }
        self.body_pattern().map(|_| ())
    }
}
