//! Restart policy, per-deployment restart bookkeeping, and rate limiting.

use super::{DeploymentId, RuntimeDomainError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Opt-in auto-restart policy read from a server's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Whether the controller restarts at all.
    #[serde(default)]
    pub enabled: bool,
    /// Restart attempts before the deployment is declared failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff, applied to one second.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Upper bound on a single backoff delay.
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_multiplier() -> u32 {
    2
}

const fn default_max_backoff_seconds() -> u64 {
    60
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

impl RestartPolicy {
    /// Creates an enabled policy.
    #[must_use]
    pub const fn enabled(max_retries: u32, backoff_multiplier: u32, max_backoff_seconds: u64) -> Self {
        Self {
            enabled: true,
            max_retries,
            backoff_multiplier,
            max_backoff_seconds,
        }
    }

    /// Returns the delay before the attempt following `retry_count` failures.
    ///
    /// Computes `min(multiplier ^ retry_count * 1s, max_backoff_seconds)`;
    /// overflow saturates to the cap.
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let seconds = u64::from(self.backoff_multiplier)
            .checked_pow(retry_count)
            .map_or(self.max_backoff_seconds, |value| {
                value.min(self.max_backoff_seconds)
            });
        Duration::from_secs(seconds)
    }

    pub(super) const fn validate(&self) -> Result<(), RuntimeDomainError> {
        if self.backoff_multiplier == 0 {
            return Err(RuntimeDomainError::InvalidBackoffMultiplier);
        }
        Ok(())
    }
}

/// Sliding-window limiter over restart timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowRateLimiter {
    max_events: usize,
    window: TimeDelta,
}

impl SlidingWindowRateLimiter {
    /// Default number of restarts allowed per window.
    pub const DEFAULT_MAX_EVENTS: usize = 3;
    /// Default window length in seconds.
    pub const DEFAULT_WINDOW_SECS: i64 = 60;

    /// Creates a limiter allowing `max_events` within `window`.
    #[must_use]
    pub const fn new(max_events: usize, window: TimeDelta) -> Self {
        Self { max_events, window }
    }

    /// Returns the number of events allowed per window.
    #[must_use]
    pub const fn max_events(&self) -> usize {
        self.max_events
    }

    /// Drops timestamps older than the window and reports whether the
    /// remaining count has reached the limit.
    pub fn is_exhausted(&self, timestamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.window;
        while timestamps.front().is_some_and(|timestamp| *timestamp <= cutoff) {
            timestamps.pop_front();
        }
        timestamps.len() >= self.max_events
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_EVENTS,
            TimeDelta::seconds(Self::DEFAULT_WINDOW_SECS),
        )
    }
}

/// In-memory restart bookkeeping for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartState {
    deployment_id: DeploymentId,
    consecutive_failures: u32,
    retry_count: u32,
    restart_timestamps: VecDeque<DateTime<Utc>>,
}

impl RestartState {
    /// Creates empty bookkeeping for a deployment.
    #[must_use]
    pub const fn new(deployment_id: DeploymentId) -> Self {
        Self {
            deployment_id,
            consecutive_failures: 0,
            retry_count: 0,
            restart_timestamps: VecDeque::new(),
        }
    }

    /// Returns the deployment this state belongs to.
    #[must_use]
    pub const fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    /// Returns consecutive unhealthy probes since the last healthy one.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns failed restart attempts in the current loop.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns restart timestamps still tracked by the limiter.
    #[must_use]
    pub const fn restart_timestamps(&self) -> &VecDeque<DateTime<Utc>> {
        &self.restart_timestamps
    }

    /// Counts an unhealthy probe and returns the new streak length.
    pub const fn record_unhealthy(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Clears the unhealthy streak after the controller has taken over.
    pub const fn clear_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Counts a failed restart attempt.
    pub const fn record_failed_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Records that a restart is being issued.
    pub fn record_restart(&mut self, at: DateTime<Utc>) {
        self.restart_timestamps.push_back(at);
    }

    /// Consults `limiter` against this state's restart history.
    pub fn is_rate_limited(&mut self, limiter: &SlidingWindowRateLimiter, now: DateTime<Utc>) -> bool {
        limiter.is_exhausted(&mut self.restart_timestamps, now)
    }

    /// Returns the state to empty.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.retry_count = 0;
        self.restart_timestamps.clear();
    }
}
