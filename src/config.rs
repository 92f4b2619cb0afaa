//! Daemon configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! supervisor listening on `127.0.0.1:8080` with no seeded servers.

use crate::agent_runtime::{
    adapters::{DockerComposeSettings, LocalProcessSettings, ProcessPool},
    domain::{
        HealthCheckSettings, LogicalServer, RuntimeDomainError, ServerConfig, ServerId, ServerName,
        SlidingWindowRateLimiter,
    },
    services::{ProxySettings, RuntimeSettings},
};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::TimeDelta;
use mockable::Clock;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path as given.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A seeded server is invalid.
    #[error("invalid server '{name}': {source}")]
    InvalidServer {
        /// Configured server name.
        name: String,
        /// Validation failure.
        source: RuntimeDomainError,
    },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Operator HTTP listen address.
    pub listen: SocketAddr,
    /// Proxy deadlines.
    pub proxy: ProxySection,
    /// Default health probe settings.
    pub health: HealthSection,
    /// Restart burst limit.
    pub restart: RestartSection,
    /// Local process backend tunables.
    pub local_process: LocalProcessSection,
    /// Docker Compose backend tunables.
    pub docker: DockerSection,
    /// Servers loaded into the repository at startup.
    pub servers: Vec<ServerSeed>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            proxy: ProxySection::default(),
            health: HealthSection::default(),
            restart: RestartSection::default(),
            local_process: LocalProcessSection::default(),
            docker: DockerSection::default(),
            servers: Vec::new(),
        }
    }
}

/// `[proxy]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Deadline for forwarded HTTP requests, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for one stdio call, in milliseconds.
    pub stdio_timeout_ms: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            stdio_timeout_ms: 30_000,
        }
    }
}

/// `[health]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Seconds between probes.
    pub interval_secs: u64,
    /// Probe request timeout in seconds.
    pub timeout_secs: u64,
    /// Consecutive unhealthy probes before the restart controller runs.
    pub retries: u32,
}

impl Default for HealthSection {
    fn default() -> Self {
        let defaults = HealthCheckSettings::default();
        Self {
            interval_secs: defaults.interval_secs,
            timeout_secs: defaults.timeout_secs,
            retries: defaults.retries,
        }
    }
}

/// `[restart]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestartSection {
    /// Restarts allowed inside one window.
    pub max_restarts_per_window: usize,
    /// Window length in seconds.
    pub window_secs: i64,
}

impl Default for RestartSection {
    fn default() -> Self {
        Self {
            max_restarts_per_window: SlidingWindowRateLimiter::DEFAULT_MAX_EVENTS,
            window_secs: SlidingWindowRateLimiter::DEFAULT_WINDOW_SECS,
        }
    }
}

/// `[local_process]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalProcessSection {
    /// Retained output lines per process.
    pub log_capacity: usize,
    /// Seconds between SIGTERM and kill.
    pub stop_grace_secs: u64,
    /// Host spawned servers bind to.
    pub host: String,
}

impl Default for LocalProcessSection {
    fn default() -> Self {
        let defaults = LocalProcessSettings::default();
        Self {
            log_capacity: defaults.log_capacity,
            stop_grace_secs: defaults.stop_grace.as_secs(),
            host: defaults.host,
        }
    }
}

/// `[docker]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DockerSection {
    /// Container engine executable.
    pub program: String,
    /// Directory receiving transient compose files.
    pub compose_dir: Utf8PathBuf,
}

impl Default for DockerSection {
    fn default() -> Self {
        let defaults = DockerComposeSettings::default();
        Self {
            program: defaults.program,
            compose_dir: defaults.compose_dir,
        }
    }
}

/// One `[[servers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSeed {
    /// Stable identifier; generated when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Unique server name.
    pub name: String,
    /// Transport and supervision settings.
    #[serde(flatten)]
    pub config: ServerConfig,
}

impl FleetConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read and
    /// [`ConfigError::Parse`] for malformed input.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: path.to_owned(),
            source,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let file_name = path
            .file_name()
            .ok_or_else(|| read_error(std::io::Error::other("path has no file name")))?;

        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
        let text = dir.read_to_string(file_name).map_err(read_error)?;
        Self::from_toml_str(&text)
    }

    /// Builds validated servers from the `[[servers]]` entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidServer`] for the first invalid entry.
    pub fn seed_servers(&self, clock: &impl Clock) -> Result<Vec<LogicalServer>, ConfigError> {
        self.servers
            .iter()
            .map(|seed| {
                let invalid = |source| ConfigError::InvalidServer {
                    name: seed.name.clone(),
                    source,
                };
                let name = ServerName::new(seed.name.as_str()).map_err(invalid)?;
                let id = seed.id.map_or_else(ServerId::new, ServerId::from_uuid);
                LogicalServer::with_id(id, name, seed.config.clone(), clock).map_err(invalid)
            })
            .collect()
    }

    /// Returns the runtime wiring settings.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            proxy: ProxySettings {
                request_timeout: Duration::from_millis(self.proxy.request_timeout_ms),
                stdio_timeout: Duration::from_millis(self.proxy.stdio_timeout_ms),
            },
            health_defaults: HealthCheckSettings {
                interval_secs: self.health.interval_secs,
                timeout_secs: self.health.timeout_secs,
                retries: self.health.retries,
                ..HealthCheckSettings::default()
            },
            restart_limiter: SlidingWindowRateLimiter::new(
                self.restart.max_restarts_per_window,
                TimeDelta::seconds(self.restart.window_secs),
            ),
        }
    }

    /// Returns the local process backend settings.
    #[must_use]
    pub fn local_process_settings(&self) -> LocalProcessSettings {
        LocalProcessSettings {
            host: self.local_process.host.clone(),
            log_capacity: self.local_process.log_capacity,
            stop_grace: Duration::from_secs(self.local_process.stop_grace_secs),
        }
    }

    /// Returns the Docker Compose backend settings.
    #[must_use]
    pub fn docker_settings(&self) -> DockerComposeSettings {
        DockerComposeSettings {
            program: self.docker.program.clone(),
            compose_dir: self.docker.compose_dir.clone(),
            host: self.local_process.host.clone(),
        }
    }

    /// Returns the process pool stop grace period.
    #[must_use]
    pub const fn pool_stop_grace(&self) -> Duration {
        if self.local_process.stop_grace_secs == 0 {
            return ProcessPool::DEFAULT_STOP_GRACE;
        }
        Duration::from_secs(self.local_process.stop_grace_secs)
    }
}
