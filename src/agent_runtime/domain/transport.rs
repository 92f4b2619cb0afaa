//! Transport configuration value objects.
//!
//! A server's [`TransportConfig`] is decoded once at the persistence
//! boundary; downstream code matches on the variant instead of probing the
//! shape of loosely-typed JSON.

use super::{HealthCheckSettings, RestartPolicy, RuntimeDomainError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport settings for an MCP server hosted over STDIO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<String>,
}

impl StdioTransportConfig {
    /// Creates a new STDIO transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::EmptyStdioCommand`] when `command` is
    /// empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(RuntimeDomainError::EmptyStdioCommand);
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Sets an explicit working directory.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::EmptyWorkingDirectory`] when the provided
    /// value is empty after trimming.
    pub fn with_working_directory(
        mut self,
        value: impl Into<String>,
    ) -> Result<Self, RuntimeDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(RuntimeDomainError::EmptyWorkingDirectory);
        }

        self.working_directory = Some(normalized);
        Ok(self)
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    fn validate(&self) -> Result<(), RuntimeDomainError> {
        if self.command.trim().is_empty() {
            return Err(RuntimeDomainError::EmptyStdioCommand);
        }
        if self
            .working_directory
            .as_deref()
            .is_some_and(|dir| dir.trim().is_empty())
        {
            return Err(RuntimeDomainError::EmptyWorkingDirectory);
        }
        Ok(())
    }
}

/// Transport settings for a remote MCP server reached over HTTP+SSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseTransportConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl SseTransportConfig {
    /// Creates a new SSE transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError`] when `url` is empty or does not start
    /// with `http://` or `https://`.
    pub fn new(url: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        let config = Self {
            url: url.into().trim().to_owned(),
            headers: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces the headers sent with every forwarded request.
    #[must_use]
    pub fn with_headers(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = values.into_iter().collect();
        self
    }

    /// Returns the remote URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the configured headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn validate(&self) -> Result<(), RuntimeDomainError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(RuntimeDomainError::EmptySseUrl);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RuntimeDomainError::InvalidSseUrl(url.to_owned()));
        }
        Ok(())
    }
}

/// Transport settings for a packaged executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableTransportConfig {
    path: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl ExecutableTransportConfig {
    /// Creates a new executable transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::EmptyExecutablePath`] when `path` is
    /// empty after trimming.
    pub fn new(path: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        let normalized = path.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(RuntimeDomainError::EmptyExecutablePath);
        }
        Ok(Self {
            path: normalized,
            args: Vec::new(),
            env: BTreeMap::new(),
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Returns the executable path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Transport settings for a Lambda-hosted server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaTransportConfig {
    function_name: String,
}

impl LambdaTransportConfig {
    /// Creates a new Lambda transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeDomainError::EmptyLambdaFunctionName`] when the name
    /// is empty after trimming.
    pub fn new(function_name: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        let normalized = function_name.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(RuntimeDomainError::EmptyLambdaFunctionName);
        }
        Ok(Self {
            function_name: normalized,
        })
    }

    /// Returns the function name.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }
}

/// How a logical server is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TransportConfig {
    /// Subprocess speaking JSON-RPC over its standard streams.
    Stdio(StdioTransportConfig),
    /// Remote HTTP endpoint; no local process.
    Sse(SseTransportConfig),
    /// Packaged binary serving HTTP once started.
    Executable(ExecutableTransportConfig),
    /// Remote function; never process-managed.
    Lambda(LambdaTransportConfig),
}

impl TransportConfig {
    /// Creates a `stdio` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioTransportConfig::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        Ok(Self::Stdio(StdioTransportConfig::new(command)?))
    }

    /// Creates an `sse` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`SseTransportConfig::new`].
    pub fn sse(url: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        Ok(Self::Sse(SseTransportConfig::new(url)?))
    }

    /// Creates an `executable` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`ExecutableTransportConfig::new`].
    pub fn executable(path: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        Ok(Self::Executable(ExecutableTransportConfig::new(path)?))
    }

    /// Creates a `lambda` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`LambdaTransportConfig::new`].
    pub fn lambda(function_name: impl Into<String>) -> Result<Self, RuntimeDomainError> {
        Ok(Self::Lambda(LambdaTransportConfig::new(function_name)?))
    }

    /// Returns the canonical tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Sse(_) => "sse",
            Self::Executable(_) => "executable",
            Self::Lambda(_) => "lambda",
        }
    }

    /// Returns whether the server lives outside this host.
    ///
    /// Remote transports never appear in the process pool or the execution
    /// backends.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Sse(_) | Self::Lambda(_))
    }

    /// Returns the process to spawn for locally executed transports.
    #[must_use]
    pub fn process_spec(&self) -> Option<ProcessSpec> {
        match self {
            Self::Stdio(config) => Some(ProcessSpec {
                program: config.command.clone(),
                args: config.args.clone(),
                env: config.env.clone(),
                working_directory: config.working_directory.clone(),
            }),
            Self::Executable(config) => Some(ProcessSpec {
                program: config.path.clone(),
                args: config.args.clone(),
                env: config.env.clone(),
                working_directory: None,
            }),
            Self::Sse(_) | Self::Lambda(_) => None,
        }
    }

    /// Re-checks invariants of a decoded configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuntimeDomainError`] found.
    pub fn validate(&self) -> Result<(), RuntimeDomainError> {
        match self {
            Self::Stdio(config) => config.validate(),
            Self::Sse(config) => config.validate(),
            Self::Executable(config) => {
                if config.path.trim().is_empty() {
                    return Err(RuntimeDomainError::EmptyExecutablePath);
                }
                Ok(())
            }
            Self::Lambda(config) => {
                if config.function_name.trim().is_empty() {
                    return Err(RuntimeDomainError::EmptyLambdaFunctionName);
                }
                Ok(())
            }
        }
    }
}

/// A fully resolved local process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program to execute.
    pub program: String,
    /// Argument vector, passed without shell interpretation.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Optional working directory.
    pub working_directory: Option<String>,
}

/// Container settings used by the Docker Compose backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Image reference.
    pub image: String,
    /// Port the server listens on inside the container.
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    /// Container environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Volume mounts in compose short syntax.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Optional command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

const fn default_container_port() -> u16 {
    8080
}

impl DockerSettings {
    /// Creates settings for an image with default port and no extras.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            container_port: default_container_port(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            command: None,
        }
    }
}

/// Complete configuration of a logical server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport used to reach the server.
    pub transport: TransportConfig,
    /// Container settings; selects the Docker Compose backend by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerSettings>,
    /// HTTP health probe settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSettings>,
    /// Opt-in auto-restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

impl ServerConfig {
    /// Creates a configuration with only a transport.
    #[must_use]
    pub const fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            docker: None,
            health_check: None,
            restart_policy: None,
        }
    }

    /// Attaches container settings.
    #[must_use]
    pub fn with_docker(mut self, docker: DockerSettings) -> Self {
        self.docker = Some(docker);
        self
    }

    /// Attaches health probe settings.
    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheckSettings) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Attaches a restart policy.
    #[must_use]
    pub const fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = Some(policy);
        self
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuntimeDomainError`] found.
    pub fn validate(&self) -> Result<(), RuntimeDomainError> {
        self.transport.validate()?;
        if let Some(docker) = &self.docker {
            if self.transport.is_remote() {
                return Err(RuntimeDomainError::DockerRequiresProcessTransport);
            }
            if docker.image.trim().is_empty() {
                return Err(RuntimeDomainError::EmptyDockerImage);
            }
        }
        if let Some(health_check) = &self.health_check {
            health_check.validate()?;
        }
        if let Some(policy) = &self.restart_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn stdio_config_decodes_from_tagged_json() {
        let value = json!({
            "transport": {
                "type": "stdio",
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-everything"],
                "env": {"DEBUG": "1"}
            }
        });

        let config: ServerConfig = serde_json::from_value(value).expect("valid config");

        let TransportConfig::Stdio(stdio) = &config.transport else {
            panic!("expected stdio transport");
        };
        assert_eq!(stdio.command(), "npx");
        assert_eq!(stdio.args().len(), 2);
        assert_eq!(stdio.env().get("DEBUG").map(String::as_str), Some("1"));
    }

    #[rstest]
    #[case(TransportConfig::stdio("mcp-server").expect("valid"), false)]
    #[case(TransportConfig::executable("/opt/mcp/bin/server").expect("valid"), false)]
    #[case(TransportConfig::sse("https://mcp.example.com").expect("valid"), true)]
    #[case(TransportConfig::lambda("mcp-handler").expect("valid"), true)]
    fn remote_transports_have_no_process_spec(
        #[case] transport: TransportConfig,
        #[case] remote: bool,
    ) {
        assert_eq!(transport.is_remote(), remote);
        assert_eq!(transport.process_spec().is_none(), remote);
    }

    #[test]
    fn builders_flow_into_process_spec() {
        let stdio = StdioTransportConfig::new("mcp-server")
            .expect("valid command")
            .with_env([("TOKEN".to_owned(), "abc".to_owned())])
            .with_working_directory("  /srv/mcp  ")
            .expect("valid directory");
        let executable = ExecutableTransportConfig::new("/opt/mcp/bin/server")
            .expect("valid path")
            .with_env([("MODE".to_owned(), "http".to_owned())]);

        let stdio_spec = TransportConfig::Stdio(stdio)
            .process_spec()
            .expect("stdio is process-backed");
        let executable_spec = TransportConfig::Executable(executable)
            .process_spec()
            .expect("executable is process-backed");

        assert_eq!(stdio_spec.working_directory.as_deref(), Some("/srv/mcp"));
        assert_eq!(stdio_spec.env.get("TOKEN").map(String::as_str), Some("abc"));
        assert_eq!(executable_spec.env.get("MODE").map(String::as_str), Some("http"));
        assert_eq!(executable_spec.working_directory, None);
    }

    #[test]
    fn blank_working_directory_is_rejected() {
        let result = StdioTransportConfig::new("mcp-server")
            .expect("valid command")
            .with_working_directory("   ");

        assert_eq!(result.err(), Some(RuntimeDomainError::EmptyWorkingDirectory));
    }

    #[test]
    fn sse_url_requires_http_scheme() {
        assert_eq!(
            TransportConfig::sse("ftp://example.com"),
            Err(RuntimeDomainError::InvalidSseUrl(
                "ftp://example.com".to_owned()
            ))
        );
    }

    #[test]
    fn decoded_config_is_revalidated() {
        let value = json!({"transport": {"type": "stdio", "command": "  "}});
        let config: ServerConfig = serde_json::from_value(value).expect("shape is valid");

        assert_eq!(config.validate(), Err(RuntimeDomainError::EmptyStdioCommand));
    }

    #[test]
    fn docker_settings_reject_remote_transport() {
        let config = ServerConfig::new(TransportConfig::sse("https://mcp.example.com").expect("valid"))
            .with_docker(DockerSettings::new("ghcr.io/example/mcp:latest"));

        assert_eq!(
            config.validate(),
            Err(RuntimeDomainError::DockerRequiresProcessTransport)
        );
    }
}
