//! Execution backend running each deployment as a single-service Docker
//! Compose project.
//!
//! Every engine interaction goes through [`CommandRunner`] with explicit
//! argument arrays. The generated compose file lives only for the duration
//! of `up` and is removed on every path.

use super::lock;
use crate::agent_runtime::{
    domain::{DeploymentKind, DockerSettings, LogicalServer, ServerId},
    ports::{
        BackendError, BackendResult, BackendStatus, CommandOutput, CommandRunner,
        ExecutionBackend, StartedInstance,
    },
};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Compose service name used for every project.
pub const COMPOSE_SERVICE: &str = "server";

/// Tunables for [`DockerComposeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerComposeSettings {
    /// Container engine executable.
    pub program: String,
    /// Directory receiving the transient compose files.
    pub compose_dir: Utf8PathBuf,
    /// Host address ports are published on.
    pub host: String,
}

impl Default for DockerComposeSettings {
    fn default() -> Self {
        let compose_dir = Utf8PathBuf::from_path_buf(std::env::temp_dir().join("mcp-fleet"))
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp/mcp-fleet"));
        Self {
            program: "docker".to_owned(),
            compose_dir,
            host: "127.0.0.1".to_owned(),
        }
    }
}

/// Returns the deterministic compose project of a server.
#[must_use]
pub fn project_name(server_id: ServerId) -> String {
    format!("mcp-{}", server_id.into_inner().simple())
}

#[derive(Debug, Serialize)]
struct ComposeFile<'a> {
    services: BTreeMap<&'static str, ComposeService<'a>>,
}

#[derive(Debug, Serialize)]
struct ComposeService<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a [String]>,
    ports: Vec<String>,
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    volumes: &'a [String],
}

/// Renders the single-service compose definition for `docker`.
///
/// # Errors
///
/// Returns [`BackendError::Runtime`] when YAML encoding fails.
pub fn render_compose(
    docker: &DockerSettings,
    host: &str,
    port: Option<u16>,
) -> BackendResult<String> {
    let mapping = port.map_or_else(
        || format!("{host}::{}", docker.container_port),
        |published| format!("{host}:{published}:{}", docker.container_port),
    );
    let mut environment = docker.env.clone();
    environment
        .entry("PORT".to_owned())
        .or_insert_with(|| docker.container_port.to_string());

    let file = ComposeFile {
        services: BTreeMap::from([(
            COMPOSE_SERVICE,
            ComposeService {
                image: &docker.image,
                command: docker.command.as_deref(),
                ports: vec![mapping],
                environment,
                volumes: &docker.volumes,
            },
        )]),
    };
    serde_yaml::to_string(&file).map_err(BackendError::runtime)
}

/// Runs deployments through `docker compose`.
pub struct DockerComposeBackend<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    settings: DockerComposeSettings,
    containers: Mutex<HashMap<ServerId, String>>,
}

impl<R> DockerComposeBackend<R>
where
    R: CommandRunner,
{
    /// Creates a backend issuing commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<R>, settings: DockerComposeSettings) -> Self {
        Self {
            runner,
            settings,
            containers: Mutex::default(),
        }
    }

    async fn run(&self, args: &[&str]) -> BackendResult<CommandOutput> {
        let owned: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        self.runner
            .run(&self.settings.program, &owned)
            .await
            .map_err(BackendError::runtime)
    }

    async fn run_checked(
        &self,
        server_id: ServerId,
        action: &'static str,
        args: &[&str],
    ) -> BackendResult<CommandOutput> {
        let output = self.run(args).await?;
        if output.is_success() {
            return Ok(output);
        }
        Err(BackendError::CommandFailed {
            server_id,
            program: self.settings.program.clone(),
            action,
            stderr: output.diagnostics(),
        })
    }

    fn write_compose_file(&self, file_name: &str, contents: &str) -> BackendResult<()> {
        Dir::create_ambient_dir_all(&self.settings.compose_dir, ambient_authority())
            .map_err(BackendError::runtime)?;
        let dir = Dir::open_ambient_dir(&self.settings.compose_dir, ambient_authority())
            .map_err(BackendError::runtime)?;
        dir.write(file_name, contents).map_err(BackendError::runtime)
    }

    fn remove_compose_file(&self, file_name: &str) {
        let removed = Dir::open_ambient_dir(&self.settings.compose_dir, ambient_authority())
            .and_then(|dir| dir.remove_file(file_name));
        if let Err(err) = removed {
            warn!(file = file_name, error = %err, "failed to remove compose file");
        }
    }

    async fn bring_up(
        &self,
        server_id: ServerId,
        project: &str,
        compose_path: &str,
        container_port: u16,
    ) -> BackendResult<StartedInstance> {
        self.run_checked(
            server_id,
            "compose up",
            &["compose", "-f", compose_path, "-p", project, "up", "-d"],
        )
        .await?;

        let listed = self
            .run_checked(
                server_id,
                "compose ps",
                &["compose", "-f", compose_path, "-p", project, "ps", "-q", COMPOSE_SERVICE],
            )
            .await?;
        let container_id = first_line(&listed).ok_or_else(|| BackendError::CommandFailed {
            server_id,
            program: self.settings.program.clone(),
            action: "compose ps",
            stderr: "no container reported for service".to_owned(),
        })?;

        let port_spec = format!("{container_port}/tcp");
        let published = self
            .run_checked(server_id, "port", &["port", &container_id, &port_spec])
            .await?;
        let port = first_line(&published)
            .as_deref()
            .and_then(parse_published_port)
            .ok_or_else(|| BackendError::CommandFailed {
                server_id,
                program: self.settings.program.clone(),
                action: "port",
                stderr: format!("unparseable port mapping: {}", published.stdout_trimmed()),
            })?;

        Ok(StartedInstance {
            handle: container_id,
            host: self.settings.host.clone(),
            port: Some(port),
        })
    }

    async fn lookup_container(
        &self,
        server_id: ServerId,
        handle: Option<&str>,
    ) -> BackendResult<Option<String>> {
        let tracked = lock(&self.containers).get(&server_id).cloned();
        if tracked.is_some() {
            return Ok(tracked);
        }

        let project = project_name(server_id);
        let listed = self
            .run(&["compose", "-p", &project, "ps", "-q", COMPOSE_SERVICE])
            .await?;
        let discovered = if listed.is_success() {
            first_line(&listed)
        } else {
            None
        };
        Ok(discovered.or_else(|| handle.map(ToOwned::to_owned)))
    }

    async fn remove_container(&self, server_id: ServerId, container_id: &str) -> BackendResult<()> {
        self.run_checked(server_id, "stop", &["stop", container_id])
            .await?;
        self.run_checked(server_id, "rm", &["rm", container_id])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<R> ExecutionBackend for DockerComposeBackend<R>
where
    R: CommandRunner,
{
    fn kind(&self) -> DeploymentKind {
        DeploymentKind::DockerCompose
    }

    async fn start(
        &self,
        server: &LogicalServer,
        port: Option<u16>,
    ) -> BackendResult<StartedInstance> {
        let server_id = server.id();
        let docker =
            server
                .config()
                .docker
                .as_ref()
                .ok_or_else(|| BackendError::UnsupportedConfig {
                    server_id,
                    reason: "server has no docker settings".to_owned(),
                })?;

        let current = self.status(server_id, None).await?;
        if current.running {
            return Err(BackendError::AlreadyRunning {
                server_id,
                handle: current.handle.unwrap_or_default(),
            });
        }

        let project = project_name(server_id);
        let file_name = format!("{project}.compose.yml");
        let compose_path = self.settings.compose_dir.join(&file_name);
        let contents = render_compose(docker, &self.settings.host, port)?;
        self.write_compose_file(&file_name, &contents)?;

        let outcome = self
            .bring_up(server_id, &project, compose_path.as_str(), docker.container_port)
            .await;
        self.remove_compose_file(&file_name);
        let instance = outcome?;

        lock(&self.containers).insert(server_id, instance.handle.clone());
        info!(
            server_id = %server_id,
            server_name = %server.name(),
            container_id = %instance.handle,
            port = ?instance.port,
            "started compose deployment"
        );
        Ok(instance)
    }

    async fn stop(&self, server_id: ServerId, handle: Option<&str>) -> BackendResult<()> {
        let project = project_name(server_id);
        let tracked = lock(&self.containers).remove(&server_id);

        let down = self.run(&["compose", "-p", &project, "down"]).await;
        match down {
            Ok(output) if output.is_success() => {
                info!(server_id = %server_id, project = %project, "compose project down");
                return Ok(());
            }
            Ok(output) => {
                warn!(
                    server_id = %server_id,
                    stderr = %output.diagnostics(),
                    "compose down failed; falling back to stop and rm"
                );
            }
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "compose down failed to run");
            }
        }

        let container_id = tracked
            .or_else(|| handle.map(ToOwned::to_owned))
            .ok_or(BackendError::NotRunning(server_id))?;
        self.remove_container(server_id, &container_id).await?;
        info!(server_id = %server_id, container_id = %container_id, "container removed");
        Ok(())
    }

    async fn status(
        &self,
        server_id: ServerId,
        handle: Option<&str>,
    ) -> BackendResult<BackendStatus> {
        let Some(container_id) = self.lookup_container(server_id, handle).await? else {
            return Ok(BackendStatus::stopped());
        };

        let inspected = self
            .run(&["inspect", "-f", "{{.State.Running}}", &container_id])
            .await?;
        if inspected.is_success() && inspected.stdout_trimmed() == "true" {
            lock(&self.containers).insert(server_id, container_id.clone());
            return Ok(BackendStatus::running(container_id));
        }

        debug!(server_id = %server_id, container_id = %container_id, "container is gone");
        lock(&self.containers).remove(&server_id);
        Ok(BackendStatus::stopped())
    }

    async fn logs(&self, server_id: ServerId, tail: usize) -> BackendResult<String> {
        let container_id = self
            .lookup_container(server_id, None)
            .await?
            .ok_or(BackendError::NotRunning(server_id))?;
        let tail_arg = tail.to_string();
        let output = self
            .run_checked(server_id, "logs", &["logs", "--tail", &tail_arg, &container_id])
            .await?;

        let stdout = output.stdout.trim_end();
        let stderr = output.stderr.trim_end();
        Ok(match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_owned(),
            (true, false) => stderr.to_owned(),
            (false, false) => format!("{stdout}\n{stderr}"),
        })
    }
}

fn first_line(output: &CommandOutput) -> Option<String> {
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_published_port(mapping: &str) -> Option<u16> {
    mapping
        .rsplit_once(':')
        .and_then(|(_, port)| port.trim().parse().ok())
}
