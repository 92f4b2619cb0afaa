//! Execution backend running each deployment as a bare local process.

use super::{
    LogBuffer, lock, read_raw_line,
    signal::{pid_alive, terminate_child, terminate_pid},
};
use crate::agent_runtime::{
    domain::{DeploymentKind, LogicalServer, ServerId},
    ports::{BackendError, BackendResult, BackendStatus, ExecutionBackend, StartedInstance},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::TcpListener;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

/// Tunables for [`LocalProcessBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProcessSettings {
    /// Host the spawned servers bind to.
    pub host: String,
    /// Retained output lines per process.
    pub log_capacity: usize,
    /// Grace period between SIGTERM and kill.
    pub stop_grace: Duration,
}

impl Default for LocalProcessSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            log_capacity: LogBuffer::DEFAULT_CAPACITY,
            stop_grace: Duration::from_secs(5),
        }
    }
}

struct ManagedProcess {
    pid: u32,
    child: Mutex<Option<Child>>,
    // Held so servers reading stdin do not see EOF.
    _stdin: Option<ChildStdin>,
}

impl ManagedProcess {
    fn is_alive(&self) -> bool {
        let mut child = lock(&self.child);
        child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }
}

type SharedLog = Arc<Mutex<LogBuffer>>;

#[derive(Default)]
struct LocalState {
    processes: HashMap<ServerId, Arc<ManagedProcess>>,
    logs: HashMap<ServerId, SharedLog>,
}

/// Spawns and supervises local processes.
#[derive(Default)]
pub struct LocalProcessBackend {
    settings: LocalProcessSettings,
    state: Mutex<LocalState>,
}

impl LocalProcessBackend {
    /// Creates a backend with the given settings.
    #[must_use]
    pub fn new(settings: LocalProcessSettings) -> Self {
        Self {
            settings,
            state: Mutex::default(),
        }
    }

    fn spawn_tracked(
        &self,
        server: &LogicalServer,
        port: u16,
    ) -> BackendResult<StartedInstance> {
        let server_id = server.id();
        let spec = server.config().transport.process_spec().ok_or_else(|| {
            BackendError::UnsupportedConfig {
                server_id,
                reason: format!(
                    "{} transport has no local process",
                    server.config().transport.kind()
                ),
            }
        })?;

        let mut state = lock(&self.state);
        if let Some(existing) = state.processes.get(&server_id) {
            if existing.is_alive() {
                return Err(BackendError::AlreadyRunning {
                    server_id,
                    handle: existing.pid.to_string(),
                });
            }
            debug!(server_id = %server_id, pid = existing.pid, "dropping dead process record");
            state.processes.remove(&server_id);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env("PORT", port.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(directory) = &spec.working_directory {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(BackendError::runtime)?;
        let pid = child.id().ok_or_else(|| {
            BackendError::runtime(std::io::Error::other("spawned process has no pid"))
        })?;

        let logs: SharedLog = Arc::new(Mutex::new(LogBuffer::new(self.settings.log_capacity)));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_output(stdout, Arc::clone(&logs), ""));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_output(stderr, Arc::clone(&logs), "[stderr] "));
        }
        let stdin = child.stdin.take();

        state.processes.insert(
            server_id,
            Arc::new(ManagedProcess {
                pid,
                child: Mutex::new(Some(child)),
                _stdin: stdin,
            }),
        );
        state.logs.insert(server_id, logs);
        info!(
            server_id = %server_id,
            server_name = %server.name(),
            pid,
            port,
            "started local process"
        );

        Ok(StartedInstance {
            handle: pid.to_string(),
            host: self.settings.host.clone(),
            port: Some(port),
        })
    }

    fn allocate_port(&self) -> BackendResult<u16> {
        let listener =
            TcpListener::bind((self.settings.host.as_str(), 0)).map_err(BackendError::runtime)?;
        let address = listener.local_addr().map_err(BackendError::runtime)?;
        Ok(address.port())
    }
}

#[async_trait]
impl ExecutionBackend for LocalProcessBackend {
    fn kind(&self) -> DeploymentKind {
        DeploymentKind::LocalProcess
    }

    async fn start(
        &self,
        server: &LogicalServer,
        port: Option<u16>,
    ) -> BackendResult<StartedInstance> {
        let resolved = port.map_or_else(|| self.allocate_port(), Ok)?;
        self.spawn_tracked(server, resolved)
    }

    async fn stop(&self, server_id: ServerId, handle: Option<&str>) -> BackendResult<()> {
        let tracked = lock(&self.state).processes.remove(&server_id);

        if let Some(process) = tracked {
            let child = lock(&process.child).take();
            if let Some(mut child) = child {
                let status = terminate_child(&mut child, self.settings.stop_grace)
                    .await
                    .map_err(BackendError::runtime)?;
                info!(server_id = %server_id, pid = process.pid, ?status, "stopped local process");
            }
            return Ok(());
        }

        match untracked_pid(handle) {
            Some(pid) if pid_alive(pid) => {
                if terminate_pid(pid, self.settings.stop_grace).await {
                    info!(server_id = %server_id, pid, "stopped untracked local process");
                    Ok(())
                } else {
                    warn!(server_id = %server_id, pid, "failed to signal untracked process");
                    Err(BackendError::NotRunning(server_id))
                }
            }
            _ => Err(BackendError::NotRunning(server_id)),
        }
    }

    async fn status(
        &self,
        server_id: ServerId,
        handle: Option<&str>,
    ) -> BackendResult<BackendStatus> {
        {
            let mut state = lock(&self.state);
            if let Some(process) = state.processes.get(&server_id) {
                if process.is_alive() {
                    return Ok(BackendStatus::running(process.pid.to_string()));
                }
                debug!(server_id = %server_id, pid = process.pid, "local process is gone");
                state.processes.remove(&server_id);
                return Ok(BackendStatus::stopped());
            }
        }

        Ok(untracked_pid(handle)
            .filter(|pid| pid_alive(*pid))
            .map_or_else(BackendStatus::stopped, |pid| {
                debug!(server_id = %server_id, pid, "untracked local process is alive");
                BackendStatus::running(pid.to_string())
            }))
    }

    async fn logs(&self, server_id: ServerId, tail: usize) -> BackendResult<String> {
        let logs = lock(&self.state).logs.get(&server_id).cloned();
        logs.map(|buffer| lock(&buffer).tail(tail))
            .ok_or(BackendError::NotRunning(server_id))
    }
}

fn untracked_pid(handle: Option<&str>) -> Option<u32> {
    handle.and_then(|value| value.parse().ok())
}

async fn capture_output(stream: impl AsyncRead + Unpin, logs: SharedLog, prefix: &'static str) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    while let Ok(true) = read_raw_line(&mut reader, &mut buffer).await {
        let line = String::from_utf8_lossy(&buffer);
        lock(&logs).push(format!("{prefix}{line}"));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agent_runtime::domain::{ServerConfig, ServerName, TransportConfig};
    use mockable::DefaultClock;

    fn shell_server(script: &str) -> LogicalServer {
        let transport = TransportConfig::Stdio(
            crate::agent_runtime::domain::StdioTransportConfig::new("sh")
                .expect("valid command")
                .with_args(["-c".to_owned(), script.to_owned()]),
        );
        LogicalServer::new(
            ServerName::new("shell").expect("valid name"),
            ServerConfig::new(transport),
            &DefaultClock,
        )
        .expect("valid server")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_rejects_second_live_instance() {
        let backend = LocalProcessBackend::default();
        let server = shell_server("sleep 30");

        let instance = backend.start(&server, None).await.expect("first start");
        let second = backend.start(&server, None).await;

        assert!(matches!(second, Err(BackendError::AlreadyRunning { .. })));
        assert!(instance.port.is_some());
        backend.stop(server.id(), None).await.expect("stop");
        assert!(!backend.status(server.id(), None).await.expect("status").running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn captures_output_and_port_variable() {
        let backend = LocalProcessBackend::default();
        let server = shell_server("echo listening on $PORT; echo oops >&2; sleep 30");

        backend.start(&server, Some(4312)).await.expect("start");
        let mut logs = String::new();
        for _ in 0..50 {
            logs = backend.logs(server.id(), 10).await.expect("logs");
            if logs.contains("oops") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(logs.contains("listening on 4312"));
        assert!(logs.contains("[stderr] oops"));
        backend.stop(server.id(), None).await.expect("stop");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exited_process_is_reported_stopped() {
        let backend = LocalProcessBackend::default();
        let server = shell_server("exit 0");

        backend.start(&server, Some(4313)).await.expect("start");
        let mut running = true;
        for _ in 0..50 {
            running = backend.status(server.id(), None).await.expect("status").running;
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!running);
        assert!(matches!(
            backend.stop(server.id(), None).await,
            Err(BackendError::NotRunning(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logs_survive_undecodable_output() {
        let backend = LocalProcessBackend::default();
        let server = shell_server("printf 'before\\n\\377\\nafter\\n'; sleep 30");

        backend.start(&server, Some(4314)).await.expect("start");
        let mut logs = String::new();
        for _ in 0..50 {
            logs = backend.logs(server.id(), 10).await.expect("logs");
            if logs.contains("after") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(logs.contains("before"));
        assert!(logs.contains('\u{FFFD}'));
        assert!(logs.contains("after"));
        backend.stop(server.id(), None).await.expect("stop");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_backend_sees_and_stops_untracked_process() {
        let first = LocalProcessBackend::default();
        let server = shell_server("sleep 30");
        let instance = first.start(&server, Some(4315)).await.expect("start");
        let handle = instance.handle.as_str();

        let second = LocalProcessBackend::new(LocalProcessSettings {
            stop_grace: Duration::from_secs(2),
            ..LocalProcessSettings::default()
        });
        let status = second
            .status(server.id(), Some(handle))
            .await
            .expect("status");
        assert!(status.running);
        assert_eq!(status.handle.as_deref(), Some(handle));
        assert!(!second.status(server.id(), None).await.expect("status").running);

        second
            .stop(server.id(), Some(handle))
            .await
            .expect("stop untracked");
        assert!(
            !second
                .status(server.id(), Some(handle))
                .await
                .expect("status")
                .running
        );
    }
}
