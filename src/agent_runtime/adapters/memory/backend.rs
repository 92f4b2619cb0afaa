//! In-memory execution backend for orchestration and restart tests.

use crate::agent_runtime::{
    domain::{DeploymentKind, LogicalServer, ServerId},
    ports::{BackendError, BackendResult, BackendStatus, ExecutionBackend, StartedInstance},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// In-memory execution backend.
///
/// This adapter models instance liveness without spawning external
/// processes. Tests can kill instances, adopt pre-existing ones, and make
/// starts fail.
#[derive(Debug, Clone)]
pub struct InMemoryExecutionBackend {
    kind: DeploymentKind,
    state: Arc<RwLock<InMemoryBackendState>>,
}

#[derive(Debug, Default)]
struct InMemoryBackendState {
    instances: HashMap<ServerId, String>,
    dead: HashSet<ServerId>,
    failing_starts: usize,
    next_instance: u16,
    start_calls: usize,
    stop_calls: usize,
}

impl Default for InMemoryExecutionBackend {
    fn default() -> Self {
        Self::new(DeploymentKind::LocalProcess)
    }
}

impl InMemoryExecutionBackend {
    /// First port handed out to started instances.
    pub const BASE_PORT: u16 = 41000;

    /// Creates an empty backend reporting `kind`.
    #[must_use]
    pub fn new(kind: DeploymentKind) -> Self {
        Self {
            kind,
            state: Arc::default(),
        }
    }

    fn write(&self) -> BackendResult<std::sync::RwLockWriteGuard<'_, InMemoryBackendState>> {
        self.state
            .write()
            .map_err(|err| BackendError::runtime(std::io::Error::other(err.to_string())))
    }

    fn read(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, InMemoryBackendState>> {
        self.state
            .read()
            .map_err(|err| BackendError::runtime(std::io::Error::other(err.to_string())))
    }

    /// Makes the next `count` starts fail.
    ///
    /// # Errors
    ///
    /// Returns backend runtime errors when lock acquisition fails.
    pub fn fail_next_starts(&self, count: usize) -> BackendResult<()> {
        self.write()?.failing_starts = count;
        Ok(())
    }

    /// Simulates a crash: the instance stays tracked but reports not running.
    ///
    /// # Errors
    ///
    /// Returns backend runtime errors when lock acquisition fails.
    pub fn kill(&self, server_id: ServerId) -> BackendResult<()> {
        self.write()?.dead.insert(server_id);
        Ok(())
    }

    /// Registers a live instance that was not started through this backend.
    ///
    /// # Errors
    ///
    /// Returns backend runtime errors when lock acquisition fails.
    pub fn adopt(&self, server_id: ServerId, handle: impl Into<String>) -> BackendResult<()> {
        let mut state = self.write()?;
        state.dead.remove(&server_id);
        state.instances.insert(server_id, handle.into());
        Ok(())
    }

    /// Returns how many starts were attempted.
    ///
    /// # Errors
    ///
    /// Returns backend runtime errors when lock acquisition fails.
    pub fn start_calls(&self) -> BackendResult<usize> {
        Ok(self.read()?.start_calls)
    }

    /// Returns how many stops were requested.
    ///
    /// # Errors
    ///
    /// Returns backend runtime errors when lock acquisition fails.
    pub fn stop_calls(&self) -> BackendResult<usize> {
        Ok(self.read()?.stop_calls)
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryExecutionBackend {
    fn kind(&self) -> DeploymentKind {
        self.kind
    }

    async fn start(
        &self,
        server: &LogicalServer,
        port: Option<u16>,
    ) -> BackendResult<StartedInstance> {
        let server_id = server.id();
        let mut state = self.write()?;
        state.start_calls = state.start_calls.saturating_add(1);

        if let Some(handle) = state.instances.get(&server_id)
            && !state.dead.contains(&server_id)
        {
            return Err(BackendError::AlreadyRunning {
                server_id,
                handle: handle.clone(),
            });
        }

        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(BackendError::runtime(std::io::Error::other(
                "simulated start failure",
            )));
        }

        state.next_instance = state.next_instance.saturating_add(1);
        let handle = format!("mem-{}", state.next_instance);
        let resolved_port = port.unwrap_or_else(|| Self::BASE_PORT.saturating_add(state.next_instance));
        state.dead.remove(&server_id);
        state.instances.insert(server_id, handle.clone());

        Ok(StartedInstance {
            handle,
            host: "127.0.0.1".to_owned(),
            port: Some(resolved_port),
        })
    }

    async fn stop(&self, server_id: ServerId, handle: Option<&str>) -> BackendResult<()> {
        let mut state = self.write()?;
        state.stop_calls = state.stop_calls.saturating_add(1);
        state.dead.remove(&server_id);
        match (state.instances.remove(&server_id), handle) {
            (Some(_), _) | (None, Some(_)) => Ok(()),
            (None, None) => Err(BackendError::NotRunning(server_id)),
        }
    }

    async fn status(
        &self,
        server_id: ServerId,
        _handle: Option<&str>,
    ) -> BackendResult<BackendStatus> {
        let state = self.read()?;
        Ok(match state.instances.get(&server_id) {
            Some(handle) if !state.dead.contains(&server_id) => BackendStatus::running(handle),
            _ => BackendStatus::stopped(),
        })
    }

    async fn logs(&self, server_id: ServerId, tail: usize) -> BackendResult<String> {
        let state = self.read()?;
        let handle = state
            .instances
            .get(&server_id)
            .ok_or(BackendError::NotRunning(server_id))?;
        Ok(format!("{handle}: last {tail} lines"))
    }
}
