//! Pool of long-lived STDIO subprocesses multiplexing JSON-RPC calls.
//!
//! Each logical server has at most one live child. Requests are written as
//! single JSON lines to the child's stdin; a background task reads stdout
//! line by line and hands every response to the caller waiting on the same
//! JSON-RPC id. Calls for one server run concurrently over the same pipe and
//! may complete out of order. Lines that are not JSON, including ones that
//! are not valid UTF-8, are logged and skipped; only end of stream counts as
//! the process exiting.

use super::{lock, read_raw_line, signal::terminate_child};
use crate::agent_runtime::domain::{
    ServerId, StdioTransportConfig,
    jsonrpc::{JsonRpcRequest, response_id},
};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Errors returned by [`ProcessPool`] calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The subprocess could not be started.
    #[error("failed to spawn process for server {server_id}: {reason}")]
    Spawn {
        /// Server identifier.
        server_id: ServerId,
        /// Underlying error message.
        reason: String,
    },

    /// A call with the same id is still pending for the server.
    #[error("request id {id} is already pending for server {server_id}")]
    DuplicateRequestId {
        /// Server identifier.
        server_id: ServerId,
        /// Offending request id.
        id: String,
    },

    /// No matching response arrived in time; the process stays alive.
    #[error("request {id} to server {server_id} timed out after {timeout_ms} ms")]
    Timeout {
        /// Server identifier.
        server_id: ServerId,
        /// Request id.
        id: String,
        /// Applied timeout.
        timeout_ms: u64,
    },

    /// The pool entry was terminated while the call was pending.
    #[error("pool terminated for server {0}")]
    Terminated(ServerId),

    /// The subprocess exited while the call was pending.
    #[error("process exited for server {0}")]
    ProcessExited(ServerId),

    /// The request could not be written to the subprocess.
    #[error("failed to write request to server {server_id}: {reason}")]
    Write {
        /// Server identifier.
        server_id: ServerId,
        /// Underlying error message.
        reason: String,
    },

    /// The request could not be encoded.
    #[error("failed to encode request for server {server_id}: {reason}")]
    Encode {
        /// Server identifier.
        server_id: ServerId,
        /// Underlying error message.
        reason: String,
    },
}

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntrySnapshot {
    /// Server identifier.
    pub server_id: ServerId,
    /// Operating system process id.
    pub pid: Option<u32>,
    /// Calls awaiting a response.
    pub pending_calls: usize,
    /// Time since the last request was issued.
    pub idle: Duration,
}

type PendingSender = oneshot::Sender<Result<Value, PoolError>>;

#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Terminated,
    Exited,
}

impl CloseReason {
    const fn into_error(self, server_id: ServerId) -> PoolError {
        match self {
            Self::Terminated => PoolError::Terminated(server_id),
            Self::Exited => PoolError::ProcessExited(server_id),
        }
    }
}

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<String, PendingSender>,
    closed: Option<CloseReason>,
}

struct PoolEntry {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Mutex<PendingCalls>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
    last_used: Mutex<Instant>,
}

type EntryMap = Arc<Mutex<HashMap<ServerId, Arc<PoolEntry>>>>;

/// Owner of every STDIO subprocess, keyed by logical server.
pub struct ProcessPool {
    entries: EntryMap,
    stop_grace: Duration,
}

impl Default for ProcessPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STOP_GRACE)
    }
}

impl ProcessPool {
    /// Grace period between SIGTERM and kill.
    pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

    /// Creates an empty pool.
    #[must_use]
    pub fn new(stop_grace: Duration) -> Self {
        Self {
            entries: Arc::default(),
            stop_grace,
        }
    }

    /// Sends `request` to the server's subprocess and awaits the response
    /// carrying the same id.
    ///
    /// Spawns the subprocess on first use. A timeout rejects only this call.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] on spawn failure, duplicate pending id, write
    /// failure, timeout, termination, or process exit.
    pub async fn send_request(
        &self,
        server_id: ServerId,
        config: &StdioTransportConfig,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> Result<Value, PoolError> {
        let mut line = serde_json::to_vec(request).map_err(|err| PoolError::Encode {
            server_id,
            reason: err.to_string(),
        })?;
        line.push(b'\n');

        let entry = self.entry_for(server_id, config)?;
        let key = request.id().correlation_key();
        let receiver = entry.register(server_id, &key, &request.id().to_string())?;
        entry.touch();

        if let Err(err) = entry.write_line(&line).await {
            entry.forget(&key);
            return Err(PoolError::Write {
                server_id,
                reason: err.to_string(),
            });
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::ProcessExited(server_id)),
            Err(_) => {
                entry.forget(&key);
                warn!(
                    server_id = %server_id,
                    request_id = %request.id(),
                    "stdio call timed out"
                );
                Err(PoolError::Timeout {
                    server_id,
                    id: request.id().to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Spawns the server's subprocess unless one is already live.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] when the process cannot be started.
    pub fn ensure_started(
        &self,
        server_id: ServerId,
        config: &StdioTransportConfig,
    ) -> Result<(), PoolError> {
        self.entry_for(server_id, config).map(|_| ())
    }

    /// Returns whether a subprocess is live for the server.
    #[must_use]
    pub fn is_running(&self, server_id: ServerId) -> bool {
        lock(&self.entries).contains_key(&server_id)
    }

    /// Returns the pid of the server's subprocess.
    #[must_use]
    pub fn pid(&self, server_id: ServerId) -> Option<u32> {
        lock(&self.entries).get(&server_id).and_then(|entry| entry.pid)
    }

    /// Returns the servers with a live subprocess.
    #[must_use]
    pub fn active_servers(&self) -> Vec<ServerId> {
        lock(&self.entries).keys().copied().collect()
    }

    /// Returns a snapshot of every entry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PoolEntrySnapshot> {
        let entries: Vec<(ServerId, Arc<PoolEntry>)> = lock(&self.entries)
            .iter()
            .map(|(server_id, entry)| (*server_id, Arc::clone(entry)))
            .collect();

        entries
            .into_iter()
            .map(|(server_id, entry)| PoolEntrySnapshot {
                server_id,
                pid: entry.pid,
                pending_calls: lock(&entry.pending).calls.len(),
                idle: lock(&entry.last_used).elapsed(),
            })
            .collect()
    }

    /// Terminates the server's subprocess and rejects its pending calls.
    ///
    /// Returns `false` when no subprocess was live.
    pub async fn terminate(&self, server_id: ServerId) -> bool {
        let removed = lock(&self.entries).remove(&server_id);
        let Some(entry) = removed else {
            return false;
        };

        entry.shut_down(server_id);
        entry.wait_exited().await;
        info!(server_id = %server_id, "stdio process terminated");
        true
    }

    /// Terminates every subprocess; used at graceful shutdown.
    pub async fn terminate_all(&self) {
        let drained: Vec<(ServerId, Arc<PoolEntry>)> = lock(&self.entries).drain().collect();
        for (server_id, entry) in &drained {
            entry.shut_down(*server_id);
        }
        for (_, entry) in &drained {
            entry.wait_exited().await;
        }
        info!(count = drained.len(), "all stdio processes terminated");
    }

    fn entry_for(
        &self,
        server_id: ServerId,
        config: &StdioTransportConfig,
    ) -> Result<Arc<PoolEntry>, PoolError> {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(&server_id) {
            return Ok(Arc::clone(entry));
        }

        let entry = self.spawn(server_id, config)?;
        entries.insert(server_id, Arc::clone(&entry));
        Ok(entry)
    }

    fn spawn(
        &self,
        server_id: ServerId,
        config: &StdioTransportConfig,
    ) -> Result<Arc<PoolEntry>, PoolError> {
        let mut command = Command::new(config.command());
        command
            .args(config.args())
            .envs(config.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = config.working_directory() {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(|err| PoolError::Spawn {
            server_id,
            reason: err.to_string(),
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(PoolError::Spawn {
                server_id,
                reason: "child stdio pipes unavailable".to_owned(),
            });
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let entry = Arc::new(PoolEntry {
            pid: child.id(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending: Mutex::default(),
            kill: Mutex::new(Some(kill_tx)),
            exited: exited_rx,
            last_used: Mutex::new(Instant::now()),
        });
        info!(
            server_id = %server_id,
            pid = ?entry.pid,
            command = config.command(),
            "spawned stdio process"
        );

        tokio::spawn(forward_stderr(server_id, stderr));
        tokio::spawn(drive(DriveContext {
            entries: Arc::clone(&self.entries),
            server_id,
            entry: Arc::clone(&entry),
            child,
            stdout,
            kill_rx,
            exited_tx,
            grace: self.stop_grace,
        }));
        Ok(entry)
    }
}

impl PoolEntry {
    fn register(
        &self,
        server_id: ServerId,
        key: &str,
        display_id: &str,
    ) -> Result<oneshot::Receiver<Result<Value, PoolError>>, PoolError> {
        let mut pending = lock(&self.pending);
        if let Some(reason) = pending.closed {
            return Err(reason.into_error(server_id));
        }
        if pending.calls.contains_key(key) {
            return Err(PoolError::DuplicateRequestId {
                server_id,
                id: display_id.to_owned(),
            });
        }

        let (sender, receiver) = oneshot::channel();
        pending.calls.insert(key.to_owned(), sender);
        Ok(receiver)
    }

    fn forget(&self, key: &str) {
        lock(&self.pending).calls.remove(key);
    }

    fn touch(&self) {
        *lock(&self.last_used) = Instant::now();
    }

    async fn write_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line).await?;
        stdin.flush().await
    }

    fn deliver(&self, server_id: ServerId, line: &[u8]) {
        if line.trim_ascii().is_empty() {
            return;
        }

        let response: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "discarding non-JSON stdout line");
                return;
            }
        };
        let Some(id) = response_id(&response) else {
            warn!(server_id = %server_id, "discarding response without a usable id");
            return;
        };

        let sender = lock(&self.pending).calls.remove(&id.correlation_key());
        match sender {
            Some(sender) => {
                if sender.send(Ok(response)).is_err() {
                    debug!(server_id = %server_id, request_id = %id, "caller stopped waiting");
                }
            }
            None => {
                warn!(server_id = %server_id, request_id = %id, "discarding unmatched response");
            }
        }
    }

    fn close(&self, server_id: ServerId, reason: CloseReason) {
        let drained: Vec<PendingSender> = {
            let mut pending = lock(&self.pending);
            pending.closed = Some(reason);
            pending.calls.drain().map(|(_, sender)| sender).collect()
        };

        if !drained.is_empty() {
            debug!(server_id = %server_id, count = drained.len(), "rejecting pending calls");
        }
        for sender in drained {
            if sender.send(Err(reason.into_error(server_id))).is_err() {
                debug!(server_id = %server_id, "caller stopped waiting before rejection");
            }
        }
    }

    fn shut_down(&self, server_id: ServerId) {
        self.close(server_id, CloseReason::Terminated);
        let trigger = lock(&self.kill).take();
        if let Some(trigger) = trigger
            && trigger.send(()).is_err()
        {
            debug!(server_id = %server_id, "stdio process already gone");
        }
    }

    async fn wait_exited(&self) {
        let mut exited = self.exited.clone();
        let outcome = exited.wait_for(|done| *done).await.map(|_| ());
        if outcome.is_err() {
            debug!("stdio driver ended without reporting exit");
        }
    }
}

struct DriveContext {
    entries: EntryMap,
    server_id: ServerId,
    entry: Arc<PoolEntry>,
    child: Child,
    stdout: ChildStdout,
    kill_rx: oneshot::Receiver<()>,
    exited_tx: watch::Sender<bool>,
    grace: Duration,
}

async fn drive(context: DriveContext) {
    let DriveContext {
        entries,
        server_id,
        entry,
        mut child,
        stdout,
        mut kill_rx,
        exited_tx,
        grace,
    } = context;
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();

    let terminated = loop {
        tokio::select! {
            read = read_raw_line(&mut reader, &mut line) => match read {
                Ok(true) => entry.deliver(server_id, &line),
                Ok(false) => break false,
                Err(err) => {
                    warn!(server_id = %server_id, error = %err, "stdout read failed");
                    break false;
                }
            },
            _ = &mut kill_rx => break true,
        }
    };

    if !terminated {
        warn!(server_id = %server_id, pid = ?entry.pid, "stdio process exited");
        entry.close(server_id, CloseReason::Exited);
        remove_if_current(&entries, server_id, &entry);
    }

    match terminate_child(&mut child, grace).await {
        Ok(status) => debug!(server_id = %server_id, status = ?status, "stdio process reaped"),
        Err(err) => warn!(server_id = %server_id, error = %err, "failed to reap stdio process"),
    }
    exited_tx.send_modify(|done| *done = true);
}

fn remove_if_current(entries: &EntryMap, server_id: ServerId, entry: &Arc<PoolEntry>) {
    let mut map = lock(entries);
    if map
        .get(&server_id)
        .is_some_and(|current| Arc::ptr_eq(current, entry))
    {
        map.remove(&server_id);
    }
}

async fn forward_stderr(server_id: ServerId, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    while let Ok(true) = read_raw_line(&mut reader, &mut line).await {
        debug!(
            server_id = %server_id,
            line = %String::from_utf8_lossy(&line),
            "stdio process stderr"
        );
    }
}
