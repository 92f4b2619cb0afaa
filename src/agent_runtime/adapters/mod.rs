//! Adapter implementations for the agent runtime ports.

mod command;
mod docker_compose;
mod local_process;
mod log_buffer;
pub mod memory;
mod process_pool;
mod signal;

pub use command::TokioCommandRunner;
pub use docker_compose::{
    COMPOSE_SERVICE, DockerComposeBackend, DockerComposeSettings, project_name, render_compose,
};
pub use local_process::{LocalProcessBackend, LocalProcessSettings};
pub use log_buffer::LogBuffer;
pub use process_pool::{PoolEntrySnapshot, PoolError, ProcessPool};

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Locks `mutex`, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads the next line into `buffer` as raw bytes, without the line
/// terminator. Returns `false` at end of stream.
pub(crate) async fn read_raw_line<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    if reader.read_until(b'\n', buffer).await? == 0 {
        return Ok(false);
    }
    while buffer.last().is_some_and(|byte| matches!(byte, b'\n' | b'\r')) {
        buffer.pop();
    }
    Ok(true)
}
