//! Graceful termination of child processes: SIGTERM, grace period, kill.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::debug;

/// Terminates `child`, escalating to a kill once `grace` elapses.
///
/// Returns the exit status when the child could be reaped.
pub(crate) async fn terminate_child(
    child: &mut Child,
    grace: Duration,
) -> io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }

    if send_sigterm(child.id()) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.map(Some);
        }
        debug!(pid = ?child.id(), "grace period elapsed; killing child");
    }

    child.kill().await?;
    child.wait().await.map(Some)
}

/// Terminates a process known only by pid, for instances spawned by an
/// earlier supervisor run.
pub(crate) async fn terminate_pid(pid: u32, grace: Duration) -> bool {
    if !send_sigterm(Some(pid)) {
        return false;
    }

    let poll = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(poll).await;
    }

    send_sigkill(pid)
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|value| i32::try_from(value).ok()) else {
        return false;
    };
    kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok()
}

#[cfg(unix)]
fn send_sigkill(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), Signal::SIGKILL).is_ok())
}

/// Returns whether a process with `pid` exists and has not exited.
///
/// An exited child of this supervisor is reaped here so that it does not
/// linger as a zombie that still answers signals.
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let target = Pid::from_raw(raw);
    if matches!(
        waitpid(target, Some(WaitPidFlag::WNOHANG)),
        Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..))
    ) {
        return false;
    }
    kill(target, None).is_ok()
}

#[cfg(not(unix))]
const fn send_sigterm(_pid: Option<u32>) -> bool {
    false
}

#[cfg(not(unix))]
const fn send_sigkill(_pid: u32) -> bool {
    false
}

/// Returns whether a process with `pid` exists and has not exited.
#[cfg(not(unix))]
pub(crate) const fn pid_alive(_pid: u32) -> bool {
    false
}
