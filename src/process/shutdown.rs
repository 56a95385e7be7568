//! Process-group termination with graceful-then-forced escalation.
//!
//! The CLI is spawned as the leader of its own process group so the MCP
//! servers it launches are signalled with it.
//!
//! # Strategy
//! 1. Graceful: SIGTERM to the group (`taskkill /T` on Windows).
//! 2. If that cannot be delivered, force-kill immediately.
//! 3. Otherwise force-kill once the grace period elapses, unless the
//!    process exited first.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Ask the process group led by `pid` to exit.
///
/// Returns `true` when the request was delivered or the group is already
/// gone.
#[must_use]
pub fn request_graceful(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, Signal::SIGTERM)
    }

    #[cfg(windows)]
    {
        taskkill(pid, false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}

/// Kill the process group led by `pid` without waiting.
///
/// Returns `true` when the kill was delivered or the group is already gone.
pub fn force_kill(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        taskkill(pid, true)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}

/// Stop a running turn.
///
/// `kill` is the token watched by the task that owns the child: cancelling
/// it makes that task kill and reap the process. It is cancelled right away
/// when no graceful request could be delivered, and otherwise after `grace`
/// unless it was cancelled first.
pub fn terminate(pid: Option<u32>, kill: &CancellationToken, grace: Duration) {
    let delivered = pid.is_some_and(request_graceful);
    if !delivered {
        debug!(?pid, "graceful stop unavailable, killing directly");
        kill.cancel();
        return;
    }

    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        kill.cancel();
        return;
    };

    let kill = kill.clone();
    handle.spawn(async move {
        tokio::select! {
            () = kill.cancelled() => {}
            () = tokio::time::sleep(grace) => {
                info!(?pid, grace_ms = grace.as_millis(), "grace period elapsed, forcing kill");
                kill.cancel();
            }
        }
    });
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range for signalling");
        return false;
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            debug!(pid, ?signal, "process group already gone");
            true
        }
        Err(err) => {
            warn!(pid, ?signal, %err, "failed to signal process group");
            false
        }
    }
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> bool {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if force {
        cmd.arg("/F");
    }
    cmd.stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    match cmd.spawn() {
        Ok(_) => true,
        Err(err) => {
            warn!(pid, force, %err, "failed to run taskkill");
            false
        }
    }
}
