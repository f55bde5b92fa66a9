//! OS process helpers shared by sessions and tunnels.
//!
//! Children spawned by the relay lead their own process group, so signals
//! go to the whole group and reach grandchildren (dev servers, shells).

use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Signals the relay sends to child process groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Hangup,
}

#[cfg(unix)]
impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Hangup => libc::SIGHUP,
        }
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// Falls back to the single process when the group is gone. Returns
/// whether anything was signalled.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(-pid, signal.raw()) == 0 || libc::kill(pid, signal.raw()) == 0 }
}

#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: Signal) -> bool {
    false
}

/// Send `signal` to one process only.
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    pid > 0 && unsafe { libc::kill(pid, signal.raw()) } == 0
}

#[cfg(not(unix))]
pub fn signal_process(_pid: u32, _signal: Signal) -> bool {
    false
}

/// Check whether a process with `pid` exists.
///
/// `kill(pid, 0)` succeeds for live processes we may signal; EPERM means
/// the process exists under another user.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the permission and existence check only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// Check that `pid` is still a terminal-attached session leader, i.e. the
/// shape of a process the relay launched inside a PTY.
#[cfg(target_os = "linux")]
pub fn is_pty_session_leader(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    parse_stat_leader(&stat, pid)
}

#[cfg(not(target_os = "linux"))]
pub fn is_pty_session_leader(_pid: u32) -> bool {
    false
}

/// Parse `/proc/<pid>/stat`: the fields after the parenthesised command
/// name are state, ppid, pgrp, session, tty_nr.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_leader(stat: &str, pid: u32) -> bool {
    let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
        return false;
    };
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 5 || fields[0] == "Z" {
        return false;
    }
    let session = fields[3].parse::<u32>().ok();
    let tty = fields[4].parse::<i64>().unwrap_or(0);
    session == Some(pid) && tty != 0
}

/// Stop a tokio child: SIGTERM to its group, wait up to `grace`, then SIGKILL.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    match child.id() {
        Some(pid) => {
            signal_group(pid, Signal::Term);
        }
        None => return,
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "child exited after SIGTERM"),
        Ok(Err(e)) => warn!("failed to wait for child: {}", e),
        Err(_) => {
            if let Some(pid) = child.id() {
                signal_group(pid, Signal::Kill);
            }
            if let Err(e) = child.kill().await {
                debug!("kill after grace period: {}", e);
            }
        }
    }
}
