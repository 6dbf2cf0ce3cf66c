//! Controller liveness checks used by the worker.
//!
//! A pid alone can be recycled once the controller is gone, so when the
//! controller's start time is known the probe also compares it.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How far two readings of a start time may drift and still match.
const START_TIME_TOLERANCE: Duration = Duration::from_secs(2);

/// Identity of a process that should stay alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// Process id.
    pub pid: u32,
    /// Start time, when the platform exposes it.
    pub started_at: Option<DateTime<Utc>>,
}

impl ProcessIdentity {
    /// The current process.
    pub fn current() -> Self {
        let pid = std::process::id();
        Self {
            pid,
            started_at: process_start_time(pid),
        }
    }

    /// Whether the process still runs and, when known, started at `started_at`.
    pub fn is_alive(&self) -> bool {
        if !is_process_running(self.pid) {
            return false;
        }
        match (self.started_at, process_start_time(self.pid)) {
            (Some(expected), Some(actual)) => {
                let drift = (actual - expected).num_milliseconds().unsigned_abs();
                drift <= START_TIME_TOLERANCE.as_millis() as u64
            }
            _ => true,
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the process exists.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    // EPERM means it exists but belongs to someone else.
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    errno == libc::EPERM
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Start time of `pid`, when the platform exposes it.
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name is parenthesized and may contain spaces.
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // starttime is field 22; after the command name it is the 20th.
    let ticks: u64 = after_comm.split_whitespace().nth(19)?.parse().ok()?;

    let boot = std::fs::read_to_string("/proc/stat").ok()?;
    let btime: i64 = boot
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;

    // SAFETY: sysconf has no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz <= 0 {
        return None;
    }
    let millis = btime * 1000 + (ticks as i64 * 1000) / hz as i64;
    DateTime::from_timestamp_millis(millis)
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_time(_pid: u32) -> Option<DateTime<Utc>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(ProcessIdentity::current().is_alive());
    }

    #[test]
    fn mismatched_start_time_is_not_alive() {
        let mut identity = ProcessIdentity::current();
        if identity.started_at.is_none() {
            return;
        }
        identity.started_at = DateTime::from_timestamp(0, 0);
        assert!(!identity.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let identity = ProcessIdentity {
            pid,
            started_at: None,
        };
        assert!(!identity.is_alive());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn start_time_is_in_the_past() {
        let started = process_start_time(std::process::id()).unwrap();
        assert!(started <= Utc::now() + chrono::Duration::seconds(2));
    }
}
