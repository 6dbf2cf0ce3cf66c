//! Session status and info types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Client built, no worker yet.
    Created,
    /// Worker spawned, waiting for its directory report.
    Starting,
    /// Session is ready for remote calls.
    Ready,
    /// Startup failed; the session cannot be used.
    Failed,
    /// Session has been torn down.
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Created => write!(f, "created"),
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of a session (serializable for CLI output).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Current status of the session.
    pub status: SessionStatus,
    /// Process ID of the worker, once spawned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,
    /// Controller bootstrap directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_address: Option<SocketAddr>,
    /// Directory reported by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_address: Option<SocketAddr>,
    /// When the session became ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    /// Error message if status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Created,
            worker_pid: None,
            bootstrap_address: None,
            worker_address: None,
            ready_at: None,
            error: None,
        }
    }

    /// Set the error message and update status to Failed.
    pub fn set_error(&mut self, error: String) {
        self.error = Some(error);
        self.status = SessionStatus::Failed;
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}
