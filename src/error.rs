//! Error types for the controller/worker bridge.
//!
//! `BridgeError` is what every library operation returns. `RemoteError` is the
//! serializable form that crosses the wire inside a reply frame and comes back
//! to the caller wrapped in `BridgeError::Remote`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Result with [`BridgeError`] as the default error.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Errors surfaced by the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Address {0} is not a loopback address")]
    NotLoopback(IpAddr),

    #[error("Unable to bind a directory after {attempts} attempts")]
    BridgeSetup { attempts: usize },

    #[error("Lookup of '{name}' at {address} failed: {reason}")]
    DirectoryLookup {
        name: String,
        address: SocketAddr,
        reason: String,
    },

    #[error("Worker did not report its directory within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Failed to launch worker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker `{command}` exited before the handshake completed ({status})")]
    WorkerExited { command: String, status: ExitStatus },

    #[error("Unable to determine the worker executable location: {0}")]
    WorkerLocation(String),

    #[error("No implementation of {capability} is compatible with {versions}")]
    NoCompatibleImplementation {
        capability: String,
        versions: String,
    },

    #[error("Several implementations of {capability} match {versions}: {}", .candidates.join(", "))]
    AmbiguousImplementation {
        capability: String,
        versions: String,
        candidates: Vec<String>,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Remote call failed: {0}")]
    Remote(RemoteError),

    #[error("Malformed frame: {0}")]
    Codec(String),

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Cleanup failed: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True when the error comes from a port being taken by someone else.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, BridgeError::Io(e) if e.kind() == std::io::ErrorKind::AddrInUse)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Codec(e.to_string())
    }
}

impl From<bincode::Error> for BridgeError {
    fn from(e: bincode::Error) -> Self {
        BridgeError::Codec(e.to_string())
    }
}

impl From<RemoteError> for BridgeError {
    fn from(e: RemoteError) -> Self {
        BridgeError::Remote(e)
    }
}

/// Category of a failure raised on the far side of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The target name is not bound in the directory.
    NotBound,
    /// The bound object does not implement the requested operation.
    UnsupportedOperation,
    /// The call was valid but the object refused it in its current state.
    IllegalState,
    /// The operation itself failed.
    Failed,
}

/// Error carried back to the caller in a reply frame.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    /// Category the caller can match on.
    pub kind: RemoteErrorKind,
    /// Message from the side that failed.
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A [`RemoteErrorKind::Failed`] error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Failed, message)
    }

    /// A [`RemoteErrorKind::IllegalState`] error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::IllegalState, message)
    }
}

impl From<BridgeError> for RemoteError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Remote(inner) => inner,
            BridgeError::IllegalState(msg) => RemoteError::illegal_state(msg),
            other => RemoteError::failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_in_use_is_detected() {
        let err = BridgeError::Io(std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert!(err.is_addr_in_use());
        let err = BridgeError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!err.is_addr_in_use());
    }

    #[test]
    fn messages_carry_diagnostics() {
        let err = BridgeError::BridgeSetup { attempts: 25 };
        assert!(err.to_string().contains("25"));
        let err = BridgeError::HandshakeTimeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
        let err = BridgeError::Cleanup(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Cleanup failed: a; b");
    }

    #[test]
    fn remote_errors_unwrap_when_converted_back() {
        let remote = RemoteError::failed("boom");
        let bridged: BridgeError = remote.clone().into();
        assert_eq!(RemoteError::from(bridged), remote);
        let state: RemoteError = BridgeError::IllegalState("twice".into()).into();
        assert_eq!(state.kind, RemoteErrorKind::IllegalState);
    }
}
