//! Two-phase endpoint discovery between controller and worker.
//!
//! The controller publishes a [`HandshakeGate`] in its bootstrap directory
//! and hands the bootstrap address to the worker. The worker binds its own
//! objects, then reports its directory address through the gate. Only one
//! report is accepted.

use crate::directory::{CallbackStub, DirectoryCallback, DirectoryClient};
use crate::error::{BridgeError, RemoteError, Result};
use crate::net::BridgeSocketFactory;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Name of the controller's callback in its bootstrap directory.
pub const CALLBACK_NAME: &str = "bridge-callback";
/// Name of the worker's analyzer.
pub const ANALYZER_NAME: &str = "analyzer";
/// Name of the worker's documentation object.
pub const HELP_NAME: &str = "help";
/// Name of the worker's lifecycle object.
pub const CONTROL_NAME: &str = "control";

/// How long the controller waits for the worker to report.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-use receiver of the worker's directory address.
pub struct HandshakeGate {
    sender: Mutex<Option<oneshot::Sender<SocketAddr>>>,
}

impl HandshakeGate {
    /// Gate plus the receiver that fires on the first report.
    pub fn new() -> (Self, oneshot::Receiver<SocketAddr>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl DirectoryCallback for HandshakeGate {
    async fn report_directory_address(&self, address: SocketAddr) -> Result<(), RemoteError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(sender) = sender else {
            warn!(address = %address, "Ignoring repeated directory report");
            return Err(RemoteError::illegal_state(
                "worker directory address was already reported",
            ));
        };
        debug!(address = %address, "Worker reported its directory");
        if sender.send(address).is_err() {
            return Err(RemoteError::illegal_state("controller stopped waiting"));
        }
        Ok(())
    }
}

/// Wait for the gate to fire, the worker to exit, or `timeout` to elapse.
///
/// On timeout a still-running worker is killed.
pub async fn await_report(
    gate: oneshot::Receiver<SocketAddr>,
    child: &mut Child,
    timeout: Duration,
    command: &str,
) -> Result<SocketAddr> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    tokio::select! {
        reported = gate => reported.map_err(|_| {
            BridgeError::IllegalState("handshake gate dropped before the worker reported".into())
        }),
        status = child.wait() => {
            let status = status?;
            warn!(command, status = %status, "Worker exited during handshake");
            Err(BridgeError::WorkerExited {
                command: command.to_string(),
                status,
            })
        }
        _ = &mut deadline => {
            warn!(command, timeout = ?timeout, "Worker handshake timed out, killing worker");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Worker was already gone");
            }
            Err(BridgeError::HandshakeTimeout(timeout))
        }
    }
}

/// Worker half: tell the controller where the worker directory lives.
pub async fn report_to_controller(
    bootstrap: SocketAddr,
    factory: BridgeSocketFactory,
    own_directory: SocketAddr,
) -> Result<()> {
    let callback = DirectoryClient::connect(bootstrap, factory)
        .lookup(CALLBACK_NAME)
        .await?;
    CallbackStub::new(callback)
        .report_directory_address(own_directory)
        .await?;
    info!(controller = %bootstrap, address = %own_directory, "Reported worker directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{create_registry_on_available_port, Servant};
    use crate::error::RemoteErrorKind;
    use std::net::{IpAddr, Ipv4Addr};
    use std::process::Stdio;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::process::Command;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn gate_accepts_exactly_one_report() {
        let (gate, rx) = HandshakeGate::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        gate.report_directory_address(addr).await.unwrap();
        let err = gate
            .report_directory_address("127.0.0.1:4001".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::IllegalState);
        assert_eq!(rx.await.unwrap(), addr);
    }

    #[tokio::test]
    async fn report_travels_through_the_bootstrap_directory() {
        let bootstrap = create_registry_on_available_port(loopback()).unwrap();
        let (gate, rx) = HandshakeGate::new();
        bootstrap
            .bind(CALLBACK_NAME, Servant::Callback(Arc::new(gate)))
            .unwrap();

        let worker = create_registry_on_available_port(loopback()).unwrap();
        report_to_controller(bootstrap.address(), bootstrap.factory(), worker.address())
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), worker.address());

        let second =
            report_to_controller(bootstrap.address(), bootstrap.factory(), worker.address()).await;
        assert!(matches!(second, Err(BridgeError::Remote(_))));

        worker.close().await.unwrap();
        bootstrap.close().await.unwrap();
    }

    #[tokio::test]
    async fn silent_worker_times_out_and_is_killed() {
        let (_gate, rx) = HandshakeGate::new();
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let err = await_report(rx, &mut child, timeout, "sh -c sleep")
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BridgeError::HandshakeTimeout(t) if t == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(3));
        // Killed and reaped.
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn exiting_worker_fails_fast() {
        let (_gate, rx) = HandshakeGate::new();
        let mut child = Command::new("sh")
            .args(["-c", "exit 3"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let started = Instant::now();
        let err = await_report(rx, &mut child, HANDSHAKE_TIMEOUT, "sh -c exit")
            .await
            .unwrap_err();
        assert!(started.elapsed() < HANDSHAKE_TIMEOUT);
        match err {
            BridgeError::WorkerExited { status, .. } => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
