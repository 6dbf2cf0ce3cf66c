//! Worker process entry point.
//!
//! Started by the controller as `lint-bridge worker <params file>`. The
//! worker binds its objects, reports its directory through the handshake and
//! then serves calls until the controller releases it or goes away.

mod analyzer;

pub use analyzer::{EngineAnalyzer, EngineHelp, TracingLogSink, WorkerControl};

use crate::directory::{create_registry_on_available_port, Servant};
use crate::engine::executor::{executor_registry, AnalysisExecutor, ENGINE_DEPENDENCY};
use crate::engine::Engine;
use crate::error::Result;
use crate::handshake::{self, ANALYZER_NAME, CONTROL_NAME, HELP_NAME};
use crate::liveness::ProcessIdentity;
use crate::model::ServerParams;
use crate::net::BridgeSocketFactory;
use crate::resolver::{Resolved, RuntimeVersions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Search path handed down by the controller.
pub const CLASSPATH_ENV: &str = "LINT_BRIDGE_CLASSPATH";

/// How often the worker checks that its controller is still alive.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);

static EXECUTOR: Resolved<Arc<dyn AnalysisExecutor>> = Resolved::new();

/// Why the worker stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The controller sent the release notification.
    Released,
    /// The controller process exited or its pid was reused.
    ControllerGone,
}

/// Run the worker until released. Errors before the handshake completes
/// are startup failures.
pub async fn run(params_path: &Path) -> Result<()> {
    let params = ServerParams::read_from(params_path)?;
    info!(
        controller_pid = params.controller_pid,
        bootstrap = %params.bootstrap_address,
        plugins = params.plugin_paths.len(),
        "Worker starting"
    );
    if let Ok(classpath) = std::env::var(CLASSPATH_ENV) {
        debug!(classpath = %classpath, "Worker search path");
    }

    let engine = Arc::new(Engine::new(
        params.languages.clone(),
        params.plugin_paths.clone(),
    ));
    let versions = RuntimeVersions::new().with(ENGINE_DEPENDENCY, engine.version().clone());
    let executor = EXECUTOR
        .get_or_resolve(&executor_registry(), &versions)?
        .clone();

    let factory = BridgeSocketFactory::new(params.bind_address)?;
    let directory = create_registry_on_available_port(params.bind_address)?;
    let (control, released) = WorkerControl::new();
    directory.bind(
        ANALYZER_NAME,
        Servant::Analyzer(Arc::new(EngineAnalyzer::new(engine.clone(), executor))),
    )?;
    directory.bind(HELP_NAME, Servant::Help(Arc::new(EngineHelp::new(&engine))))?;
    directory.bind(CONTROL_NAME, Servant::Control(Arc::new(control)))?;

    if let Err(e) =
        handshake::report_to_controller(params.bootstrap_address, factory, directory.address())
            .await
    {
        if let Err(close) = directory.close().await {
            warn!(error = %close, "Failed to close worker directory");
        }
        return Err(e);
    }

    let controller = ProcessIdentity {
        pid: params.controller_pid,
        started_at: params.controller_started_at,
    };
    let reason = wait_for_shutdown(released, controller, LIVENESS_INTERVAL).await;
    info!(reason = ?reason, "Worker shutting down");
    directory.close().await
}

/// Wait until `released` is cancelled or `controller` stops being alive.
pub async fn wait_for_shutdown(
    released: CancellationToken,
    controller: ProcessIdentity,
    interval: Duration,
) -> ShutdownReason {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = released.cancelled() => return ShutdownReason::Released,
            _ = ticker.tick() => {
                if !controller.is_alive() {
                    warn!(pid = controller.pid, "Controller is gone");
                    return ShutdownReason::ControllerGone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::SessionControl;

    #[tokio::test]
    async fn release_ends_the_wait() {
        let (control, released) = WorkerControl::new();
        let waiter = tokio::spawn(wait_for_shutdown(
            released,
            ProcessIdentity::current(),
            Duration::from_millis(50),
        ));
        tokio::time::sleep(Duration::from_millis(120)).await;
        control.release();
        let reason = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Released);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_controller_ends_the_wait() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let (_control, released) = WorkerControl::new();
        let controller = ProcessIdentity {
            pid,
            started_at: None,
        };
        let reason = tokio::time::timeout(
            Duration::from_secs(2),
            wait_for_shutdown(released, controller, Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert_eq!(reason, ShutdownReason::ControllerGone);
    }
}
