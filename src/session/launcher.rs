//! Host-version specific ways of launching the worker process.

use crate::error::Result;
use crate::resolver::{Candidate, Registry, Resolved, RuntimeVersions, Version, VersionRange};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Capability name of the launcher registry.
pub const LAUNCHER_CAPABILITY: &str = "worker launcher";
/// Dependency key for the host tool version.
pub const HOST_DEPENDENCY: &str = "host";

static LAUNCHER: Resolved<Arc<dyn WorkerLauncher>> = Resolved::new();

/// Sets up the worker's stdio and attaches to it after spawn.
pub trait WorkerLauncher: Send + Sync {
    fn name(&self) -> &'static str;

    fn configure(&self, command: &mut Command);

    fn attach(&self, child: &mut Child);
}

/// Launchers keyed by host tool version.
pub fn launcher_registry() -> Registry<Arc<dyn WorkerLauncher>> {
    Registry::new(LAUNCHER_CAPABILITY)
        .register(
            Candidate::new("inherit", || Arc::new(InheritLauncher) as Arc<dyn WorkerLauncher>)
                .requires(HOST_DEPENDENCY, VersionRange::below(Version::new(7, 0, 0))),
        )
        .register(
            Candidate::new("piped", || Arc::new(PipedLauncher) as Arc<dyn WorkerLauncher>)
                .requires(HOST_DEPENDENCY, VersionRange::at_least(Version::new(7, 0, 0))),
        )
}

/// Launcher for this process, resolved on first use.
pub fn resolve_launcher(host_version: &Version) -> Result<Arc<dyn WorkerLauncher>> {
    let versions = RuntimeVersions::new().with(HOST_DEPENDENCY, host_version.clone());
    Ok(LAUNCHER.get_or_resolve(&launcher_registry(), &versions)?.clone())
}

/// Worker shares the controller's stderr.
pub struct InheritLauncher;

impl WorkerLauncher for InheritLauncher {
    fn name(&self) -> &'static str {
        "inherit"
    }

    fn configure(&self, command: &mut Command) {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
    }

    fn attach(&self, _child: &mut Child) {}
}

/// Worker stderr is read line by line into the controller's log.
pub struct PipedLauncher;

impl WorkerLauncher for PipedLauncher {
    fn name(&self) -> &'static str {
        "piped"
    }

    fn configure(&self, command: &mut Command) {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
    }

    fn attach(&self, child: &mut Child) {
        let Some(stderr) = child.stderr.take() else {
            return;
        };
        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => info!(worker_pid = ?pid, "{}", line),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Worker stderr closed");
                        break;
                    }
                }
            }
        });
    }
}
