//! Controller-side session configuration.

use crate::error::{BridgeError, Result};
use crate::handshake::HANDSHAKE_TIMEOUT;
use crate::model::Language;
use crate::resolver::Version;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Host tool version assumed when none is configured.
pub const DEFAULT_HOST_VERSION: Version = Version::new(8, 0, 0);

/// Program and leading arguments that start a worker. The params file path
/// is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the params file path.
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// This executable's `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| BridgeError::WorkerLocation(e.to_string()))?;
        Ok(Self::new(exe).arg("worker"))
    }

    /// Shell-like rendering for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration of one [`Client`](super::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Loopback address both processes bind to.
    pub bind_address: IpAddr,
    /// `None` runs this executable's `worker` subcommand.
    pub worker: Option<WorkerCommand>,
    /// Search path entries handed to the worker after its own directory.
    pub core_classpath: Vec<PathBuf>,
    /// Plugin artifacts the worker loads.
    pub plugins: BTreeSet<PathBuf>,
    /// Languages the worker analyzes; empty means all.
    pub languages: BTreeSet<Language>,
    /// Host tool version, used to pick the launcher.
    pub host_version: Version,
    /// How long `start` waits for the worker's report.
    pub handshake_timeout: Duration,
    /// Extra environment for the worker.
    pub env: Vec<(OsString, OsString)>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            worker: None,
            core_classpath: Vec::new(),
            plugins: BTreeSet::new(),
            languages: BTreeSet::new(),
            host_version: DEFAULT_HOST_VERSION,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_core_classpath(mut self, entries: impl IntoIterator<Item = PathBuf>) -> Self {
        self.core_classpath.extend(entries);
        self
    }

    pub fn with_plugins(mut self, plugins: impl IntoIterator<Item = PathBuf>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn with_languages(mut self, languages: impl IntoIterator<Item = Language>) -> Self {
        self.languages.extend(languages);
        self
    }

    pub fn with_host_version(mut self, version: Version) -> Self {
        self.host_version = version;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The configured worker, or this executable's `worker` subcommand.
    pub fn worker_command(&self) -> Result<WorkerCommand> {
        match &self.worker {
            Some(command) => Ok(command.clone()),
            None => WorkerCommand::current_exe(),
        }
    }

    /// The controller's executable directory followed by the core classpath,
    /// joined with the platform path separator.
    pub fn classpath(&self) -> Result<OsString> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .ok_or_else(|| {
                BridgeError::WorkerLocation("controller executable directory is unknown".into())
            })?;
        let entries = std::iter::once(exe_dir).chain(self.core_classpath.iter().cloned());
        std::env::join_paths(entries).map_err(|e| BridgeError::WorkerLocation(e.to_string()))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_loopback_and_current_exe() {
        let config = ClientConfig::new();
        assert!(config.bind_address.is_loopback());
        assert_eq!(config.handshake_timeout, HANDSHAKE_TIMEOUT);
        let command = config.worker_command().unwrap();
        assert_eq!(command.args, vec![OsString::from("worker")]);
    }

    #[test]
    fn classpath_starts_with_executable_directory() {
        let config = ClientConfig::new().with_core_classpath([PathBuf::from("/opt/core.jar")]);
        let classpath = config.classpath().unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&classpath).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            std::env::current_exe().unwrap().parent().unwrap()
        );
        assert_eq!(entries[1], PathBuf::from("/opt/core.jar"));
    }

    #[test]
    fn command_display_joins_parts() {
        let command = WorkerCommand::new("/bin/sh").arg("-c").arg("sleep 30");
        assert_eq!(command.display(), "/bin/sh -c sleep 30");
    }
}
