//! Controller-side session façade.

use super::config::ClientConfig;
use super::launcher::resolve_launcher;
use super::types::{SessionInfo, SessionStatus};
use crate::cleanup::ReleaseStack;
use crate::directory::{
    create_registry_on_available_port, AnalyzerStub, ControlStub, Directory, DirectoryClient,
    HelpStub, LogSink, Servant,
};
use crate::error::{BridgeError, Result};
use crate::handshake::{
    self, HandshakeGate, ANALYZER_NAME, CALLBACK_NAME, CONTROL_NAME, HELP_NAME,
};
use crate::liveness::ProcessIdentity;
use crate::model::{AnalyzeParams, Documentation, Issue, ServerParams};
use crate::worker::CLASSPATH_ENV;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Prefix of the per-job log sink names in the bootstrap directory.
pub const LOG_SINK_PREFIX: &str = "log-sink/";

struct Remote {
    bootstrap: Arc<Directory>,
    analyzer: AnalyzerStub,
    help: HelpStub,
}

struct State {
    info: SessionInfo,
    remote: Option<Remote>,
    releases: ReleaseStack,
}

/// One controller/worker session.
///
/// `start` spawns the worker and completes the handshake. Remote calls are
/// valid while the session is ready. `stop` releases everything the session
/// acquired; it can run concurrently with other callers and more than once.
pub struct Client {
    config: ClientConfig,
    state: Mutex<State>,
}

impl Client {
    /// A session in the `Created` state. Nothing is spawned until `start`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                info: SessionInfo::new(),
                remote: None,
                releases: ReleaseStack::new(),
            }),
        }
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.lock().info.status
    }

    /// Pid of the spawned worker, once it has been spawned.
    pub fn worker_pid(&self) -> Option<u32> {
        self.lock().info.worker_pid
    }

    /// Snapshot of the session's status, addresses and last error.
    pub fn info(&self) -> SessionInfo {
        self.lock().info.clone()
    }

    /// Spawn the worker and wait for its directory report.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.info.status != SessionStatus::Created {
                return Err(BridgeError::IllegalState(format!(
                    "session cannot start while {}",
                    state.info.status
                )));
            }
            state.info.status = SessionStatus::Starting;
        }

        let mut releases = ReleaseStack::new();
        match self.launch(&mut releases).await {
            Ok(remote) => {
                let aborted = {
                    let mut state = self.lock();
                    if state.info.status == SessionStatus::Starting {
                        state.info.status = SessionStatus::Ready;
                        state.info.ready_at = Some(Utc::now());
                        state.remote = Some(remote);
                        state.releases = releases.take();
                        info!(
                            worker_pid = ?state.info.worker_pid,
                            worker = ?state.info.worker_address,
                            "Session ready"
                        );
                        false
                    } else {
                        true
                    }
                };
                if aborted {
                    warn!("Session stopped while starting, releasing");
                    if let Err(e) = releases.release_all().await {
                        warn!(error = %e, "Release after aborted start failed");
                    }
                    return Err(BridgeError::IllegalState(
                        "session was stopped during start".into(),
                    ));
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Session startup failed");
                if let Err(cleanup) = releases.release_all().await {
                    warn!(error = %cleanup, "Release after failed start failed");
                }
                let mut state = self.lock();
                if state.info.status == SessionStatus::Starting {
                    state.info.set_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn launch(&self, releases: &mut ReleaseStack) -> Result<Remote> {
        let launcher = resolve_launcher(&self.config.host_version)?;
        let worker = self.config.worker_command()?;
        let classpath = self.config.classpath()?;

        let params_file = tempfile::Builder::new()
            .prefix("lint-bridge-params-")
            .suffix(".bin")
            .tempfile()?
            .into_temp_path();
        let params_path = params_file.to_path_buf();
        releases.push("delete params file", move || {
            if let Err(e) = params_file.close() {
                debug!(error = %e, "Params file already gone");
            }
            Ok(())
        });

        let bootstrap = Arc::new(create_registry_on_available_port(self.config.bind_address)?);
        {
            let bootstrap = bootstrap.clone();
            releases.push_async("close bootstrap directory", move || async move {
                bootstrap.close().await
            });
        }
        let (gate, reported) = HandshakeGate::new();
        bootstrap.bind(CALLBACK_NAME, Servant::Callback(Arc::new(gate)))?;

        let controller = ProcessIdentity::current();
        let server_params = ServerParams {
            bind_address: self.config.bind_address,
            controller_pid: controller.pid,
            controller_started_at: controller.started_at,
            bootstrap_address: bootstrap.address(),
            plugin_paths: self.config.plugins.clone(),
            languages: self.config.languages.clone(),
        };
        server_params.write_to(&params_path)?;

        let command_line = format!("{} {}", worker.display(), params_path.display());
        let mut command = Command::new(&worker.program);
        command
            .args(&worker.args)
            .arg(&params_path)
            .env(CLASSPATH_ENV, &classpath)
            .envs(self.config.env.iter().map(|(k, v)| (k, v)));
        launcher.configure(&mut command);

        info!(command = %command_line, launcher = launcher.name(), "Spawning worker");
        let mut child = command.spawn().map_err(|source| BridgeError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id();
        {
            let mut state = self.lock();
            state.info.worker_pid = pid;
            state.info.bootstrap_address = Some(bootstrap.address());
        }
        launcher.attach(&mut child);

        let worker_address = handshake::await_report(
            reported,
            &mut child,
            self.config.handshake_timeout,
            &command_line,
        )
        .await?;

        // The worker outlives `stop`; reap it whenever it exits.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(pid = ?pid, status = %status, "Worker exited"),
                Err(e) => debug!(pid = ?pid, error = %e, "Failed to wait for worker"),
            }
        });

        let directory = DirectoryClient::connect(worker_address, bootstrap.factory());
        let control = ControlStub::new(directory.lookup(CONTROL_NAME).await?);
        releases.push_async("release worker", move || async move {
            if let Err(e) = control.release().await {
                debug!(error = %e, "Worker did not take the release notification");
            }
            Ok(())
        });
        let analyzer = AnalyzerStub::new(directory.lookup(ANALYZER_NAME).await?);
        let help = HelpStub::new(directory.lookup(HELP_NAME).await?);

        self.lock().info.worker_address = Some(worker_address);
        Ok(Remote {
            bootstrap,
            analyzer,
            help,
        })
    }

    fn remote<T>(&self, pick: impl FnOnce(&Remote) -> T) -> Result<T> {
        let state = self.lock();
        match (&state.remote, state.info.status) {
            (Some(remote), SessionStatus::Ready) => Ok(pick(remote)),
            (_, status) => Err(BridgeError::IllegalState(format!(
                "session is {status}, not ready"
            ))),
        }
    }

    /// Run an analysis in the worker. Log events go to `log_sink` while the
    /// call is in flight.
    ///
    /// The sink is published under the job id, so a job id whose sink is
    /// still published by another call is rejected.
    pub async fn analyze(
        &self,
        params: AnalyzeParams,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Result<Vec<Issue>> {
        let (analyzer, bootstrap) = self.remote(|r| (r.analyzer.clone(), r.bootstrap.clone()))?;
        let job_id = params.job_id.clone();
        let sink_name = format!("{LOG_SINK_PREFIX}{job_id}");

        let sink = match log_sink {
            Some(sink) => Some(bootstrap.bind_new(&sink_name, Servant::LogSink(sink))?),
            None => None,
        };
        let published = sink.is_some();

        debug!(job_id = %job_id, files = params.files.len(), "Sending analysis");
        let result = analyzer.analyze(params, sink).await;
        if published {
            bootstrap.unbind(&sink_name);
        }
        match &result {
            Ok(issues) => debug!(job_id = %job_id, issues = issues.len(), "Analysis returned"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Analysis failed"),
        }
        result
    }

    /// Documentation of every rule the worker's engine knows.
    pub async fn collect_rules_documentation(&self) -> Result<Documentation> {
        let help = self.remote(|r| r.help.clone())?;
        help.collect_rules_documentation().await
    }

    /// Documentation of every engine and rule property.
    pub async fn collect_properties_documentation(&self) -> Result<Documentation> {
        let help = self.remote(|r| r.help.clone())?;
        help.collect_properties_documentation().await
    }

    /// Release the worker, close the bootstrap directory, delete the params
    /// file. The worker process is not killed.
    pub async fn stop(&self) -> Result<()> {
        let releases = {
            let mut state = self.lock();
            if state.info.status == SessionStatus::Stopped {
                return Ok(());
            }
            state.info.status = SessionStatus::Stopped;
            state.remote = None;
            state.releases.take()
        };
        info!(steps = releases.len(), "Stopping session");
        releases.release_all().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if !state.releases.is_empty() {
            debug!(status = %state.info.status, "Client dropped without stop");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("info", &self.info()).finish()
    }
}
