//! Objects the worker exports in its directory.

use crate::directory::{Analyzer, Help, LogSink, SessionControl};
use crate::engine::executor::AnalysisExecutor;
use crate::engine::Engine;
use crate::error::RemoteError;
use crate::model::{AnalyzeParams, Documentation, Issue, LogEvent, LogLevel};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Runs analyses on the engine with the resolved executor.
pub struct EngineAnalyzer {
    engine: Arc<Engine>,
    executor: Arc<dyn AnalysisExecutor>,
}

impl EngineAnalyzer {
    /// Analyzer over `engine`, running jobs with `executor`.
    pub fn new(engine: Arc<Engine>, executor: Arc<dyn AnalysisExecutor>) -> Self {
        Self { engine, executor }
    }
}

#[async_trait]
impl Analyzer for EngineAnalyzer {
    async fn analyze(
        &self,
        params: AnalyzeParams,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Result<Vec<Issue>, RemoteError> {
        let engine = self.engine.clone();
        let executor = self.executor.clone();
        let sink: Arc<dyn LogSink> = log_sink.unwrap_or_else(|| Arc::new(TracingLogSink));
        info!(
            job_id = %params.job_id,
            module = %params.module_id,
            files = params.files.len(),
            executor = executor.name(),
            "Starting analysis"
        );

        let job_id = params.job_id.clone();
        let issues = tokio::task::spawn_blocking(move || {
            executor.execute(&engine, &params, sink.as_ref())
        })
        .await
        .map_err(|e| RemoteError::failed(format!("analysis task failed: {e}")))??;

        info!(job_id = %job_id, issues = issues.len(), "Analysis finished");
        Ok(issues)
    }
}

/// Writes events to this process's log. Used when the caller sent no sink.
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, event: LogEvent) {
        let job = event.job_id.as_ref().map(|j| j.as_str()).unwrap_or("-");
        match event.level {
            LogLevel::Trace => trace!(job_id = job, "{}", event.message),
            LogLevel::Debug => debug!(job_id = job, "{}", event.message),
            LogLevel::Info => info!(job_id = job, "{}", event.message),
            LogLevel::Warn => warn!(job_id = job, "{}", event.message),
            LogLevel::Error => error!(job_id = job, "{}", event.message),
        }
    }
}

/// Documentation assembled once from the engine.
pub struct EngineHelp {
    rules: Documentation,
    properties: Documentation,
}

impl EngineHelp {
    /// Render both documentation sets from `engine`.
    pub fn new(engine: &Engine) -> Self {
        Self {
            rules: engine.rules_documentation(),
            properties: engine.properties_documentation(),
        }
    }
}

#[async_trait]
impl Help for EngineHelp {
    async fn collect_rules_documentation(&self) -> Result<Documentation, RemoteError> {
        Ok(self.rules.clone())
    }

    async fn collect_properties_documentation(&self) -> Result<Documentation, RemoteError> {
        Ok(self.properties.clone())
    }
}

/// Signals the worker loop when the controller releases the session.
pub struct WorkerControl {
    released: CancellationToken,
}

impl WorkerControl {
    /// Control object plus the token the worker loop waits on.
    pub fn new() -> (Self, CancellationToken) {
        let released = CancellationToken::new();
        (
            Self {
                released: released.clone(),
            },
            released,
        )
    }
}

impl SessionControl for WorkerControl {
    fn release(&self) {
        info!("Controller released the worker");
        self.released.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ParallelExecutor;
    use crate::engine::BUILTIN_ENGINE_VERSION;
    use crate::model::SourceFile;
    use std::collections::BTreeSet;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::with_version(
            BUILTIN_ENGINE_VERSION,
            BTreeSet::new(),
            BTreeSet::new(),
        ))
    }

    #[tokio::test]
    async fn analyzes_without_a_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rs");
        std::fs::write(&path, "\tfn main() {}\n").unwrap();
        let analyzer = EngineAnalyzer::new(engine(), Arc::new(ParallelExecutor));
        let params = AnalyzeParams::new(dir.path(), ":app")
            .with_files([SourceFile::under_root(dir.path(), path)]);
        let issues = analyzer.analyze(params, None).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule_key, "tab-indentation");
    }

    #[tokio::test]
    async fn help_serves_cached_documentation() {
        let help = EngineHelp::new(&engine());
        let rules = help.collect_rules_documentation().await.unwrap();
        let again = help.collect_rules_documentation().await.unwrap();
        assert_eq!(rules, again);
        assert!(!help
            .collect_properties_documentation()
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn release_cancels_the_token() {
        let (control, released) = WorkerControl::new();
        assert!(!released.is_cancelled());
        control.release();
        control.release();
        assert!(released.is_cancelled());
    }
}
