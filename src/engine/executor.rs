//! Version-gated strategies for running the engine over a file set.

use super::{ActiveRule, Engine};
use crate::directory::LogSink;
use crate::error::RemoteError;
use crate::log_once::warn_once;
use crate::model::{AnalyzeParams, Issue, LogEvent, LogLevel, SourceFile};
use crate::resolver::{Candidate, Registry, VersionRange};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Capability name of the executor registry.
pub const EXECUTOR_CAPABILITY: &str = "analysis executor";
/// Dependency key for the engine version.
pub const ENGINE_DEPENDENCY: &str = "engine";

/// Runs one analysis against an [`Engine`].
pub trait AnalysisExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        engine: &Engine,
        params: &AnalyzeParams,
        sink: &dyn LogSink,
    ) -> Result<Vec<Issue>, RemoteError>;
}

/// Executors keyed by engine major version.
pub fn executor_registry() -> Registry<Arc<dyn AnalysisExecutor>> {
    Registry::new(EXECUTOR_CAPABILITY)
        .register(
            Candidate::new("sequential", || Arc::new(SequentialExecutor) as Arc<dyn AnalysisExecutor>)
                .requires(ENGINE_DEPENDENCY, VersionRange::major(1)),
        )
        .register(
            Candidate::new("parallel", || Arc::new(ParallelExecutor) as Arc<dyn AnalysisExecutor>)
                .requires(
                    ENGINE_DEPENDENCY,
                    VersionRange::between(
                        crate::resolver::Version::new(2, 0, 0),
                        crate::resolver::Version::new(4, 0, 0),
                    ),
                ),
        )
}

fn emit(sink: &dyn LogSink, params: &AnalyzeParams, level: LogLevel, message: String) {
    sink.log(LogEvent::new(level, message).for_job(&params.job_id));
}

fn check_or_log(
    engine: &Engine,
    file: &SourceFile,
    rules: &[ActiveRule<'_>],
    sink: &dyn LogSink,
    params: &AnalyzeParams,
) -> Vec<Issue> {
    match engine.check_file(file, rules) {
        Ok(issues) => issues,
        Err(e) => {
            emit(
                sink,
                params,
                LogLevel::Warn,
                format!("Skipping {}: {}", file.relative_path.display(), e),
            );
            Vec::new()
        }
    }
}

/// One file at a time. Engine 1.x has no per-rule property overrides.
pub struct SequentialExecutor;

impl AnalysisExecutor for SequentialExecutor {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(
        &self,
        engine: &Engine,
        params: &AnalyzeParams,
        sink: &dyn LogSink,
    ) -> Result<Vec<Issue>, RemoteError> {
        if !params.rule_properties.is_empty() {
            warn_once(
                "sequential:rule-properties",
                "Per-rule property overrides need engine 2.0 or later and are ignored",
            );
            emit(
                sink,
                params,
                LogLevel::Warn,
                "Per-rule property overrides are ignored by this engine version".to_string(),
            );
        }
        let rules = engine.active_rules(params, false);
        let files = engine.select_files(params);
        emit(
            sink,
            params,
            LogLevel::Info,
            format!("Analyzing {} files with {} rules", files.len(), rules.len()),
        );

        let mut issues = Vec::new();
        for file in files {
            debug!(file = %file.relative_path.display(), "Analyzing file");
            issues.extend(check_or_log(engine, file, &rules, sink, params));
        }
        Ok(issues)
    }
}

/// Files checked in parallel on the rayon pool. Output order follows input
/// order.
pub struct ParallelExecutor;

impl AnalysisExecutor for ParallelExecutor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn execute(
        &self,
        engine: &Engine,
        params: &AnalyzeParams,
        sink: &dyn LogSink,
    ) -> Result<Vec<Issue>, RemoteError> {
        let rules = engine.active_rules(params, true);
        let files = engine.select_files(params);
        emit(
            sink,
            params,
            LogLevel::Info,
            format!("Analyzing {} files with {} rules", files.len(), rules.len()),
        );

        let results: Vec<_> = files
            .par_iter()
            .map(|file| engine.check_file(file, &rules))
            .collect();

        let mut issues = Vec::new();
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(found) => issues.extend(found),
                Err(e) => emit(
                    sink,
                    params,
                    LogLevel::Warn,
                    format!("Skipping {}: {}", file.relative_path.display(), e),
                ),
            }
        }
        debug!(files = files.len(), issues = issues.len(), "Parallel analysis done");
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::model::SourceFile;
    use crate::resolver::{parse_version, RuntimeVersions, Version};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogEvent>>);

    impl LogSink for Collect {
        fn log(&self, event: LogEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn engine(version: Version) -> Engine {
        Engine::with_version(version, BTreeSet::new(), BTreeSet::new())
    }

    fn resolve(version: &str) -> crate::error::Result<Arc<dyn AnalysisExecutor>> {
        executor_registry()
            .resolve(&RuntimeVersions::new().with(ENGINE_DEPENDENCY, parse_version(version).unwrap()))
    }

    fn fixture(dir: &std::path::Path, count: usize) -> Vec<SourceFile> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("f{i:02}.rs"));
                std::fs::write(&path, format!("fn f{i}() {{}} \n// TODO {i}\n")).unwrap();
                SourceFile::under_root(dir, path)
            })
            .collect()
    }

    #[test]
    fn executor_follows_engine_major_version() {
        assert_eq!(resolve("1.4").unwrap().name(), "sequential");
        assert_eq!(resolve("2.3.0").unwrap().name(), "parallel");
        assert_eq!(resolve("3.9").unwrap().name(), "parallel");
        assert!(matches!(
            resolve("4.0"),
            Err(BridgeError::NoCompatibleImplementation { .. })
        ));
    }

    #[test]
    fn executors_agree_on_findings() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), 67);
        let params = AnalyzeParams::new(dir.path(), ":app").with_files(files);
        let sink = Collect::default();

        let parallel = ParallelExecutor
            .execute(&engine(Version::new(2, 0, 0)), &params, &sink)
            .unwrap();
        let sequential = SequentialExecutor
            .execute(&engine(Version::new(1, 0, 0)), &params, &sink)
            .unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 2 * 67);
        assert_eq!(parallel[0].file, std::path::PathBuf::from("f00.rs"));
        assert_eq!(parallel.last().unwrap().file, std::path::PathBuf::from(format!("f{:02}.rs", 66)));
    }

    #[test]
    fn sequential_ignores_rule_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.rs");
        std::fs::write(&path, "x".repeat(50)).unwrap();
        let params = AnalyzeParams::new(dir.path(), ":app")
            .with_files([SourceFile::under_root(dir.path(), path)])
            .enable_rule("line-length")
            .with_rule_property("line-length", "max", "10");

        let sink = Collect::default();
        let issues = SequentialExecutor
            .execute(&engine(Version::new(1, 0, 0)), &params, &sink)
            .unwrap();
        assert!(issues.is_empty());
        assert!(sink
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == LogLevel::Warn));

        let issues = ParallelExecutor
            .execute(&engine(Version::new(2, 0, 0)), &params, &sink)
            .unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn unreadable_files_are_skipped_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let params = AnalyzeParams::new(dir.path(), ":app")
            .with_files([SourceFile::new(dir.path().join("missing.rs"), "missing.rs")]);
        let sink = Collect::default();
        let issues = ParallelExecutor
            .execute(&engine(Version::new(2, 0, 0)), &params, &sink)
            .unwrap();
        assert!(issues.is_empty());
        let events = sink.0.lock().unwrap();
        assert!(events.iter().any(|e| e.message.contains("missing.rs")));
        assert!(events.iter().all(|e| e.job_id.as_ref() == Some(&params.job_id)));
    }

    #[test]
    fn empty_analysis_yields_no_issues() {
        let params = AnalyzeParams::new("/repo", ":empty");
        let sink = Collect::default();
        assert!(ParallelExecutor
            .execute(&engine(Version::new(2, 0, 0)), &params, &sink)
            .unwrap()
            .is_empty());
    }
}
