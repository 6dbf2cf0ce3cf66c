//! End-to-end sessions against the real `lint-bridge worker` binary.

use lint_bridge::engine::ENGINE_VERSION_ENV;
use lint_bridge::session::{Client, ClientConfig, SessionStatus, WorkerCommand};
use lint_bridge::{AnalyzeParams, BridgeError, LogEvent, LogLevel, LogSink, SourceFile};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn config() -> ClientConfig {
    ClientConfig::new()
        .with_worker(WorkerCommand::new(env!("CARGO_BIN_EXE_lint-bridge")).arg("worker"))
        .with_handshake_timeout(Duration::from_secs(20))
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<LogEvent>>,
}

impl LogSink for Recorder {
    fn log(&self, event: LogEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only probes.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn empty_analysis_and_release() {
    let client = Client::new(config());
    client.start().await.unwrap();
    assert_eq!(client.status(), SessionStatus::Ready);
    let info = client.info();
    assert!(info.worker_address.is_some());
    assert_ne!(info.worker_address, info.bootstrap_address);

    let issues = client
        .analyze(AnalyzeParams::new("/nonexistent", ":empty"), None)
        .await
        .unwrap();
    assert!(issues.is_empty());

    let pid = client.worker_pid().unwrap();
    client.stop().await.unwrap();
    assert_eq!(client.status(), SessionStatus::Stopped);
    assert!(
        wait_for_exit(pid, Duration::from_secs(10)).await,
        "worker should exit after release"
    );
}

#[tokio::test]
async fn analysis_streams_logs_to_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.rs");
    std::fs::write(&path, "fn main() {} \n\t// TODO tidy\n").unwrap();

    let client = Client::new(config());
    client.start().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let params = AnalyzeParams::new(dir.path(), ":lib")
        .with_files([SourceFile::under_root(dir.path(), &path)]);
    let job_id = params.job_id.clone();
    let mut issues = client
        .analyze(params, Some(recorder.clone() as Arc<dyn LogSink>))
        .await
        .unwrap();
    issues.sort_by(|a, b| (a.line, &a.rule_key).cmp(&(b.line, &b.rule_key)));

    let keys: Vec<_> = issues.iter().map(|i| i.rule_key.as_str()).collect();
    assert_eq!(keys, vec!["trailing-whitespace", "tab-indentation", "todo-comment"]);

    let events = recorder.events.lock().unwrap().clone();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.job_id.as_ref() == Some(&job_id)));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn documentation_comes_from_the_worker() {
    let client = Client::new(config());
    client.start().await.unwrap();

    let rules = client.collect_rules_documentation().await.unwrap();
    assert!(rules.get("line-length").is_some());
    let properties = client.collect_properties_documentation().await.unwrap();
    assert_eq!(
        properties
            .get("line-length.max")
            .and_then(|e| e.default_value.as_deref()),
        Some("120")
    );
    assert!(rules.render().contains("Line too long"));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn old_engine_ignores_rule_overrides() {
    let client = Client::new(config().with_env(ENGINE_VERSION_ENV, "1.5"));
    client.start().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.py");
    std::fs::write(&path, "x = 1\n").unwrap();
    let recorder = Arc::new(Recorder::default());
    let params = AnalyzeParams::new(dir.path(), ":py")
        .with_files([SourceFile::under_root(dir.path(), &path)])
        .enable_rule("line-length")
        .with_rule_property("line-length", "max", "2");
    let issues = client
        .analyze(params, Some(recorder.clone() as Arc<dyn LogSink>))
        .await
        .unwrap();
    assert!(issues.is_empty());
    assert!(recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.level == LogLevel::Warn));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn unsupported_engine_fails_startup() {
    let client = Client::new(config().with_env(ENGINE_VERSION_ENV, "9.0"));
    let started = Instant::now();
    let err = client.start().await.unwrap_err();
    match err {
        BridgeError::WorkerExited { status, .. } => assert_eq!(status.code(), Some(1)),
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(client.status(), SessionStatus::Failed);
}

#[tokio::test]
async fn concurrent_sessions_and_stops() {
    let first = Arc::new(Client::new(config()));
    let second = Arc::new(Client::new(config()));
    let (a, b) = tokio::join!(first.start(), second.start());
    a.unwrap();
    b.unwrap();
    assert_ne!(first.info().bootstrap_address, second.info().bootstrap_address);
    assert_ne!(first.info().worker_address, second.info().worker_address);

    let also_first = first.clone();
    let (x, y, z) = tokio::join!(first.stop(), also_first.stop(), second.stop());
    assert!(x.is_ok() && y.is_ok() && z.is_ok());
    assert!(first.stop().await.is_ok());
    assert!(matches!(
        first.analyze(AnalyzeParams::new("/repo", ":app"), None).await,
        Err(BridgeError::IllegalState(_))
    ));
}

#[tokio::test]
async fn reused_job_id_does_not_steal_a_published_sink() {
    let client = Client::new(config());
    client.start().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.rs");
    std::fs::write(&path, "fn main() {} \n").unwrap();
    let params = AnalyzeParams::new(dir.path(), ":lib")
        .with_files([SourceFile::under_root(dir.path(), &path)]);

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let (a, b) = tokio::join!(
        client.analyze(params.clone(), Some(first.clone() as Arc<dyn LogSink>)),
        client.analyze(params.clone(), Some(second.clone() as Arc<dyn LogSink>)),
    );
    assert_eq!(a.unwrap().len(), 1);
    assert!(matches!(b, Err(BridgeError::IllegalState(_))));
    assert!(!first.events.lock().unwrap().is_empty());
    assert!(second.events.lock().unwrap().is_empty());

    // Once the first call has finished the job id is free again.
    let again = client
        .analyze(params, Some(second.clone() as Arc<dyn LogSink>))
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert!(!second.events.lock().unwrap().is_empty());

    client.stop().await.unwrap();
}
