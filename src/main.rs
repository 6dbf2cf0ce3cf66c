//! lint-bridge command line.
//!
//! `lint-bridge worker <params file>` is the worker process the controller
//! spawns. The other subcommands act as a controller and drive one session
//! end to end.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lint_bridge::model::{AnalyzeParams, Language, SourceFile};
use lint_bridge::resolver::parse_version;
use lint_bridge::session::{Client, ClientConfig};
use lint_bridge::worker::{self, TracingLogSink};
use lint_bridge::{Documentation, LogSink};
use std::future::Future;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

/// Directories never descended into when collecting files.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "build"];

#[derive(Parser)]
#[command(name = "lint-bridge", version, about = "Run a lint engine in an isolated worker process")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Worker process entry point (spawned by the controller)
    Worker(WorkerArgs),
    /// Analyze a source tree and print issues as JSON
    Analyze(AnalyzeArgs),
    /// Print rule documentation
    Rules(DocArgs),
    /// Print property documentation
    Properties(DocArgs),
}

#[derive(Args)]
struct WorkerArgs {
    /// Path to the serialized server parameters
    params: PathBuf,
}

#[derive(Args, Clone)]
struct SessionArgs {
    /// Loopback address both processes bind to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,
    /// Host tool version used to pick the worker launcher
    #[arg(long)]
    host_version: Option<String>,
    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    handshake_timeout_ms: u64,
    /// Extra classpath entries for the worker
    #[arg(long = "classpath", value_delimiter = ',')]
    classpath: Vec<PathBuf>,
    /// Plugin artifacts loaded by the worker
    #[arg(long = "plugin")]
    plugins: Vec<PathBuf>,
    /// Languages the worker is started for (default: all)
    #[arg(long = "language", value_delimiter = ',')]
    languages: Vec<Language>,
}

#[derive(Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Repository root
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Module identifier reported with the analysis
    #[arg(long, default_value = ":")]
    module: String,
    /// Files to analyze (default: every recognized file under the root)
    files: Vec<PathBuf>,
    /// Only run these rules
    #[arg(long = "enable", value_delimiter = ',')]
    enabled: Vec<String>,
    /// Never run these rules
    #[arg(long = "disable", value_delimiter = ',')]
    disabled: Vec<String>,
    /// Engine property, as key=value
    #[arg(long = "property")]
    properties: Vec<String>,
    /// Per-rule property, as rule.key=value
    #[arg(long = "rule-property")]
    rule_properties: Vec<String>,
}

#[derive(Args)]
struct DocArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lint_bridge=info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Command::Worker(args) => {
            if let Err(e) = rt.block_on(worker::run(&args.params)) {
                error!(error = %e, "Worker failed");
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Analyze(args) => rt.block_on(run_analyze(args)),
        Command::Rules(args) => rt.block_on(run_docs(args, DocKind::Rules)),
        Command::Properties(args) => rt.block_on(run_docs(args, DocKind::Properties)),
    }
}

fn client_config(args: &SessionArgs) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::new()
        .with_bind_address(args.bind)
        .with_handshake_timeout(Duration::from_millis(args.handshake_timeout_ms))
        .with_core_classpath(args.classpath.iter().cloned())
        .with_plugins(args.plugins.iter().cloned())
        .with_languages(args.languages.iter().copied());
    if let Some(raw) = args.host_version.as_deref() {
        config = config.with_host_version(parse_version(raw)?);
    }
    Ok(config)
}

/// Run `body` against a started session and always stop it afterwards.
/// A shutdown signal stops the session early.
async fn with_session<T, F, Fut>(args: &SessionArgs, body: F) -> anyhow::Result<T>
where
    F: FnOnce(Arc<Client>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let client = Arc::new(Client::new(client_config(args)?));
    client.start().await?;
    info!(worker_pid = ?client.worker_pid(), "Session started");

    let result = tokio::select! {
        result = body(client.clone()) => result,
        signal = wait_for_shutdown_signal() => {
            signal?;
            warn!("Shutdown signal received, stopping session");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    if let Err(e) = client.stop().await {
        warn!(error = %e, "Session teardown reported failures");
    }
    result
}

async fn run_analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("invalid root {}", args.root.display()))?;
    let paths = if args.files.is_empty() {
        collect_files(&root)?
    } else {
        args.files.iter().map(|p| root.join(p)).collect()
    };

    let mut params = AnalyzeParams::new(&root, args.module.clone())
        .with_files(paths.into_iter().map(|p| SourceFile::under_root(&root, p)))
        .with_languages(args.session.languages.iter().copied());
    for rule in &args.enabled {
        params = params.enable_rule(rule.clone());
    }
    for rule in &args.disabled {
        params = params.disable_rule(rule.clone());
    }
    for raw in &args.properties {
        let (key, value) = split_assignment(raw)?;
        params = params.with_property(key, value);
    }
    for raw in &args.rule_properties {
        let (qualified, value) = split_assignment(raw)?;
        let (rule, key) = qualified
            .split_once('.')
            .with_context(|| format!("expected rule.key=value, got '{raw}'"))?;
        params = params.with_rule_property(rule, key, value);
    }

    let issues = with_session(&args.session, |client| async move {
        let sink: Arc<dyn LogSink> = Arc::new(TracingLogSink);
        Ok(client.analyze(params, Some(sink)).await?)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&issues)?);
    Ok(())
}

enum DocKind {
    Rules,
    Properties,
}

async fn run_docs(args: DocArgs, kind: DocKind) -> anyhow::Result<()> {
    let doc: Documentation = with_session(&args.session, |client| async move {
        Ok(match kind {
            DocKind::Rules => client.collect_rules_documentation().await?,
            DocKind::Properties => client.collect_properties_documentation().await?,
        })
    })
    .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", doc.render());
    }
    Ok(())
}

fn split_assignment(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .with_context(|| format!("expected key=value, got '{raw}'"))
}

/// Files under `root` with a recognized language, sorted. Hidden entries
/// and [`SKIPPED_DIRS`] are not descended into.
fn collect_files(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
    });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if entry.file_type().is_file() && Language::of_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
