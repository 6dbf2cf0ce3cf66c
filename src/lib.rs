//! Process-isolation bridge between a build tool and a lint engine.
//!
//! The controller side lives in the host process and drives one short-lived
//! worker process that hosts the analysis engine. The two sides find each
//! other through a handshake over loopback-only directories, exchange typed
//! calls over length-prefixed JSON frames, and stream log events back to the
//! controller.
//!
//! # Architecture
//!
//! - **Session** (`session::Client`): spawns the worker, completes the
//!   handshake, forwards `analyze` and documentation calls, tears down.
//!
//! - **Worker** (`worker::run`): entry point of `lint-bridge worker <file>`.
//!   Resolves the engine executor for the engine version it finds, exports
//!   its objects and idles until released or orphaned.
//!
//! - **Directory** (`directory`): name to remote-object registry on one
//!   socket, plus the stubs that call objects in the other process.
//!
//! - **Resolver** (`resolver`): picks the one registered implementation
//!   compatible with the dependency versions present at runtime.
//!
//! # Remote objects
//!
//! ## Worker directory
//! - `analyzer`: `analyze(params, log_sink)`
//! - `help`: `collect_rules_documentation`, `collect_properties_documentation`
//! - `control`: `release` (one-way)
//!
//! ## Controller bootstrap directory
//! - `bridge-callback`: `report_directory_address(address)`
//! - `log-sink/<job id>`: `log(event)` (one-way)

pub mod cleanup;
pub mod directory;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod liveness;
pub mod log_once;
pub mod model;
pub mod net;
pub mod resolver;
pub mod session;
pub mod worker;

pub use directory::{LogSink, RemoteRef};
pub use error::{BridgeError, RemoteError, RemoteErrorKind, Result};
pub use model::{
    AnalyzeParams, DocEntry, Documentation, DocumentationKind, Issue, JobId, Language, LogEvent,
    LogLevel, ServerParams, Severity, SourceFile,
};
pub use net::{get_available_port, BridgeSocketFactory};
pub use resolver::{parse_version, Version, VersionRange};
pub use session::{Client, ClientConfig, SessionInfo, SessionStatus, WorkerCommand};
