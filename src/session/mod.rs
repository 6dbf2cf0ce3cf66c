//! Controller side of a session.
//!
//! A [`Client`] owns one worker process for the length of a build step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │ Controller (host process)    │          │ Worker (lint-bridge worker)  │
//! │                              │  spawn   │                              │
//! │ Client ─────────────────────────────────▶ params file (bincode)        │
//! │  ├─ bootstrap Directory      │          │  ├─ Directory                │
//! │  │   ├─ bridge-callback ◀────── report ──┤  │   ├─ analyzer            │
//! │  │   └─ log-sink/<job> ◀──── log ────────┤  │   ├─ help                │
//! │  ├─ AnalyzerStub ───────────── calls ───▶│  │   └─ control             │
//! │  └─ HelpStub                 │          │  └─ Engine + executor        │
//! └──────────────────────────────┘          └──────────────────────────────┘
//! ```

mod client;
mod config;
mod launcher;
mod types;

pub use client::{Client, LOG_SINK_PREFIX};
pub use config::{ClientConfig, WorkerCommand, DEFAULT_HOST_VERSION};
pub use launcher::{
    launcher_registry, resolve_launcher, InheritLauncher, PipedLauncher, WorkerLauncher,
    HOST_DEPENDENCY, LAUNCHER_CAPABILITY,
};
pub use types::{SessionInfo, SessionStatus};
