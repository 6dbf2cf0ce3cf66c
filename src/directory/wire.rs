//! Messages exchanged with a directory over one connection.

use super::RemoteRef;
use crate::error::RemoteError;
use crate::model::{AnalyzeParams, Documentation, Issue, LogEvent};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A request frame. `Call` gets exactly one reply, `Notify` none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Lookup { name: String },
    Call { target: String, call: Call },
    Notify { target: String, call: Call },
}

/// Operations of the bound objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Call {
    Analyze {
        params: AnalyzeParams,
        log_sink: Option<RemoteRef>,
    },
    CollectRulesDocumentation,
    CollectPropertiesDocumentation,
    ReportDirectoryAddress { address: SocketAddr },
    Log { event: LogEvent },
    Release,
}

impl Call {
    /// Operation name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::CollectRulesDocumentation => "collect_rules_documentation",
            Self::CollectPropertiesDocumentation => "collect_properties_documentation",
            Self::ReportDirectoryAddress { .. } => "report_directory_address",
            Self::Log { .. } => "log",
            Self::Release => "release",
        }
    }
}

/// Successful reply payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Bound { reference: RemoteRef },
    Issues { issues: Vec<Issue> },
    Documentation { documentation: Documentation },
    Done,
}

/// Reply frame.
pub type Reply = Result<Payload, RemoteError>;
