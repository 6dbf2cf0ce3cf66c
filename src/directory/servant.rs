//! Remote-callable objects and the stubs that call them.
//!
//! Each interface is a trait implemented on the serving side and a stub that
//! turns the same operations into frames on the calling side.

use super::log_sink::LogSinkProxy;
use super::wire::{Call, Payload};
use super::RemoteRef;
use crate::error::{BridgeError, RemoteError, RemoteErrorKind, Result};
use crate::model::{AnalyzeParams, Documentation, Issue, LogEvent};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// Runs analyses. Bound by the worker.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        params: AnalyzeParams,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Result<Vec<Issue>, RemoteError>;
}

/// Serves rule and property documentation. Bound by the worker.
#[async_trait]
pub trait Help: Send + Sync {
    async fn collect_rules_documentation(&self) -> Result<Documentation, RemoteError>;
    async fn collect_properties_documentation(&self) -> Result<Documentation, RemoteError>;
}

/// Receives the worker's directory address. Bound by the controller.
#[async_trait]
pub trait DirectoryCallback: Send + Sync {
    async fn report_directory_address(&self, address: SocketAddr) -> Result<(), RemoteError>;
}

/// Receives log lines. Delivery is one-way and must not block.
pub trait LogSink: Send + Sync {
    fn log(&self, event: LogEvent);
}

/// Session lifecycle hooks the controller triggers on the worker.
pub trait SessionControl: Send + Sync {
    /// The controller dropped its last reference to the worker.
    fn release(&self);
}

/// An object exported in a directory.
#[derive(Clone)]
pub enum Servant {
    Analyzer(Arc<dyn Analyzer>),
    Help(Arc<dyn Help>),
    Callback(Arc<dyn DirectoryCallback>),
    LogSink(Arc<dyn LogSink>),
    Control(Arc<dyn SessionControl>),
}

impl Servant {
    /// Short name of the servant's interface, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Analyzer(_) => "analyzer",
            Self::Help(_) => "help",
            Self::Callback(_) => "callback",
            Self::LogSink(_) => "log_sink",
            Self::Control(_) => "control",
        }
    }

    /// Invoke `call` on this object.
    pub(crate) async fn dispatch(&self, call: Call) -> Result<Payload, RemoteError> {
        match (self, call) {
            (Self::Analyzer(analyzer), Call::Analyze { params, log_sink }) => {
                let proxy = log_sink.map(|remote| Arc::new(LogSinkProxy::spawn(remote)));
                let sink = proxy.clone().map(|p| p as Arc<dyn LogSink>);
                let result = analyzer.analyze(params, sink).await;
                if let Some(proxy) = proxy {
                    proxy.flush().await;
                }
                Ok(Payload::Issues { issues: result? })
            }
            (Self::Help(help), Call::CollectRulesDocumentation) => Ok(Payload::Documentation {
                documentation: help.collect_rules_documentation().await?,
            }),
            (Self::Help(help), Call::CollectPropertiesDocumentation) => Ok(Payload::Documentation {
                documentation: help.collect_properties_documentation().await?,
            }),
            (Self::Callback(callback), Call::ReportDirectoryAddress { address }) => {
                callback.report_directory_address(address).await?;
                Ok(Payload::Done)
            }
            (Self::LogSink(sink), Call::Log { event }) => {
                sink.log(event);
                Ok(Payload::Done)
            }
            (Self::Control(control), Call::Release) => {
                control.release();
                Ok(Payload::Done)
            }
            (servant, call) => Err(RemoteError::new(
                RemoteErrorKind::UnsupportedOperation,
                format!("{} does not support {}", servant.kind(), call.name()),
            )),
        }
    }
}

fn unexpected(operation: &str, payload: Payload) -> BridgeError {
    BridgeError::Codec(format!("unexpected reply to {operation}: {payload:?}"))
}

/// Calls an [`Analyzer`] in another process.
#[derive(Debug, Clone)]
pub struct AnalyzerStub {
    remote: RemoteRef,
}

impl AnalyzerStub {
    pub fn new(remote: RemoteRef) -> Self {
        Self { remote }
    }

    pub async fn analyze(
        &self,
        params: AnalyzeParams,
        log_sink: Option<RemoteRef>,
    ) -> Result<Vec<Issue>> {
        match self.remote.call(Call::Analyze { params, log_sink }).await? {
            Payload::Issues { issues } => Ok(issues),
            other => Err(unexpected("analyze", other)),
        }
    }
}

/// Calls a [`Help`] object in another process.
#[derive(Debug, Clone)]
pub struct HelpStub {
    remote: RemoteRef,
}

impl HelpStub {
    pub fn new(remote: RemoteRef) -> Self {
        Self { remote }
    }

    pub async fn collect_rules_documentation(&self) -> Result<Documentation> {
        self.documentation(Call::CollectRulesDocumentation).await
    }

    pub async fn collect_properties_documentation(&self) -> Result<Documentation> {
        self.documentation(Call::CollectPropertiesDocumentation).await
    }

    async fn documentation(&self, call: Call) -> Result<Documentation> {
        let operation = call.name();
        match self.remote.call(call).await? {
            Payload::Documentation { documentation } => Ok(documentation),
            other => Err(unexpected(operation, other)),
        }
    }
}

/// Calls the controller's [`DirectoryCallback`].
#[derive(Debug, Clone)]
pub struct CallbackStub {
    remote: RemoteRef,
}

impl CallbackStub {
    pub fn new(remote: RemoteRef) -> Self {
        Self { remote }
    }

    pub async fn report_directory_address(&self, address: SocketAddr) -> Result<()> {
        match self
            .remote
            .call(Call::ReportDirectoryAddress { address })
            .await?
        {
            Payload::Done => Ok(()),
            other => Err(unexpected("report_directory_address", other)),
        }
    }
}

/// Sends lifecycle notifications to the worker's [`SessionControl`].
#[derive(Debug, Clone)]
pub struct ControlStub {
    remote: RemoteRef,
}

impl ControlStub {
    pub fn new(remote: RemoteRef) -> Self {
        Self { remote }
    }

    /// One-way; returns once the notification is written.
    pub async fn release(&self) -> Result<()> {
        self.remote.notify(Call::Release).await
    }
}
