//! Name to remote-object directories.
//!
//! A [`Directory`] owns one loopback listener and a table of exported
//! [`Servant`]s. Another process reaches an exported object through a
//! [`RemoteRef`], obtained from [`DirectoryClient::lookup`] or handed over
//! inside a call.
//!
//! ```text
//!  controller                                   worker
//!  ┌───────────────────────┐                   ┌────────────────────────┐
//!  │ bootstrap Directory   │◀── report addr ───│ worker Directory       │
//!  │  bridge-callback      │                   │  analyzer              │
//!  │  log-sink/<job>       │◀── log notify ────│  help                  │
//!  │                       │──── calls ───────▶│  control               │
//!  └───────────────────────┘                   └────────────────────────┘
//! ```

mod log_sink;
mod servant;
pub mod wire;

pub use log_sink::{LogSinkProxy, FLUSH_TIMEOUT};
pub use servant::{
    Analyzer, AnalyzerStub, CallbackStub, ControlStub, DirectoryCallback, Help, HelpStub,
    LogSink, Servant, SessionControl,
};

use crate::cleanup::ReleaseStack;
use crate::error::{BridgeError, RemoteError, RemoteErrorKind, Result};
use crate::net::frame::{framed, next_frame, send_frame};
use crate::net::{get_available_port, BridgeSocketFactory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wire::{Frame, Payload, Reply};

/// Number of ports tried before giving up on binding a directory.
pub const REGISTRY_BIND_ATTEMPTS: usize = 25;

/// Serializable reference to an object exported in some directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Address of the directory exporting the object.
    pub address: SocketAddr,
    /// Name the object is bound under.
    pub name: String,
    /// Factory used for every connection to `address`.
    pub factory: BridgeSocketFactory,
}

impl RemoteRef {
    /// Invoke `call` and wait for the reply.
    pub async fn call(&self, call: wire::Call) -> Result<Payload> {
        let mut stream = framed(self.factory.connect(self.address).await?);
        let frame = Frame::Call {
            target: self.name.clone(),
            call,
        };
        send_frame(&mut stream, &frame).await?;
        let reply: Option<Reply> = next_frame(&mut stream).await?;
        match reply {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(remote)) => Err(BridgeError::Remote(remote)),
            None => Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection before replying", self.address),
            ))),
        }
    }

    /// Send `call` without waiting for it to be processed.
    pub async fn notify(&self, call: wire::Call) -> Result<()> {
        let mut stream = framed(self.factory.connect(self.address).await?);
        let frame = Frame::Notify {
            target: self.name.clone(),
            call,
        };
        send_frame(&mut stream, &frame).await
    }
}

struct Entry {
    generation: u64,
    servant: Servant,
}

type ObjectTable = Arc<RwLock<HashMap<String, Entry>>>;

/// Server side of a directory.
pub struct Directory {
    address: SocketAddr,
    factory: BridgeSocketFactory,
    objects: ObjectTable,
    generation: AtomicU64,
    releases: Mutex<ReleaseStack>,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Directory {
    /// Start serving on `listener`. Must be called within a tokio runtime.
    pub fn serve(listener: TcpListener, factory: BridgeSocketFactory) -> Result<Self> {
        let address = listener.local_addr()?;
        let objects: ObjectTable = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            objects.clone(),
            factory,
            shutdown.clone(),
        ));
        debug!(address = %address, "Directory listening");
        Ok(Self {
            address,
            factory,
            objects,
            generation: AtomicU64::new(0),
            releases: Mutex::new(ReleaseStack::new()),
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Address the listener is bound to.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Factory every connection to and from this directory uses.
    pub fn factory(&self) -> BridgeSocketFactory {
        self.factory
    }

    /// Whether [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reference to `name` in this directory, bound or not.
    pub fn reference(&self, name: &str) -> RemoteRef {
        RemoteRef {
            address: self.address,
            name: name.to_string(),
            factory: self.factory,
        }
    }

    /// Export `servant` under `name`, replacing any previous binding.
    ///
    /// The matching unexport runs when the directory is closed.
    pub fn bind(&self, name: &str, servant: Servant) -> Result<RemoteRef> {
        self.export(name, servant, true)
    }

    /// Export `servant` under `name` unless the name is already bound.
    pub fn bind_new(&self, name: &str, servant: Servant) -> Result<RemoteRef> {
        self.export(name, servant, false)
    }

    fn export(&self, name: &str, servant: Servant, replace: bool) -> Result<RemoteRef> {
        if self.is_closed() {
            return Err(BridgeError::IllegalState(format!(
                "directory {} is closed",
                self.address
            )));
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        debug!(address = %self.address, name, kind = servant.kind(), "Binding object");
        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            if !replace && objects.contains_key(name) {
                return Err(BridgeError::IllegalState(format!(
                    "'{name}' is already bound in {}",
                    self.address
                )));
            }
            objects.insert(name.to_string(), Entry { generation, servant });
        }

        let objects = self.objects.clone();
        let key = name.to_string();
        let label = unexport_label(name);
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        // One pending unexport per name; the newest binding owns it.
        releases.remove(&label);
        releases.push(label, move || {
            let mut objects = objects.write().unwrap_or_else(|e| e.into_inner());
            if objects.get(&key).is_some_and(|e| e.generation == generation) {
                objects.remove(&key);
            }
            Ok(())
        });
        Ok(self.reference(name))
    }

    /// Remove `name` and its pending unexport. Returns whether it was bound.
    pub fn unbind(&self, name: &str) -> bool {
        let removed = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            objects.remove(name).is_some()
        };
        let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
        releases.remove(&unexport_label(name));
        removed
    }

    /// Whether `name` currently resolves to an object.
    pub fn is_bound(&self, name: &str) -> bool {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.contains_key(name)
    }

    /// Unexport every object, then release the listener.
    ///
    /// Both steps always run. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let releases = {
            let mut releases = self.releases.lock().unwrap_or_else(|e| e.into_inner());
            releases.take()
        };
        let mut failures = match releases.release_all().await {
            Ok(()) => Vec::new(),
            Err(BridgeError::Cleanup(failures)) => failures,
            Err(other) => vec![other.to_string()],
        };

        self.shutdown.cancel();
        let accept_task = {
            let mut task = self.accept_task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                warn!(address = %self.address, error = %e, "Directory listener task failed");
                failures.push(format!("release listener {}: {}", self.address, e));
            }
        }

        if failures.is_empty() {
            debug!(address = %self.address, "Directory closed");
            Ok(())
        } else {
            Err(BridgeError::Cleanup(failures))
        }
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn unexport_label(name: &str) -> String {
    format!("unexport {name}")
}

/// Create a directory on a free port of `address`.
///
/// The free port can be taken by another process between allocation and
/// bind; such conflicts are retried with a new port up to
/// [`REGISTRY_BIND_ATTEMPTS`] times.
pub fn create_registry_on_available_port(address: IpAddr) -> Result<Directory> {
    create_registry_with_ports(address, || get_available_port(address))
}

/// Like [`create_registry_on_available_port`], drawing candidates from `next_port`.
pub fn create_registry_with_ports<F>(address: IpAddr, mut next_port: F) -> Result<Directory>
where
    F: FnMut() -> Result<u16>,
{
    let factory = BridgeSocketFactory::new(address)?;
    for attempt in 1..=REGISTRY_BIND_ATTEMPTS {
        let port = next_port()?;
        match factory.bind_listener(port) {
            Ok(listener) => {
                let directory = Directory::serve(listener, factory)?;
                info!(address = %directory.address(), attempt, "Directory bound");
                return Ok(directory);
            }
            Err(e) if e.is_addr_in_use() => {
                debug!(port, attempt, "Port taken before bind, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(BridgeError::BridgeSetup {
        attempts: REGISTRY_BIND_ATTEMPTS,
    })
}

/// Client side of a directory.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    address: SocketAddr,
    factory: BridgeSocketFactory,
}

impl DirectoryClient {
    /// Client for the directory at `address`. Connections are opened per
    /// lookup, so this never fails.
    pub fn connect(address: SocketAddr, factory: BridgeSocketFactory) -> Self {
        Self { address, factory }
    }

    /// Address of the remote directory.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Resolve a bound name.
    pub async fn lookup(&self, name: &str) -> Result<RemoteRef> {
        let lookup_error = |reason: String| BridgeError::DirectoryLookup {
            name: name.to_string(),
            address: self.address,
            reason,
        };

        let stream = self
            .factory
            .connect(self.address)
            .await
            .map_err(|e| lookup_error(e.to_string()))?;
        let mut stream = framed(stream);
        let frame = Frame::Lookup {
            name: name.to_string(),
        };
        send_frame(&mut stream, &frame)
            .await
            .map_err(|e| lookup_error(e.to_string()))?;
        let reply: Option<Reply> = next_frame(&mut stream)
            .await
            .map_err(|e| lookup_error(e.to_string()))?;
        match reply {
            Some(Ok(Payload::Bound { reference })) => Ok(reference),
            Some(Ok(other)) => Err(lookup_error(format!("unexpected reply {other:?}"))),
            Some(Err(remote)) => Err(lookup_error(remote.message)),
            None => Err(lookup_error("connection closed".to_string())),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    objects: ObjectTable,
    factory: BridgeSocketFactory,
    shutdown: CancellationToken,
) {
    let address = listener.local_addr().ok();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    debug!(peer = %peer, "Accepted directory connection");
                    tokio::spawn(serve_connection(
                        stream,
                        objects.clone(),
                        factory,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Directory accept failed");
                }
            }
        }
    }
    debug!(address = ?address, "Directory listener released");
}

async fn serve_connection(
    stream: TcpStream,
    objects: ObjectTable,
    factory: BridgeSocketFactory,
    shutdown: CancellationToken,
) {
    let Ok(address) = stream.local_addr() else {
        return;
    };
    let mut stream = framed(stream);
    loop {
        let frame: Frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = next_frame(&mut stream) => match read {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Dropping directory connection");
                    break;
                }
            }
        };

        let (reply, expects_reply) = match frame {
            Frame::Lookup { name } => {
                let reply = if lookup_servant(&objects, &name).is_some() {
                    Ok(Payload::Bound {
                        reference: RemoteRef {
                            address,
                            name,
                            factory,
                        },
                    })
                } else {
                    Err(not_bound(&name))
                };
                (reply, true)
            }
            Frame::Call { target, call } => (invoke(&objects, &target, call).await, true),
            Frame::Notify { target, call } => {
                let operation = call.name();
                if let Err(e) = invoke(&objects, &target, call).await {
                    debug!(target = %target, operation, error = %e, "Notification failed");
                }
                (Ok(Payload::Done), false)
            }
        };

        if expects_reply {
            if let Err(e) = send_frame(&mut stream, &reply).await {
                debug!(error = %e, "Failed to write reply");
                break;
            }
        }
    }
}

fn lookup_servant(objects: &ObjectTable, name: &str) -> Option<Servant> {
    let objects = objects.read().unwrap_or_else(|e| e.into_inner());
    objects.get(name).map(|e| e.servant.clone())
}

fn not_bound(name: &str) -> RemoteError {
    RemoteError::new(RemoteErrorKind::NotBound, format!("'{name}' is not bound"))
}

async fn invoke(objects: &ObjectTable, target: &str, call: wire::Call) -> Reply {
    match lookup_servant(objects, target) {
        Some(servant) => servant.dispatch(call).await,
        None => Err(not_bound(target)),
    }
}
