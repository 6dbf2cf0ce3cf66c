//! Worker-side proxy for a controller log sink.

use super::servant::LogSink;
use super::wire::{Call, Frame, Reply};
use super::RemoteRef;
use crate::error::{BridgeError, Result};
use crate::model::LogEvent;
use crate::net::frame::{framed, next_frame, send_frame, FramedStream};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Upper bound on how long [`LogSinkProxy::flush`] waits.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

enum Message {
    Event(LogEvent),
    Flush(oneshot::Sender<()>),
}

/// Forwards log events to a remote sink as one-way notifications.
///
/// `log` only enqueues. A background task owns the connection; the first
/// delivery failure marks the sink as gone and later events are dropped.
pub struct LogSinkProxy {
    tx: mpsc::UnboundedSender<Message>,
}

impl LogSinkProxy {
    /// Start forwarding to `remote`. Must be called within a tokio runtime.
    pub fn spawn(remote: RemoteRef) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(remote, rx));
        Self { tx }
    }

    /// Wait until the sink has handled everything logged so far, or until
    /// [`FLUSH_TIMEOUT`] elapses.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_err() {
            return;
        }
        let _ = tokio::time::timeout(FLUSH_TIMEOUT, done_rx).await;
    }
}

impl LogSink for LogSinkProxy {
    fn log(&self, event: LogEvent) {
        let _ = self.tx.send(Message::Event(event));
    }
}

async fn forward(remote: RemoteRef, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut stream: Option<FramedStream<TcpStream>> = None;
    let mut broken = false;
    let mut dropped = 0usize;

    while let Some(message) = rx.recv().await {
        match message {
            Message::Flush(done) => {
                if let Some(conn) = stream.as_mut() {
                    if let Err(e) = barrier(&remote, conn).await {
                        debug!(sink = %remote.name, error = %e, "Log sink flush failed");
                        stream = None;
                        broken = true;
                    }
                }
                let _ = done.send(());
            }
            Message::Event(_) if broken => dropped += 1,
            Message::Event(event) => {
                if let Err(e) = deliver(&remote, &mut stream, event).await {
                    debug!(
                        sink = %remote.name,
                        address = %remote.address,
                        error = %e,
                        "Log sink unreachable, dropping further events"
                    );
                    stream = None;
                    broken = true;
                }
            }
        }
    }

    if dropped > 0 {
        debug!(sink = %remote.name, dropped, "Dropped log events for unreachable sink");
    }
}

/// Round trip on the delivery connection. The directory serves one
/// connection in order, so the reply means every earlier event was handled.
async fn barrier(remote: &RemoteRef, conn: &mut FramedStream<TcpStream>) -> Result<()> {
    let lookup = Frame::Lookup {
        name: remote.name.clone(),
    };
    let round_trip = async {
        send_frame(conn, &lookup).await?;
        let _: Option<Reply> = next_frame(conn).await?;
        Ok::<(), BridgeError>(())
    };
    match tokio::time::timeout(FLUSH_TIMEOUT, round_trip).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Io(std::io::ErrorKind::TimedOut.into())),
    }
}

async fn deliver(
    remote: &RemoteRef,
    stream: &mut Option<FramedStream<TcpStream>>,
    event: LogEvent,
) -> Result<()> {
    if stream.is_none() {
        *stream = Some(framed(remote.factory.connect(remote.address).await?));
    }
    let Some(conn) = stream.as_mut() else {
        return Ok(());
    };
    let frame = Frame::Notify {
        target: remote.name.clone(),
        call: Call::Log { event },
    };
    send_frame(conn, &frame).await
}
