//! Length-prefixed JSON frames.
//!
//! Each frame is a big-endian `u32` byte count followed by a JSON document.
//! Delimiting is done by [`LengthDelimitedCodec`]; this module only adds the
//! JSON layer and maps codec failures onto [`BridgeError`].

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest frame either side accepts (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A byte stream carrying bridge frames.
pub type FramedStream<S> = Framed<S, LengthDelimitedCodec>;

/// Codec shared by both ends of every bridge connection.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Wrap `stream` in the bridge codec.
pub fn framed<S>(stream: S) -> FramedStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(stream, codec())
}

/// Serialize `value` and send it as one frame.
pub async fn send_frame<S, T>(framed: &mut FramedStream<S>, value: &T) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(BridgeError::Codec(format!(
            "frame of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_FRAME_LEN
        )));
    }
    framed.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Receive one frame. Returns `None` when the peer closed the stream cleanly
/// between frames; a stream that ends inside a frame is an error.
pub async fn next_frame<S, T>(framed: &mut FramedStream<S>) -> Result<Option<T>>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: DeserializeOwned,
{
    match framed.next().await {
        None => Ok(None),
        Some(Ok(bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Some(Err(e)) if e.kind() == ErrorKind::InvalidData => {
            Err(BridgeError::Codec(e.to_string()))
        }
        Some(Err(e)) => Err(e.into()),
    }
}
