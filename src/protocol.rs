//! TCP protocol between a capture client and the analysis server.
//!
//! Each message is one length-delimited frame holding a JSON object tagged by `type`.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::MalformedMessage;
use crate::frame::{FrameInput, FrameResult};
use crate::rom::RomReport;

// --- Message types ---

/// Client → server
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartTest { test_type: String },
    ResetTest,
    EndTest,
    Frame(FrameInput),
}

/// Server → client
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TestConfigured { ok: bool, error: Option<String> },
    FrameResult {
        frame: FrameResult,
        rom: Option<RomReport>,
    },
    /// `frame_index` is null when the payload was too broken to read it
    FrameRejected {
        frame_index: Option<u64>,
        error: String,
    },
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream, max_frame_length: usize) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec();
    Framed::new(stream, codec)
}

/// Send a serializable message (JSON + length prefix).
pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> anyhow::Result<()> {
    let data = serde_json::to_vec(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive one raw frame. `Ok(None)` once the peer closes.
///
/// Only transport and framing failures are errors here; the payload is not inspected.
pub async fn recv_frame(stream: &mut MessageStream) -> anyhow::Result<Option<BytesMut>> {
    match stream.next().await {
        Some(Ok(bytes)) => Ok(Some(bytes)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

/// Decode a JSON payload, keeping the frame index (if readable) for the rejection reply.
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> Result<T, MalformedMessage> {
    serde_json::from_slice(data).map_err(|source| MalformedMessage {
        frame_index: serde_json::from_slice::<serde_json::Value>(data)
            .ok()
            .and_then(|v| v.get("frame_index")?.as_u64()),
        source,
    })
}

/// Receive and deserialize a message. `Ok(None)` once the peer closes.
pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> anyhow::Result<Option<T>> {
    match recv_frame(stream).await? {
        Some(bytes) => Ok(Some(decode_message(&bytes)?)),
        None => Ok(None),
    }
}
