//! Wire protocol between nodes
//!
//! Wire format: [4-byte big-endian length][JSON payload]
//!
//! Every call is one request frame answered by one response frame. A null
//! result is a valid value, distinct from "no such task" (a status string)
//! and from errors (an `Err` response carrying the peer-side trace).
//! Binary payloads are explicitly wrapped as base64 blobs so the channel
//! never assumes ascii-only data; bulk structured payloads additionally
//! go through the LZ4 compression boundary ([`pack_text`]/[`unpack_text`]).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Upper bound on a single frame (bulk morphology/activity payloads)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Key marking a JSON object as a wrapped binary blob
const BLOB_KEY: &str = "__blob_b64__";

// ─────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────

/// A method call on a serving node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Liveness probe; answered with `1`
    Ping,
    /// Stop the serving node's accept loop
    Stop,
    /// Re-attempt peer discovery on the serving node
    TrySetupClient { warn: bool },
    /// Enqueue and wait for the terminal outcome
    RunCommand { command: String },
    /// Enqueue and return the task id immediately
    EnqueueCommand { command: String },
    GetTaskStatus { task_id: u64 },
    GetTaskError { task_id: u64 },
    GetTaskResult { task_id: u64 },
}

impl Request {
    /// Method name for logging
    pub fn method(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Stop => "stop",
            Request::TrySetupClient { .. } => "try_setup_client",
            Request::RunCommand { .. } => "run_command",
            Request::EnqueueCommand { .. } => "enqueue_command",
            Request::GetTaskStatus { .. } => "get_task_status",
            Request::GetTaskError { .. } => "get_task_error",
            Request::GetTaskResult { .. } => "get_task_result",
        }
    }
}

/// The answer to a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// The call succeeded; `value` may be null
    Ok { value: Value },
    /// The call failed; `trace` is the peer-side error text
    Err { trace: String },
}

impl Response {
    pub fn ok(value: Value) -> Self {
        Response::Ok { value }
    }

    pub fn err(trace: impl Into<String>) -> Self {
        Response::Err {
            trace: trace.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────

/// Read one length-prefixed JSON message from a stream
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| Error::Transport(format!("Failed to read frame length: {e}")))?;

    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::Transport(format!("Failed to read frame body: {e}")))?;

    Ok(serde_json::from_slice(&buf)?)
}

/// Write one length-prefixed JSON message to a stream
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    let len = payload.len() as u32;

    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    writer
        .write_u32(len)
        .await
        .map_err(|e| Error::Transport(format!("Failed to write frame length: {e}")))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| Error::Transport(format!("Failed to write frame body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush frame: {e}")))?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Binary blobs & compression boundary
// ─────────────────────────────────────────────────────────────────

/// Wrap raw bytes as a blob value the protocol carries transparently
pub fn wrap_bytes(bytes: &[u8]) -> Value {
    json!({ BLOB_KEY: BASE64.encode(bytes) })
}

/// Unwrap a blob value back into raw bytes
pub fn unwrap_bytes(value: &Value) -> Result<Vec<u8>> {
    let encoded = value
        .get(BLOB_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("Value is not a wrapped binary blob".to_string()))?;

    BASE64
        .decode(encoded)
        .map_err(|e| Error::Protocol(format!("Invalid blob encoding: {e}")))
}

/// Whether a value is a wrapped binary blob
pub fn is_blob(value: &Value) -> bool {
    value.get(BLOB_KEY).is_some_and(Value::is_string)
}

/// Compression boundary for bulk textual payloads: text -> LZ4 -> blob
pub fn pack_text(text: &str) -> Value {
    wrap_bytes(&lz4_flex::compress_prepend_size(text.as_bytes()))
}

/// Reverse of [`pack_text`]
pub fn unpack_text(value: &Value) -> Result<String> {
    let compressed = unwrap_bytes(value)?;
    let bytes = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| Error::Protocol(format!("Decompression failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("Payload is not UTF-8: {e}")))
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
