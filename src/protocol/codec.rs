//! Frame Codec: bidirectional serialization of the wire envelope (§4.1).

use thiserror::Error;

use super::messages::{ClientEnvelope, ServerEnvelope};

/// Frames larger than this are rejected by `encode`/`decode` without ever
/// reaching component logic.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")]
    TooLarge,
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("failed to parse frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// §4.1: an otherwise well-formed envelope whose `type` tag names no
    /// known message. Dropped, never counted against the parse-error
    /// threshold; the caller logs at most one `UNKNOWN_TYPE` warning per
    /// connection per minute.
    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

/// `type` tags `ClientMessage` recognizes, used to distinguish an unknown
/// tag from a genuinely malformed frame before the schema-validating
/// deserialize runs.
const KNOWN_CLIENT_TYPES: &[&str] = &[
    "CONNECT",
    "DISCONNECT",
    "CREATE_ROOM",
    "JOIN_ROOM",
    "LEAVE_ROOM",
    "JOIN_AS_SPECTATOR",
    "FIND_MATCH",
    "CANCEL_MATCHMAKING",
    "MOVE",
    "STATE_SYNC",
    "PING",
    "CHAT",
    "RECONNECT",
];

/// Encode a server envelope to its UTF-8 text representation.
///
/// Returns `CodecError::TooLarge` rather than silently truncating; callers
/// choose how to react (typically: drop the frame and log).
pub fn encode(envelope: &ServerEnvelope) -> Result<String, CodecError> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(text)
}

/// Decode a UTF-8 text frame received from a peer into a client envelope.
///
/// Parse errors here are never fatal to the Transport; the caller is
/// responsible for incrementing the per-peer parse-error counter described
/// in §4.1 and disconnecting once the threshold is crossed — except
/// `CodecError::UnknownType`, which the caller must drop without counting
/// it towards that threshold (§4.1: unknown `type` values surface as a
/// throttled warning, not a protocol error).
pub fn decode(bytes: &[u8]) -> Result<ClientEnvelope, CodecError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge);
    }
    let text = std::str::from_utf8(bytes)?;
    let value: serde_json::Value = serde_json::from_str(text)?;
    if let Some(tag) = value.get("type").and_then(serde_json::Value::as_str) {
        if !KNOWN_CLIENT_TYPES.contains(&tag) {
            return Err(CodecError::UnknownType(tag.to_string()));
        }
    }
    let envelope = serde_json::from_value(value)?;
    Ok(envelope)
}

/// Per-connection tally of codec failures, used to trigger `PROTOCOL_ERROR`
/// disconnects once the threshold in §4.1 is crossed (16 within 60s).
#[derive(Debug)]
pub struct ParseErrorCounter {
    count: u32,
    window_start: std::time::Instant,
    window: std::time::Duration,
    threshold: u32,
}

impl ParseErrorCounter {
    pub fn new(threshold: u32, window: std::time::Duration) -> Self {
        Self {
            count: 0,
            window_start: std::time::Instant::now(),
            window,
            threshold,
        }
    }

    /// Record a parse failure and report whether the threshold has now
    /// been crossed.
    pub fn record(&mut self) -> bool {
        if self.window_start.elapsed() > self.window {
            self.count = 0;
            self.window_start = std::time::Instant::now();
        }
        self.count += 1;
        self.count > self.threshold
    }
}

impl Default for ParseErrorCounter {
    fn default() -> Self {
        Self::new(16, std::time::Duration::from_secs(60))
    }
}
