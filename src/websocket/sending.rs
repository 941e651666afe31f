//! Serialization of outbound frames onto the wire (§4.1 Frame Codec).

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;

use crate::protocol::{encode, PeerId, ServerEnvelope, ServerMessage};

/// Serializes `message` as a `ServerEnvelope` and writes it to the socket.
/// Serialization failures are logged and swallowed rather than closing the
/// connection — they indicate a bug in a `ServerMessage` variant, not a
/// peer-caused condition.
pub async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: ServerMessage,
    peer_id: PeerId,
    now_ms: i64,
) -> Result<(), axum::Error> {
    let envelope = ServerEnvelope::new(message, peer_id, now_ms);
    let text = match encode(&envelope) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(%peer_id, error = %err, "failed to encode outbound frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
