//! Per-connection read/write loops: one logical task pair per peer (§5).
//!
//! The write side drains the peer's [`OutboundQueue`](crate::hub::OutboundQueue)
//! and serializes frames onto the socket; the read side decodes inbound
//! frames, tracks the parse-error and heartbeat counters, and dispatches
//! through the Hub's message router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::hub::{handle_client_message, HubState};
use crate::protocol::{
    decode, ClientMessage, CodecError, ErrorCode, ParseErrorCounter, PeerId, ServerMessage,
};

use super::sending::send_message;

pub async fn handle_socket(socket: WebSocket, hub: Arc<HubState>, addr: SocketAddr) {
    let peer_id: PeerId = Uuid::new_v4();
    let peer = hub.register_peer(peer_id).await;
    tracing::info!(%peer_id, client_addr = %addr, "peer connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer_queue = peer.queue.clone();
    let writer_peer_id = peer_id;
    let writer_task = tokio::spawn(async move {
        loop {
            let frames = writer_queue.drain().await;
            for frame in frames {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if send_message(&mut ws_sender, frame.message, writer_peer_id, now_ms)
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    });

    let heartbeat_interval = hub.config.heartbeat_interval();
    let loss_threshold = i64::from(hub.config.heartbeat_loss_threshold);
    let mut parse_errors = ParseErrorCounter::default();
    let mut last_unknown_type_warning: Option<std::time::Instant> = None;
    let mut ping_seen_this_window = true;
    let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);
    heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_msg = ws_receiver.next() => {
                let Some(msg) = maybe_msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(%peer_id, error = %err, "websocket transport error");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        match decode(text.as_bytes()) {
                            Ok(envelope) => {
                                if matches!(envelope.message, ClientMessage::Ping { .. }) {
                                    ping_seen_this_window = true;
                                    if let ClientMessage::Ping { timestamp } = envelope.message {
                                        let now_ms = chrono::Utc::now().timestamp_millis();
                                        peer.record_pong((now_ms - timestamp).max(0) as f64).await;
                                    }
                                }
                                let now_ms = chrono::Utc::now().timestamp_millis();
                                if let Some(reply) =
                                    handle_client_message(&hub, peer_id, envelope.message, now_ms).await
                                {
                                    let critical = is_critical(&reply);
                                    peer.send(reply, critical).await;
                                }
                            }
                            // §4.1: an unknown `type` is dropped, not counted as a
                            // parse error; at most one warning per connection per
                            // minute is logged for it.
                            Err(CodecError::UnknownType(tag)) => {
                                let now = std::time::Instant::now();
                                let should_warn = last_unknown_type_warning
                                    .is_none_or(|last| now.duration_since(last) >= Duration::from_secs(60));
                                if should_warn {
                                    tracing::warn!(%peer_id, r#type = %tag, "UNKNOWN_TYPE");
                                    last_unknown_type_warning = Some(now);
                                }
                            }
                            Err(err) => {
                                tracing::warn!(%peer_id, error = %err, "failed to decode inbound frame");
                                if parse_errors.record() {
                                    peer.send(
                                        ServerMessage::Error {
                                            code: ErrorCode::ProtocolError,
                                            message: ErrorCode::ProtocolError.to_string(),
                                            details: None,
                                        },
                                        true,
                                    )
                                    .await;
                                    break;
                                }
                            }
                        }
                    }
                    Message::Close(_) => {
                        tracing::info!(%peer_id, "peer closed connection");
                        break;
                    }
                    _ => {}
                }
            }
            _ = heartbeat_ticker.tick() => {
                if ping_seen_this_window {
                    ping_seen_this_window = false;
                } else {
                    let missed = peer.record_missed_pong();
                    if missed >= loss_threshold {
                        tracing::warn!(%peer_id, missed, "heartbeat lost, closing connection");
                        break;
                    }
                }
            }
        }
    }

    writer_task.abort();
    hub.disconnect_peer(peer_id).await;
    tracing::info!(%peer_id, "peer disconnected");
}

/// Critical per §5 backpressure policy: MOVE, GAME_START, GAME_END, and the
/// terminal STATE_SYNC (which this router never emits directly — recorded
/// here for symmetry with the Room's own fanout).
fn is_critical(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Move { .. } | ServerMessage::GameStart { .. } | ServerMessage::GameEnd { .. }
    )
}

#[allow(dead_code)]
const HEARTBEAT_GRACE: Duration = Duration::from_millis(0);
