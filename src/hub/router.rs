//! Message router: dispatches a decoded [`ClientMessage`] to the relevant
//! `HubState` operation and produces the direct reply (if any) owed to the
//! sender. Broadcast fanout from room operations is delivered separately,
//! through `HubState`'s [`crate::room::FanoutSink`] implementation.

use std::sync::Arc;

use crate::protocol::{ClientMessage, ErrorCode, PeerId, ServerMessage};

use super::state::HubState;

/// Handles one decoded client frame, returning the direct reply (if any)
/// that should be sent back to `peer_id`. Errors from the originating
/// operation are turned into an `ERROR` reply here rather than propagated,
/// per the session-logical propagation policy.
pub async fn handle_client_message(
    hub: &Arc<HubState>,
    peer_id: PeerId,
    message: ClientMessage,
    now_ms: i64,
) -> Option<ServerMessage> {
    match message {
        ClientMessage::Connect { .. } => Some(ServerMessage::Connect {
            peer_id,
            status: "connected".to_string(),
        }),
        ClientMessage::Disconnect { .. } => {
            hub.disconnect_peer(peer_id).await;
            None
        }
        ClientMessage::CreateRoom { .. } => match hub.create_room(peer_id).await {
            Ok(room_id) => Some(ServerMessage::RoomCreated { room_id }),
            Err(err) => Some(error_message(err.error_code(), &err.to_string())),
        },
        ClientMessage::JoinRoom { room_id, .. } => match hub.join_room(room_id, peer_id).await {
            Ok(()) => {
                let (peer_count, opponent_id) = match hub.rooms.get(room_id) {
                    Ok(handle) => {
                        let peer_count = handle.summary().await.map_or(0, |s| s.player_count as u32);
                        let opponent_id = handle.opponent_of(peer_id).await;
                        (peer_count, opponent_id)
                    }
                    Err(_) => (0, None),
                };
                Some(ServerMessage::RoomJoined {
                    room_id,
                    opponent_id,
                    peer_count,
                })
            }
            Err(err) => Some(room_error_reply(room_id, err)),
        },
        ClientMessage::LeaveRoom { room_id, .. } => {
            let _ = hub.leave_room(room_id, peer_id).await;
            None
        }
        ClientMessage::JoinAsSpectator { room_id, .. } => {
            match hub.join_as_spectator(room_id, peer_id).await {
                Ok(()) => None,
                Err(err) => Some(room_error_reply(room_id, err)),
            }
        }
        ClientMessage::FindMatch { mode, .. } => {
            hub.find_match(peer_id, mode, now_ms).await;
            None
        }
        ClientMessage::CancelMatchmaking { .. } => {
            let _ = hub.cancel_matchmaking(peer_id).await;
            None
        }
        ClientMessage::Move { room_id, mv } => {
            match hub.record_move(room_id, peer_id, mv).await {
                Ok(()) => None,
                Err(err) => Some(error_message(err.error_code(), &err.to_string())),
            }
        }
        ClientMessage::StateSync { room_id, state, .. } => {
            let Some(state) = state else { return None };
            match hub.record_snapshot(room_id, peer_id, state).await {
                Ok(()) => None,
                Err(err) => Some(error_message(err.error_code(), &err.to_string())),
            }
        }
        ClientMessage::Ping { timestamp } => Some(ServerMessage::Pong { timestamp }),
        ClientMessage::Chat { room_id, message } => {
            hub.relay_chat(room_id, peer_id, message).await;
            None
        }
        ClientMessage::Reconnect { room_id, .. } => match hub.reconnect(room_id, peer_id).await {
            Ok(()) => None,
            Err(err) => Some(error_message(err.error_code(), &err.to_string())),
        },
    }
}

fn error_message(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error {
        code,
        message: message.to_string(),
        details: None,
    }
}

fn room_error_reply(room_id: crate::protocol::RoomId, err: crate::error::HubError) -> ServerMessage {
    match err.error_code() {
        ErrorCode::RoomNotFound => ServerMessage::RoomNotFound { room_id },
        ErrorCode::RoomFull => ServerMessage::RoomFull { room_id },
        code => error_message(code, &err.to_string()),
    }
}
