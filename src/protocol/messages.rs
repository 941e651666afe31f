use serde::{Deserialize, Serialize};

use super::error_codes::ErrorCode;
use super::types::{MatchMode, MoveToken, PeerId, RoomId, StateDelta, StateSnapshot};

/// Message types sent from peer to hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "CONNECT")]
    Connect { peer_id: Option<PeerId> },
    #[serde(rename = "DISCONNECT")]
    Disconnect { peer_id: PeerId },
    #[serde(rename = "CREATE_ROOM")]
    CreateRoom { peer_id: PeerId },
    #[serde(rename = "JOIN_ROOM")]
    JoinRoom { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "LEAVE_ROOM")]
    LeaveRoom { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "JOIN_AS_SPECTATOR")]
    JoinAsSpectator { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "FIND_MATCH")]
    FindMatch {
        peer_id: PeerId,
        #[serde(default)]
        mode: MatchMode,
    },
    #[serde(rename = "CANCEL_MATCHMAKING")]
    CancelMatchmaking { peer_id: PeerId },
    #[serde(rename = "MOVE")]
    Move {
        room_id: RoomId,
        #[serde(rename = "move")]
        mv: MoveToken,
    },
    #[serde(rename = "STATE_SYNC")]
    StateSync {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<StateSnapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<StateDelta>,
    },
    #[serde(rename = "PING")]
    Ping { timestamp: i64 },
    #[serde(rename = "CHAT")]
    Chat { room_id: RoomId, message: String },
    #[serde(rename = "RECONNECT")]
    Reconnect {
        peer_id: PeerId,
        room_id: RoomId,
        reconnection_token: String,
    },
}

/// Message types sent from hub to peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "CONNECT")]
    Connect { peer_id: PeerId, status: String },
    #[serde(rename = "ROOM_CREATED")]
    RoomCreated { room_id: RoomId },
    #[serde(rename = "JOIN_ROOM")]
    RoomJoined {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        opponent_id: Option<PeerId>,
        peer_count: u32,
    },
    #[serde(rename = "ROOM_NOT_FOUND")]
    RoomNotFound { room_id: RoomId },
    #[serde(rename = "ROOM_FULL")]
    RoomFull { room_id: RoomId },
    #[serde(rename = "GAME_START")]
    GameStart {
        room_id: RoomId,
        players: Vec<PeerId>,
        starting_player: PeerId,
    },
    #[serde(rename = "MOVE")]
    Move {
        room_id: RoomId,
        #[serde(rename = "move")]
        mv: MoveToken,
    },
    #[serde(rename = "STATE_SYNC")]
    StateSync {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<StateSnapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<StateDelta>,
    },
    #[serde(rename = "GAME_END")]
    GameEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<PeerId>,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_score: Option<[i64; 2]>,
    },
    #[serde(rename = "CHAT")]
    Chat { room_id: RoomId, message: String },
    #[serde(rename = "PONG")]
    Pong { timestamp: i64 },
    #[serde(rename = "ERROR")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    #[serde(rename = "PLAYER_LEFT")]
    PlayerLeft { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "SPECTATOR_LEFT")]
    SpectatorLeft { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "PLAYER_DISCONNECTED")]
    PlayerDisconnected { room_id: RoomId, peer_id: PeerId },
    #[serde(rename = "RECONNECTED")]
    Reconnected {
        room_id: RoomId,
        peer_id: PeerId,
        state: StateSnapshot,
    },
}

/// Wire envelope wrapping a `ClientMessage` with the fields every frame
/// carries regardless of type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub message: ClientMessage,
    pub timestamp: i64,
    pub peer_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Wire envelope wrapping a `ServerMessage`. Server responses that correlate
/// a request echo the client's `message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: i64,
    pub peer_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ServerEnvelope {
    pub fn new(message: ServerMessage, peer_id: PeerId, timestamp: i64) -> Self {
        Self {
            message,
            timestamp,
            peer_id,
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Position;

    #[test]
    fn move_envelope_round_trips_through_json() {
        let envelope = ClientEnvelope {
            message: ClientMessage::Move {
                room_id: RoomId::nil(),
                mv: MoveToken {
                    pos_a: Position { row: 0, col: 0 },
                    pos_b: Position { row: 0, col: 1 },
                    move_number: 1,
                    origin_peer_id: PeerId::nil(),
                    server_timestamp: 1000,
                },
            },
            timestamp: 1000,
            peer_id: PeerId::nil(),
            message_id: Some("abc".to_string()),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"MOVE\""));
        let back: ClientEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id.as_deref(), Some("abc"));
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let json = r#"{"type":"PING","data":{"timestamp":5},"timestamp":5,"peerId":"00000000-0000-0000-0000-000000000000","extra":"ignored"}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(envelope.message, ClientMessage::Ping { .. }));
    }

    #[test]
    fn error_envelope_serializes_code_as_string() {
        let envelope = ServerEnvelope::new(
            ServerMessage::Error {
                code: ErrorCode::NotYourTurn,
                message: "not your turn".to_string(),
                details: None,
            },
            PeerId::nil(),
            10,
        );
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"code\":\"NOT_YOUR_TURN\""));
    }
}
