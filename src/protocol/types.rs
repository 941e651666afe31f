use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, server-assigned identifier for a connected peer.
pub type PeerId = Uuid;

/// Opaque, globally-unique identifier for a room.
pub type RoomId = Uuid;

/// A peer's occupancy within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerRole {
    Host,
    Guest,
    Spectator,
    None,
}

/// A single grid coordinate. Opaque to the core: it never interprets the
/// underlying match-3 semantics, just carries the pair through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub row: u32,
    pub col: u32,
}

/// Which of the two grids a cell-level change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSelector {
    PlayerGrid,
    OpponentGrid,
}

/// A single accepted move, opaque to the core beyond its two coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToken {
    pub pos_a: Position,
    pub pos_b: Position,
    /// Monotone per (peer, room); see `Room::record_move`.
    pub move_number: u64,
    pub origin_peer_id: PeerId,
    pub server_timestamp: i64,
}

/// The four named scalar counters carried by a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub host_score: i64,
    pub guest_score: i64,
    pub host_moves: i64,
    pub guest_moves: i64,
}

impl Counters {
    pub fn sum_scores(&self) -> i64 {
        self.host_score + self.guest_score
    }
}

/// A full capture of one room's game state at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    pub timestamp: i64,
    /// Rectangular array of cell tags; dimensions are opaque to the core.
    pub player_grid: Vec<Vec<String>>,
    pub opponent_grid: Vec<Vec<String>>,
    pub counters: Counters,
    pub event_progress: i64,
    pub active_events: Vec<String>,
    pub current_turn: PlayerRole,
}

impl StateSnapshot {
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            version: 0,
            base_version: None,
            timestamp: 0,
            player_grid: vec![vec![String::new(); cols]; rows],
            opponent_grid: vec![vec![String::new(); cols]; rows],
            counters: Counters::default(),
            event_progress: 0,
            active_events: Vec::new(),
            current_turn: PlayerRole::Host,
        }
    }
}

/// One entry of a `StateDelta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRecord {
    Cell {
        grid: GridSelector,
        row: usize,
        col: usize,
        value: String,
    },
    Scalar {
        field: ScalarField,
        value: i64,
    },
    EventProgress {
        #[serde(rename = "eventProgress", skip_serializing_if = "Option::is_none")]
        event_progress: Option<i64>,
        #[serde(rename = "activeEvents", skip_serializing_if = "Option::is_none")]
        active_events: Option<Vec<String>>,
    },
    Turn {
        turn: PlayerRole,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    HostScore,
    GuestScore,
    HostMoves,
    GuestMoves,
}

/// A sparse description of the changes between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub version: u64,
    pub base_version: u64,
    pub changes: Vec<ChangeRecord>,
    pub timestamp: i64,
}

/// Persisted locally by the Reconnection Manager, keyed by room id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub timestamp: i64,
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub opponent_id: Option<PeerId>,
    pub state: StateSnapshot,
    pub move_history: Vec<MoveToken>,
    pub last_synced_move_number: u64,
}

/// Matchmaking mode. Only `Random` is implemented at the core level; the
/// others are reserved and presently behave as `Random` (`Ranked`) or are
/// expected to route through the Room Registry directly (`Invite`, `Custom`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMode {
    #[default]
    Random,
    Ranked,
    Invite,
    Custom,
}

/// Lives in the Matchmaker's queue until matched, cancelled, or the peer
/// disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTicket {
    pub peer_id: PeerId,
    pub mode: MatchMode,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    VersionMismatch,
    GridInconsistency,
    ScoreMismatch,
    StateDivergence,
}

/// Retained in a bounded ring for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub conflict_type: ConflictType,
    pub detected_at: i64,
    pub local_version: u64,
    pub remote_version: u64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMode {
    Full,
    Delta,
    Hybrid,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPolicy {
    ServerAuthoritative,
    ClientAuthoritative,
    LatestTimestamp,
    Merge,
    Rollback,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::ServerAuthoritative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_role_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&PlayerRole::Host).unwrap();
        assert_eq!(json, "\"HOST\"");
    }

    #[test]
    fn counters_sum_scores() {
        let c = Counters {
            host_score: 40,
            guest_score: 25,
            host_moves: 3,
            guest_moves: 2,
        };
        assert_eq!(c.sum_scores(), 65);
    }

    #[test]
    fn change_record_cell_round_trips() {
        let change = ChangeRecord::Cell {
            grid: GridSelector::PlayerGrid,
            row: 2,
            col: 3,
            value: "red".to_string(),
        };
        let json = serde_json::to_string(&change).unwrap();
        let back: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(change, back);
    }
}
