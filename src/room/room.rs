//! Pure room logic (§4.4): membership, turn discipline, move/snapshot
//! recording, and the fanout each operation produces.
//!
//! `Room` never performs I/O. Every public operation returns the list of
//! [`Fanout`] entries its caller (the room's owning actor task, see
//! `crate::hub::room_actor`) must deliver to peer outbound queues. Keeping
//! the logic side-effect-free makes it exhaustively unit-testable without a
//! runtime.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::error::RoomError;
use crate::protocol::{
    MoveToken, PeerId, PlayerRole, RoomId, ServerMessage, StateSnapshot,
};

/// One message this room wants delivered to one peer (or broadcast target).
#[derive(Debug, Clone)]
pub struct Fanout {
    pub target: PeerId,
    pub message: ServerMessage,
    /// Whether the outbound queue must never drop this frame under
    /// backpressure (§5 Backpressure: MOVE, GAME_START, GAME_END, terminal
    /// STATE_SYNC).
    pub critical: bool,
}

impl Fanout {
    fn new(target: PeerId, message: ServerMessage, critical: bool) -> Self {
        Self {
            target,
            message,
            critical,
        }
    }
}

/// A snapshot of room membership/lifecycle counters, used by the registry
/// sweeper and by observability; never mutated in place.
#[derive(Debug, Clone, Copy)]
pub struct RoomSummary {
    pub player_count: usize,
    pub spectator_count: usize,
    pub started: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Occupied(PeerId),
    /// A player disconnected mid-match; the slot is reserved for their
    /// return within the recovery window instead of being freed outright.
    AwaitingReconnect(PeerId),
}

impl Slot {
    fn peer(&self) -> Option<PeerId> {
        match self {
            Slot::Occupied(p) | Slot::AwaitingReconnect(p) => Some(*p),
            Slot::Empty => None,
        }
    }
}

pub struct Room {
    pub id: RoomId,
    host: Slot,
    guest: Slot,
    spectators: HashSet<PeerId>,
    spectating_enabled: bool,
    move_log: Vec<MoveToken>,
    last_host_move: u64,
    last_guest_move: u64,
    current_turn: PlayerRole,
    latest_snapshot: Option<StateSnapshot>,
    created_at: i64,
    started: bool,
    empty_since: Option<Instant>,
    awaiting_reconnect_since: std::collections::HashMap<PeerId, Instant>,
    recovery_window: Duration,
}

impl Room {
    pub fn new(id: RoomId, created_at: i64, spectating_enabled: bool, recovery_window: Duration) -> Self {
        Self {
            id,
            host: Slot::Empty,
            guest: Slot::Empty,
            spectators: HashSet::new(),
            spectating_enabled,
            move_log: Vec::new(),
            last_host_move: 0,
            last_guest_move: 0,
            current_turn: PlayerRole::Host,
            latest_snapshot: None,
            created_at,
            started: false,
            empty_since: None,
            awaiting_reconnect_since: std::collections::HashMap::new(),
            recovery_window,
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            player_count: self.player_count(),
            spectator_count: self.spectators.len(),
            started: self.started,
            created_at: self.created_at,
        }
    }

    pub fn player_count(&self) -> usize {
        [&self.host, &self.guest]
            .into_iter()
            .filter(|slot| **slot != Slot::Empty)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.player_count() == 0 && self.spectators.is_empty()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Marks the instant the room first became empty, for the registry
    /// sweeper's "empty for >= grace period" check. Idempotent.
    pub fn note_empty_if_applicable(&mut self, now: Instant) {
        if self.is_empty() {
            self.empty_since.get_or_insert(now);
        } else {
            self.empty_since = None;
        }
    }

    pub fn empty_duration(&self, now: Instant) -> Option<Duration> {
        self.empty_since.map(|since| now.saturating_duration_since(since))
    }

    pub fn role_of(&self, peer_id: PeerId) -> PlayerRole {
        if self.host.peer() == Some(peer_id) {
            PlayerRole::Host
        } else if self.guest.peer() == Some(peer_id) {
            PlayerRole::Guest
        } else if self.spectators.contains(&peer_id) {
            PlayerRole::Spectator
        } else {
            PlayerRole::None
        }
    }

    /// The peer occupying the other player slot, if any (§8 scenario 1:
    /// the joining peer's `ROOM_JOINED` reply must carry the opponent's id).
    pub fn opponent_of(&self, peer_id: PeerId) -> Option<PeerId> {
        if self.host.peer() == Some(peer_id) {
            self.guest.peer()
        } else if self.guest.peer() == Some(peer_id) {
            self.host.peer()
        } else {
            None
        }
    }

    fn peers(&self) -> Vec<PeerId> {
        let mut out = Vec::with_capacity(2 + self.spectators.len());
        if let Some(p) = self.host.peer() {
            out.push(p);
        }
        if let Some(p) = self.guest.peer() {
            out.push(p);
        }
        out.extend(self.spectators.iter().copied());
        out
    }

    // §4.4 addPlayer
    pub fn add_player(&mut self, peer_id: PeerId) -> Result<Vec<Fanout>, RoomError> {
        if self.host.peer() == Some(peer_id) || self.guest.peer() == Some(peer_id) {
            return Ok(Vec::new());
        }
        if self.host == Slot::Empty {
            self.host = Slot::Occupied(peer_id);
        } else if self.guest == Slot::Empty {
            self.guest = Slot::Occupied(peer_id);
        } else {
            return Err(RoomError::RoomFull);
        }
        self.empty_since = None;

        if let (Slot::Occupied(host), Slot::Occupied(guest)) = (self.host, self.guest) {
            self.started = true;
            self.current_turn = PlayerRole::Host;
            let msg = ServerMessage::GameStart {
                room_id: self.id,
                players: vec![host, guest],
                starting_player: host,
            };
            return Ok(vec![
                Fanout::new(host, msg.clone(), true),
                Fanout::new(guest, msg, true),
            ]);
        }
        Ok(Vec::new())
    }

    // §4.4 addSpectator
    pub fn add_spectator(&mut self, peer_id: PeerId) -> Result<Vec<Fanout>, RoomError> {
        if !self.spectating_enabled {
            return Err(RoomError::NotAPlayer);
        }
        self.spectators.insert(peer_id);
        self.empty_since = None;
        Ok(Vec::new())
    }

    // §4.4 removePeer / failure semantics (mid-match disconnect grace period)
    pub fn remove_peer(&mut self, peer_id: PeerId, now: Instant) -> Vec<Fanout> {
        if self.spectators.remove(&peer_id) {
            return self.broadcast(
                ServerMessage::SpectatorLeft {
                    room_id: self.id,
                    peer_id,
                },
                Some(peer_id),
                false,
            );
        }

        let in_host = self.host.peer() == Some(peer_id);
        let in_guest = self.guest.peer() == Some(peer_id);
        if !in_host && !in_guest {
            return Vec::new();
        }

        if self.started {
            if in_host {
                self.host = Slot::AwaitingReconnect(peer_id);
            } else {
                self.guest = Slot::AwaitingReconnect(peer_id);
            }
            self.awaiting_reconnect_since.insert(peer_id, now);
            return self.broadcast(
                ServerMessage::PlayerDisconnected {
                    room_id: self.id,
                    peer_id,
                },
                Some(peer_id),
                false,
            );
        }

        if in_host {
            self.host = Slot::Empty;
        } else {
            self.guest = Slot::Empty;
        }
        let fanout = self.broadcast(
            ServerMessage::PlayerLeft {
                room_id: self.id,
                peer_id,
            },
            Some(peer_id),
            false,
        );
        self.note_empty_if_applicable(now);
        fanout
    }

    /// Called by the owning actor on a periodic tick. Returns `GAME_END`
    /// fanout (and frees the slot) for every peer whose recovery window has
    /// elapsed without a reconnect.
    pub fn expire_awaiting_reconnects(&mut self, now: Instant) -> Vec<Fanout> {
        let expired: Vec<PeerId> = self
            .awaiting_reconnect_since
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) >= self.recovery_window)
            .map(|(peer, _)| *peer)
            .collect();

        let mut out = Vec::new();
        for peer in expired {
            self.awaiting_reconnect_since.remove(&peer);
            let (winner, slot_is_host) = if self.host.peer() == Some(peer) {
                (self.guest.peer(), true)
            } else {
                (self.host.peer(), false)
            };
            if slot_is_host {
                self.host = Slot::Empty;
            } else {
                self.guest = Slot::Empty;
            }
            let msg = ServerMessage::GameEnd {
                winner,
                reason: "abandoned".to_string(),
                final_score: self
                    .latest_snapshot
                    .as_ref()
                    .map(|s| [s.counters.host_score, s.counters.guest_score]),
            };
            if let Some(opponent) = winner {
                out.push(Fanout::new(opponent, msg, true));
            }
        }
        self.note_empty_if_applicable(now);
        out
    }

    /// Re-associates a returning peer with its reserved slot (§8 Recovery
    /// window invariant). Returns the latest authoritative snapshot to
    /// replay, or `RoomError::NotAPlayer` if the peer holds no reservation.
    pub fn reconnect(&mut self, peer_id: PeerId) -> Result<Vec<Fanout>, RoomError> {
        let reserved = self.host == Slot::AwaitingReconnect(peer_id)
            || self.guest == Slot::AwaitingReconnect(peer_id);
        if !reserved {
            return Err(RoomError::NotAPlayer);
        }
        self.awaiting_reconnect_since.remove(&peer_id);
        if self.host == Slot::AwaitingReconnect(peer_id) {
            self.host = Slot::Occupied(peer_id);
        } else {
            self.guest = Slot::Occupied(peer_id);
        }
        let state = self
            .latest_snapshot
            .clone()
            .unwrap_or_else(|| StateSnapshot::empty(0, 0));
        Ok(vec![Fanout::new(
            peer_id,
            ServerMessage::Reconnected {
                room_id: self.id,
                peer_id,
                state,
            },
            true,
        )])
    }

    // §4.4 recordMove
    pub fn record_move(&mut self, peer_id: PeerId, mv: MoveToken) -> Result<Vec<Fanout>, RoomError> {
        if !self.started {
            return Err(RoomError::GameNotStarted);
        }
        let role = self.role_of(peer_id);
        if role != PlayerRole::Host && role != PlayerRole::Guest {
            return Err(RoomError::NotAPlayer);
        }
        if role != self.current_turn {
            return Err(RoomError::NotYourTurn);
        }

        let (expected, last_move_ref) = match role {
            PlayerRole::Host => (self.last_host_move + 1, &mut self.last_host_move),
            PlayerRole::Guest => (self.last_guest_move + 1, &mut self.last_guest_move),
            _ => unreachable!("checked above"),
        };
        if mv.move_number != expected {
            return Err(RoomError::InvalidMoveNumber {
                expected,
                got: mv.move_number,
            });
        }
        *last_move_ref = mv.move_number;

        self.move_log.push(mv.clone());
        self.current_turn = match role {
            PlayerRole::Host => PlayerRole::Guest,
            PlayerRole::Guest => PlayerRole::Host,
            _ => unreachable!(),
        };

        let msg = ServerMessage::Move {
            room_id: self.id,
            mv,
        };
        Ok(self.broadcast(msg, Some(peer_id), true))
    }

    // §4.4 recordSnapshot
    pub fn record_snapshot(
        &mut self,
        peer_id: PeerId,
        snapshot: StateSnapshot,
    ) -> Result<Vec<Fanout>, RoomError> {
        let role = self.role_of(peer_id);
        if role != PlayerRole::Host && role != PlayerRole::Guest {
            return Err(RoomError::NotAPlayer);
        }
        let current_version = self.latest_snapshot.as_ref().map_or(0, |s| s.version);
        if snapshot.version <= current_version {
            return Err(RoomError::StaleSnapshot {
                current: current_version,
                submitted: snapshot.version,
            });
        }
        self.latest_snapshot = Some(snapshot.clone());
        let msg = ServerMessage::StateSync {
            room_id: self.id,
            state: Some(snapshot),
            delta: None,
        };
        Ok(self.broadcast(msg, Some(peer_id), false))
    }

    pub fn latest_snapshot(&self) -> Option<&StateSnapshot> {
        self.latest_snapshot.as_ref()
    }

    pub fn move_log(&self) -> &[MoveToken] {
        &self.move_log
    }

    pub fn current_turn(&self) -> PlayerRole {
        self.current_turn
    }

    // §4.4 broadcast
    pub fn broadcast(
        &self,
        message: ServerMessage,
        except: Option<PeerId>,
        critical: bool,
    ) -> Vec<Fanout> {
        self.peers()
            .into_iter()
            .filter(|p| Some(*p) != except)
            .map(|p| Fanout::new(p, message.clone(), critical))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Position;
    use uuid::Uuid;

    fn new_room() -> Room {
        Room::new(Uuid::new_v4(), 0, true, Duration::from_secs(30))
    }

    fn mv(peer: PeerId, n: u64) -> MoveToken {
        MoveToken {
            pos_a: Position { row: 0, col: 0 },
            pos_b: Position { row: 0, col: 1 },
            move_number: n,
            origin_peer_id: peer,
            server_timestamp: 0,
        }
    }

    #[test]
    fn first_player_becomes_host_second_becomes_guest_and_game_starts() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        assert!(room.add_player(host).unwrap().is_empty());
        assert_eq!(room.role_of(host), PlayerRole::Host);
        let fanout = room.add_player(guest).unwrap();
        assert_eq!(fanout.len(), 2);
        assert!(fanout
            .iter()
            .all(|f| matches!(f.message, ServerMessage::GameStart { .. })));
    }

    #[test]
    fn third_player_is_rejected_with_room_full() {
        let mut room = new_room();
        room.add_player(Uuid::new_v4()).unwrap();
        room.add_player(Uuid::new_v4()).unwrap();
        let err = room.add_player(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RoomError::RoomFull));
    }

    #[test]
    fn move_fanout_reaches_the_other_player_and_flips_turn() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();

        let fanout = room.record_move(host, mv(host, 1)).unwrap();
        assert_eq!(fanout.len(), 1);
        assert_eq!(fanout[0].target, guest);
        assert_eq!(room.current_turn(), PlayerRole::Guest);
    }

    #[test]
    fn out_of_turn_move_is_rejected() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();

        let err = room.record_move(guest, mv(guest, 1)).unwrap_err();
        assert!(matches!(err, RoomError::NotYourTurn));
    }

    #[test]
    fn move_numbers_are_strictly_monotone_per_peer() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();

        room.record_move(host, mv(host, 1)).unwrap();
        room.record_move(guest, mv(guest, 1)).unwrap();
        let err = room.record_move(host, mv(host, 3)).unwrap_err();
        assert!(matches!(err, RoomError::InvalidMoveNumber { expected: 2, got: 3 }));
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();

        let mut snap = StateSnapshot::empty(1, 1);
        snap.version = 5;
        room.record_snapshot(host, snap.clone()).unwrap();

        let mut stale = StateSnapshot::empty(1, 1);
        stale.version = 5;
        let err = room.record_snapshot(guest, stale).unwrap_err();
        assert!(matches!(err, RoomError::StaleSnapshot { .. }));
    }

    #[test]
    fn disconnect_mid_match_marks_awaiting_reconnect_not_immediate_removal() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();

        let fanout = room.remove_peer(host, Instant::now());
        assert_eq!(fanout.len(), 1);
        assert!(matches!(
            fanout[0].message,
            ServerMessage::PlayerDisconnected { .. }
        ));
        assert_eq!(room.role_of(host), PlayerRole::Host, "slot reserved, not freed");
    }

    #[test]
    fn reconnect_within_window_restores_slot_and_replays_snapshot() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();
        let mut snap = StateSnapshot::empty(1, 1);
        snap.version = 1;
        room.record_snapshot(host, snap).unwrap();

        room.remove_peer(host, Instant::now());
        let fanout = room.reconnect(host).unwrap();
        assert_eq!(fanout[0].target, host);
        assert!(matches!(fanout[0].message, ServerMessage::Reconnected { .. }));
    }

    #[test]
    fn expired_reconnect_window_abandons_the_room() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_player(guest).unwrap();
        room.remove_peer(host, Instant::now());

        let fanout = room.expire_awaiting_reconnects(Instant::now() + Duration::from_secs(31));
        assert_eq!(fanout.len(), 1);
        assert_eq!(fanout[0].target, guest);
        assert!(matches!(fanout[0].message, ServerMessage::GameEnd { .. }));
    }

    #[test]
    fn opponent_of_reports_the_other_occupied_slot() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        assert_eq!(room.opponent_of(host), None);
        room.add_player(host).unwrap();
        assert_eq!(room.opponent_of(host), None);
        room.add_player(guest).unwrap();
        assert_eq!(room.opponent_of(host), Some(guest));
        assert_eq!(room.opponent_of(guest), Some(host));
    }

    #[test]
    fn spectator_join_and_leave_does_not_touch_player_slots() {
        let mut room = new_room();
        let host = Uuid::new_v4();
        let spectator = Uuid::new_v4();
        room.add_player(host).unwrap();
        room.add_spectator(spectator).unwrap();
        assert_eq!(room.role_of(spectator), PlayerRole::Spectator);

        let fanout = room.remove_peer(spectator, Instant::now());
        assert!(matches!(
            fanout[0].message,
            ServerMessage::SpectatorLeft { .. }
        ));
        assert_eq!(room.role_of(spectator), PlayerRole::None);
    }
}
