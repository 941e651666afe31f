//! Reconnection Manager (§4.8): a bounded snapshot ring plus a durable
//! "latest" copy behind a swappable [`SnapshotStore`], recovery merge logic,
//! and the latency quality monitor.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::ReconnectionError;
use crate::protocol::{GameSnapshot, PeerId, RoomId};

const DEFAULT_RING_CAPACITY: usize = 10;
const MIN_PERSIST_INTERVAL_MS: i64 = 5_000;
const RECOVERY_TIMEOUT_MS: i64 = 60_000;
const QUALITY_WINDOW: usize = 20;

/// Durable key-value seam for the "latest" snapshot copy. One key per room,
/// value is the snapshot itself; a sentinel "most recent room" key is not
/// needed at the Hub (the caller always knows the room id).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, room_id: RoomId, snapshot: GameSnapshot);
    async fn get(&self, room_id: RoomId) -> Option<GameSnapshot>;
}

/// The one production `SnapshotStore`: an in-process `DashMap`. Kept behind
/// the trait so the persistence mechanism stays a seam rather than being
/// hardwired into the manager's recovery algorithm; no second backend is
/// implemented since horizontal sharding is out of scope.
pub struct InProcessSnapshotStore {
    latest: DashMap<RoomId, GameSnapshot>,
}

impl Default for InProcessSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessSnapshotStore {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
        }
    }
}

#[async_trait]
impl SnapshotStore for InProcessSnapshotStore {
    async fn put(&self, room_id: RoomId, snapshot: GameSnapshot) {
        self.latest.insert(room_id, snapshot);
    }

    async fn get(&self, room_id: RoomId) -> Option<GameSnapshot> {
        self.latest.get(&room_id).map(|entry| entry.clone())
    }
}

struct PeerRing {
    ring: VecDeque<GameSnapshot>,
    last_persisted_at: Option<i64>,
}

impl PeerRing {
    fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(DEFAULT_RING_CAPACITY),
            last_persisted_at: None,
        }
    }

    fn push(&mut self, snapshot: GameSnapshot, capacity: usize) {
        self.ring.push_back(snapshot);
        while self.ring.len() > capacity {
            self.ring.pop_front();
        }
    }

    fn latest(&self) -> Option<&GameSnapshot> {
        self.ring.back()
    }
}

pub struct ReconnectionManager {
    store: Arc<dyn SnapshotStore>,
    rings: RwLock<HashMap<PeerId, PeerRing>>,
    ring_capacity: usize,
}

impl ReconnectionManager {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            rings: RwLock::new(HashMap::new()),
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    /// Appends to the peer's ring; persists the "latest" copy only if at
    /// least `MIN_PERSIST_INTERVAL_MS` has elapsed since the last write
    /// (redundant saves are dropped).
    pub async fn save_snapshot(&self, peer_id: PeerId, snapshot: GameSnapshot, now_ms: i64) {
        let room_id = snapshot.room_id;
        let mut rings = self.rings.write().await;
        let entry = rings.entry(peer_id).or_insert_with(PeerRing::new);

        let should_persist = entry
            .last_persisted_at
            .is_none_or(|last| now_ms - last >= MIN_PERSIST_INTERVAL_MS);

        entry.push(snapshot.clone(), self.ring_capacity);

        if should_persist {
            entry.last_persisted_at = Some(now_ms);
            self.store.put(room_id, snapshot).await;
        }
    }

    /// Loads the newest snapshot known for `peer_id`, preferring the local
    /// ring over the durable store (the ring is updated more frequently).
    async fn load_local(&self, peer_id: PeerId) -> Option<GameSnapshot> {
        let rings = self.rings.read().await;
        rings.get(&peer_id).and_then(|r| r.latest()).cloned()
    }

    /// Recovery per §4.8: fail fast past the timeout, otherwise prefer the
    /// ring, fall back to the durable store, and merge server-authoritative
    /// fields over whatever the local snapshot disagrees on. `server_state`
    /// is the result of an optional live state-sync request; pass `None`
    /// when that request failed or was skipped.
    pub async fn recover_game_state(
        &self,
        peer_id: PeerId,
        room_id: RoomId,
        disconnected_at_ms: i64,
        now_ms: i64,
        server_state: Option<GameSnapshot>,
    ) -> Result<GameSnapshot, ReconnectionError> {
        if now_ms - disconnected_at_ms > RECOVERY_TIMEOUT_MS {
            return Err(ReconnectionError::RecoveryTimeout);
        }

        let local = match self.load_local(peer_id).await {
            Some(snapshot) => Some(snapshot),
            None => self.store.get(room_id).await,
        };

        match (local, server_state) {
            (Some(local), Some(server)) => Ok(merge_recovery(local, server)),
            (Some(local), None) => Ok(local),
            (None, Some(server)) => Ok(server),
            (None, None) => Err(ReconnectionError::NoSnapshot),
        }
    }
}

/// Server values win for authoritative fields (scores, move counts, turn);
/// local values fill in anything the server didn't supply.
fn merge_recovery(local: GameSnapshot, server: GameSnapshot) -> GameSnapshot {
    let mut merged = local;
    merged.state.counters = server.state.counters;
    merged.state.current_turn = server.state.current_turn;
    merged.state.version = server.state.version;
    merged.state.timestamp = server.state.timestamp;
    merged.last_synced_move_number = server.last_synced_move_number;
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

fn bucket_latency(rolling_average_ms: f64) -> LatencyQuality {
    if rolling_average_ms < 50.0 {
        LatencyQuality::Excellent
    } else if rolling_average_ms < 100.0 {
        LatencyQuality::Good
    } else if rolling_average_ms < 200.0 {
        LatencyQuality::Fair
    } else {
        LatencyQuality::Poor
    }
}

/// Rolling connection-quality monitor for one peer: bucketed latency plus
/// jitter (population stddev) over the last `QUALITY_WINDOW` samples.
pub struct QualityMonitor {
    samples: VecDeque<f64>,
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityMonitor {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(QUALITY_WINDOW),
        }
    }

    pub fn record_latency(&mut self, latency_ms: f64) {
        self.samples.push_back(latency_ms);
        while self.samples.len() > QUALITY_WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn rolling_average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn jitter(&self) -> Option<f64> {
        let mean = self.rolling_average()?;
        if self.samples.is_empty() {
            return None;
        }
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(variance.sqrt())
    }

    pub fn quality(&self) -> Option<LatencyQuality> {
        self.rolling_average().map(bucket_latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StateSnapshot;
    use uuid::Uuid;

    fn snapshot(room_id: RoomId, peer_id: PeerId, version: u64) -> GameSnapshot {
        GameSnapshot {
            timestamp: 0,
            room_id,
            peer_id,
            opponent_id: None,
            state: StateSnapshot {
                version,
                ..StateSnapshot::empty(3, 3)
            },
            move_history: Vec::new(),
            last_synced_move_number: 0,
        }
    }

    #[tokio::test]
    async fn save_then_recover_returns_local_snapshot() {
        let manager = ReconnectionManager::new(Arc::new(InProcessSnapshotStore::new()));
        let peer = Uuid::new_v4();
        let room = Uuid::new_v4();
        manager.save_snapshot(peer, snapshot(room, peer, 1), 0).await;

        let recovered = manager
            .recover_game_state(peer, room, 1_000, 2_000, None)
            .await
            .unwrap();
        assert_eq!(recovered.state.version, 1);
    }

    #[tokio::test]
    async fn recovery_past_timeout_fails() {
        let manager = ReconnectionManager::new(Arc::new(InProcessSnapshotStore::new()));
        let peer = Uuid::new_v4();
        let room = Uuid::new_v4();
        manager.save_snapshot(peer, snapshot(room, peer, 1), 0).await;

        let err = manager
            .recover_game_state(peer, room, 0, 70_000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconnectionError::RecoveryTimeout));
    }

    #[tokio::test]
    async fn recovery_with_no_snapshot_anywhere_fails() {
        let manager = ReconnectionManager::new(Arc::new(InProcessSnapshotStore::new()));
        let err = manager
            .recover_game_state(Uuid::new_v4(), Uuid::new_v4(), 0, 1_000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconnectionError::NoSnapshot));
    }

    #[tokio::test]
    async fn recovery_merge_prefers_server_authoritative_fields() {
        let manager = ReconnectionManager::new(Arc::new(InProcessSnapshotStore::new()));
        let peer = Uuid::new_v4();
        let room = Uuid::new_v4();
        let mut local = snapshot(room, peer, 1);
        local.state.counters.host_score = 1;
        manager.save_snapshot(peer, local, 0).await;

        let mut server = snapshot(room, peer, 5);
        server.state.counters.host_score = 99;
        server.last_synced_move_number = 7;

        let recovered = manager
            .recover_game_state(peer, room, 1_000, 2_000, Some(server))
            .await
            .unwrap();
        assert_eq!(recovered.state.counters.host_score, 99);
        assert_eq!(recovered.state.version, 5);
        assert_eq!(recovered.last_synced_move_number, 7);
    }

    #[tokio::test]
    async fn redundant_saves_within_interval_do_not_repersist() {
        let store = Arc::new(InProcessSnapshotStore::new());
        let manager = ReconnectionManager::new(store.clone());
        let peer = Uuid::new_v4();
        let room = Uuid::new_v4();

        manager.save_snapshot(peer, snapshot(room, peer, 1), 0).await;
        manager.save_snapshot(peer, snapshot(room, peer, 2), 1_000).await;

        let persisted = store.get(room).await.unwrap();
        assert_eq!(persisted.state.version, 1);
    }

    #[test]
    fn quality_buckets_match_thresholds() {
        assert_eq!(bucket_latency(10.0), LatencyQuality::Excellent);
        assert_eq!(bucket_latency(75.0), LatencyQuality::Good);
        assert_eq!(bucket_latency(150.0), LatencyQuality::Fair);
        assert_eq!(bucket_latency(500.0), LatencyQuality::Poor);
    }

    #[test]
    fn jitter_is_zero_for_constant_samples() {
        let mut monitor = QualityMonitor::new();
        for _ in 0..5 {
            monitor.record_latency(40.0);
        }
        assert_eq!(monitor.jitter(), Some(0.0));
        assert_eq!(monitor.quality(), Some(LatencyQuality::Excellent));
    }
}
