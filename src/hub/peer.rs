//! Connected-peer bookkeeping: the outbound queue, current room
//! association, and the heartbeat/quality state the Transport updates on
//! every PING/PONG round trip (§4.2, §4.8 quality monitor).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::protocol::{PeerId, RoomId};
use crate::reconnection::QualityMonitor;

use super::outbound::{OutboundQueue, PushOutcome};

/// Shared handle to one connected peer's send-side state. Cheap to clone;
/// the actual queue and quality monitor live behind `Arc`/`Mutex`.
#[derive(Clone)]
pub struct PeerHandle {
    pub peer_id: PeerId,
    pub queue: Arc<OutboundQueue>,
    room_id: Arc<Mutex<Option<RoomId>>>,
    quality: Arc<Mutex<QualityMonitor>>,
    missed_pongs: Arc<AtomicI64>,
    ema_latency_ms: Arc<Mutex<Option<f64>>>,
}

const LATENCY_EMA_ALPHA: f64 = 0.3;

impl PeerHandle {
    pub fn new(peer_id: PeerId, outbound_queue_capacity: usize) -> Self {
        Self {
            peer_id,
            queue: Arc::new(OutboundQueue::new(outbound_queue_capacity)),
            room_id: Arc::new(Mutex::new(None)),
            quality: Arc::new(Mutex::new(QualityMonitor::new())),
            missed_pongs: Arc::new(AtomicI64::new(0)),
            ema_latency_ms: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        *self.room_id.lock().await
    }

    pub async fn set_room_id(&self, room_id: Option<RoomId>) {
        *self.room_id.lock().await = room_id;
    }

    pub async fn send(&self, message: crate::protocol::ServerMessage, critical: bool) -> PushOutcome {
        self.queue.push(message, critical).await
    }

    /// Records a PONG round trip, resetting the missed-pong counter and
    /// smoothing latency with an EMA (α=0.3).
    pub async fn record_pong(&self, latency_ms: f64) {
        self.missed_pongs.store(0, Ordering::Relaxed);
        let mut ema = self.ema_latency_ms.lock().await;
        *ema = Some(match *ema {
            Some(prev) => LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * prev,
            None => latency_ms,
        });
        drop(ema);
        self.quality.lock().await.record_latency(latency_ms);
    }

    /// Called on every heartbeat tick that elapses without a PONG. Returns
    /// the new missed count so the caller can compare against the
    /// configured loss threshold.
    pub fn record_missed_pong(&self) -> i64 {
        self.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn latency_ms(&self) -> Option<f64> {
        *self.ema_latency_ms.lock().await
    }

    pub async fn quality(&self) -> Option<crate::reconnection::LatencyQuality> {
        self.quality.lock().await.quality()
    }
}

/// Hub-wide map of connected peers. Mutations (insert/remove) are the only
/// writer discipline this map needs to honor; `DashMap` keeps concurrent
/// lookups lock-free on the hot message-routing path.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerHandle>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: PeerHandle) {
        self.peers.insert(handle.peer_id, handle);
    }

    pub fn get(&self, peer_id: PeerId) -> Option<PeerHandle> {
        self.peers.get(&peer_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, peer_id: PeerId) {
        self.peers.remove(&peer_id);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn registry_insert_get_remove() {
        let registry = PeerRegistry::new();
        let handle = PeerHandle::new(Uuid::new_v4(), 256);
        let peer_id = handle.peer_id;
        registry.insert(handle);
        assert!(registry.get(peer_id).is_some());
        registry.remove(peer_id);
        assert!(registry.get(peer_id).is_none());
    }

    #[tokio::test]
    async fn pong_round_trip_smooths_latency_and_resets_missed_count() {
        let handle = PeerHandle::new(Uuid::new_v4(), 256);
        handle.record_missed_pong();
        handle.record_missed_pong();
        handle.record_pong(40.0).await;
        assert_eq!(handle.latency_ms().await, Some(40.0));
        handle.record_pong(80.0).await;
        let smoothed = handle.latency_ms().await.unwrap();
        assert!((smoothed - 52.0).abs() < 0.01);
    }
}
