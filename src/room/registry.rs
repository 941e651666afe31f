//! Room Registry (§4.3): room id → Room mapping, lifecycle, and the
//! periodic sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::protocol::RoomId;

use super::actor::{self, FanoutSink, RoomHandle};
use super::room::Room;

/// Concurrent id → room-actor-handle map (§2.1 ambient stack: `dashmap`
/// avoids a single coarse mutex on the hot join/lookup path while
/// registry *mutations* — insert/remove — still go through this one
/// owner, satisfying the single-writer discipline of §5).
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomHandle>,
    empty_since: DashMap<RoomId, Instant>,
    spectating_enabled: bool,
    recovery_window: Duration,
    reconnect_tick: Duration,
}

impl RoomRegistry {
    pub fn new(spectating_enabled: bool, recovery_window: Duration, reconnect_tick: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            empty_since: DashMap::new(),
            spectating_enabled,
            recovery_window,
            reconnect_tick,
        }
    }

    /// Creates a new room and spawns its owning actor task. Room ids are
    /// UUID v4 — well past the suggested 48-bit-of-entropy floor for
    /// non-enumerability (§4.3).
    pub fn create(&self, sink: Arc<dyn FanoutSink>, created_at_ms: i64) -> RoomId {
        let room_id = Uuid::new_v4();
        let room = Room::new(
            room_id,
            created_at_ms,
            self.spectating_enabled,
            self.recovery_window,
        );
        let handle = actor::spawn(room, sink, self.reconnect_tick);
        self.rooms.insert(room_id, handle);
        room_id
    }

    pub fn get(&self, room_id: RoomId) -> Result<RoomHandle, RegistryError> {
        self.rooms
            .get(&room_id)
            .map(|entry| entry.clone())
            .ok_or(RegistryError::NotFound)
    }

    pub async fn dispose(&self, room_id: RoomId) {
        if let Some((_, handle)) = self.rooms.remove(&room_id) {
            handle.shutdown().await;
        }
        self.empty_since.remove(&room_id);
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// One pass of the periodic sweeper (§4.3: every 30s, reap rooms empty
    /// for >= 60s or older than the idle TTL).
    pub async fn sweep_once(&self, now_ms: i64, idle_ttl: Duration, empty_grace: Duration) {
        let now = Instant::now();
        let ids: Vec<RoomId> = self.rooms.iter().map(|entry| *entry.key()).collect();

        for room_id in ids {
            let Ok(handle) = self.get(room_id) else {
                continue;
            };
            let Some(summary) = handle.summary().await else {
                // Actor already gone; drop our bookkeeping for it.
                self.rooms.remove(&room_id);
                self.empty_since.remove(&room_id);
                continue;
            };

            let age_ms = now_ms.saturating_sub(summary.created_at);
            if age_ms as u64 >= idle_ttl.as_millis() as u64 {
                tracing::info!(%room_id, age_ms, "room exceeded idle TTL; disposing");
                self.dispose(room_id).await;
                continue;
            }

            let is_empty = summary.player_count == 0 && summary.spectator_count == 0;
            if is_empty {
                let since = *self.empty_since.entry(room_id).or_insert(now);
                if now.saturating_duration_since(since) >= empty_grace {
                    tracing::info!(%room_id, "room empty past grace period; disposing");
                    self.dispose(room_id).await;
                }
            } else {
                self.empty_since.remove(&room_id);
            }
        }
    }

    /// Spawns the background sweeper task (§5: periodic housekeeping,
    /// every `interval`).
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_ttl: Duration,
        empty_grace: Duration,
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                self.sweep_once(now_ms, idle_ttl, empty_grace).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::room::Fanout;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl FanoutSink for NullSink {
        async fn deliver(&self, _fanout: Fanout) {}
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = RoomRegistry::new(true, Duration::from_secs(30), Duration::from_secs(1));
        let room_id = registry.create(Arc::new(NullSink), 0);
        assert!(registry.get(room_id).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_room_is_not_found() {
        let registry = RoomRegistry::new(true, Duration::from_secs(30), Duration::from_secs(1));
        let err = registry.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
    }

    #[tokio::test]
    async fn sweep_disposes_room_past_idle_ttl() {
        let registry = RoomRegistry::new(true, Duration::from_secs(30), Duration::from_secs(1));
        let room_id = registry.create(Arc::new(NullSink), 0);
        registry
            .sweep_once(10_000_000, Duration::from_secs(1), Duration::from_secs(3600))
            .await;
        assert!(registry.get(room_id).is_err());
    }

    #[tokio::test]
    async fn dispose_removes_the_room() {
        let registry = RoomRegistry::new(true, Duration::from_secs(30), Duration::from_secs(1));
        let room_id = registry.create(Arc::new(NullSink), 0);
        registry.dispose(room_id).await;
        assert!(registry.get(room_id).is_err());
    }
}
