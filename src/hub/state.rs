//! Shared Hub state: the single `Arc`'d object every connection task and
//! background task holds a handle to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::matchmaker::Matchmaker;
use crate::protocol::{MatchMode, PeerId, RoomId, ServerMessage};
use crate::reconnection::{InProcessSnapshotStore, ReconnectionManager};
use crate::room::{Fanout, FanoutSink, RoomRegistry};

use super::peer::{PeerHandle, PeerRegistry};

pub struct HubState {
    pub config: Arc<HubConfig>,
    pub rooms: RoomRegistry,
    pub matchmaker: Matchmaker,
    pub peers: PeerRegistry,
    pub reconnection: ReconnectionManager,
}

impl HubState {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let rooms = RoomRegistry::new(
            true,
            config.reconnection_window(),
            Duration::from_secs(1),
        );
        let reconnection = ReconnectionManager::new(Arc::new(InProcessSnapshotStore::new()));
        Arc::new(Self {
            config: Arc::new(config),
            rooms,
            matchmaker: Matchmaker::new(),
            peers: PeerRegistry::new(),
            reconnection,
        })
    }

    /// Spawns the Hub's own periodic housekeeping: the Room Registry
    /// sweeper and the Matchmaker drain (§5).
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let config = self.config.clone();
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.room_sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                hub.rooms
                    .sweep_once(now_ms, config.idle_room_ttl(), config.room_empty_grace())
                    .await;
            }
        });

        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.matchmake_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.drain_matchmaker_once().await;
            }
        });
    }

    async fn drain_matchmaker_once(self: &Arc<Self>) {
        loop {
            let hub = self.clone();
            let pair = self
                .matchmaker
                .drain_one_pair(move |peer_id| hub.peers.get(peer_id).is_some())
                .await;
            let Some((first, second)) = pair else { break };

            let room_id = self.rooms.create(self.clone(), chrono::Utc::now().timestamp_millis());
            let Ok(handle) = self.rooms.get(room_id) else { continue };
            let _ = handle.add_player(first.peer_id).await;
            let _ = handle.add_player(second.peer_id).await;

            if let Some(peer) = self.peers.get(first.peer_id) {
                peer.set_room_id(Some(room_id)).await;
            }
            if let Some(peer) = self.peers.get(second.peer_id) {
                peer.set_room_id(Some(room_id)).await;
            }
            tracing::info!(%room_id, a = %first.peer_id, b = %second.peer_id, "matchmade pair");
        }
    }

    pub async fn register_peer(self: &Arc<Self>, peer_id: PeerId) -> PeerHandle {
        let handle = PeerHandle::new(peer_id, self.config.outbound_queue_capacity);
        self.peers.insert(handle.clone());
        handle
    }

    pub async fn disconnect_peer(self: &Arc<Self>, peer_id: PeerId) {
        if let Some(handle) = self.peers.get(peer_id) {
            if let Some(room_id) = handle.room_id().await {
                if let Ok(room) = self.rooms.get(room_id) {
                    room.remove_peer(peer_id).await;
                }
            }
        }
        let _ = self.matchmaker.cancel(peer_id).await;
        self.peers.remove(peer_id);
    }

    pub async fn create_room(self: &Arc<Self>, peer_id: PeerId) -> Result<RoomId, HubError> {
        let room_id = self.rooms.create(self.clone(), chrono::Utc::now().timestamp_millis());
        let handle = self.rooms.get(room_id)?;
        handle.add_player(peer_id).await?;
        if let Some(peer) = self.peers.get(peer_id) {
            peer.set_room_id(Some(room_id)).await;
        }
        Ok(room_id)
    }

    pub async fn join_room(self: &Arc<Self>, room_id: RoomId, peer_id: PeerId) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.add_player(peer_id).await?;
        if let Some(peer) = self.peers.get(peer_id) {
            peer.set_room_id(Some(room_id)).await;
        }
        Ok(())
    }

    pub async fn join_as_spectator(self: &Arc<Self>, room_id: RoomId, peer_id: PeerId) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.add_spectator(peer_id).await?;
        if let Some(peer) = self.peers.get(peer_id) {
            peer.set_room_id(Some(room_id)).await;
        }
        Ok(())
    }

    pub async fn leave_room(self: &Arc<Self>, room_id: RoomId, peer_id: PeerId) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.remove_peer(peer_id).await;
        if let Some(peer) = self.peers.get(peer_id) {
            peer.set_room_id(None).await;
        }
        Ok(())
    }

    pub async fn find_match(self: &Arc<Self>, peer_id: PeerId, mode: MatchMode, enqueued_at: i64) {
        self.matchmaker.enqueue(peer_id, mode, enqueued_at).await;
    }

    pub async fn cancel_matchmaking(self: &Arc<Self>, peer_id: PeerId) -> Result<(), HubError> {
        self.matchmaker.cancel(peer_id).await?;
        Ok(())
    }

    pub async fn record_move(
        self: &Arc<Self>,
        room_id: RoomId,
        peer_id: PeerId,
        mv: crate::protocol::MoveToken,
    ) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.record_move(peer_id, mv).await?;
        Ok(())
    }

    pub async fn record_snapshot(
        self: &Arc<Self>,
        room_id: RoomId,
        peer_id: PeerId,
        snapshot: crate::protocol::StateSnapshot,
    ) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.record_snapshot(peer_id, snapshot).await?;
        Ok(())
    }

    pub async fn reconnect(self: &Arc<Self>, room_id: RoomId, peer_id: PeerId) -> Result<(), HubError> {
        let handle = self.rooms.get(room_id)?;
        handle.reconnect(peer_id).await?;
        if let Some(peer) = self.peers.get(peer_id) {
            peer.set_room_id(Some(room_id)).await;
        }
        Ok(())
    }

    /// Relays a chat line to the rest of the room unchanged (§6: reserved,
    /// core routes unmodified).
    pub async fn relay_chat(self: &Arc<Self>, room_id: RoomId, peer_id: PeerId, message: String) {
        if let Ok(handle) = self.rooms.get(room_id) {
            handle
                .broadcast(
                    ServerMessage::Chat { room_id, message },
                    Some(peer_id),
                )
                .await;
        }
    }
}

#[async_trait]
impl FanoutSink for HubState {
    async fn deliver(&self, fanout: Fanout) {
        if let Some(peer) = self.peers.get(fanout.target) {
            let outcome = peer.send(fanout.message, fanout.critical).await;
            if outcome == super::outbound::PushOutcome::Aborted {
                tracing::warn!(peer_id = %fanout.target, "outbound queue full of critical frames, aborting");
                let _ = peer
                    .send(
                        ServerMessage::Error {
                            code: crate::protocol::ErrorCode::BackpressureAbort,
                            message: crate::protocol::ErrorCode::BackpressureAbort.to_string(),
                            details: None,
                        },
                        true,
                    )
                    .await;
            }
        }
    }
}
