//! The serial task that owns one [`Room`]'s mutable state (§5: "Each Room's
//! internal state: mutated only from that Room's serial task. All
//! cross-task access goes through message passing into the room's inbound
//! channel.").
//!
//! The actor itself knows nothing about WebSockets or the peer registry; it
//! hands every [`Fanout`] produced by a `Room` operation to a [`FanoutSink`],
//! which the Hub implements to push frames into peer outbound queues. This
//! keeps the room module testable without a running Hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::RoomError;
use crate::protocol::{MoveToken, PeerId, PlayerRole, RoomId, ServerMessage, StateSnapshot};

use super::room::{Fanout, Room, RoomSummary};

/// Delivers fanout frames produced by room operations to their targets.
/// Implemented by `crate::hub::HubState` against the live peer registry.
#[async_trait]
pub trait FanoutSink: Send + Sync {
    async fn deliver(&self, fanout: Fanout);
}

#[derive(Debug)]
pub enum RoomCommand {
    AddPlayer {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    AddSpectator {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    RemovePeer {
        peer_id: PeerId,
    },
    RecordMove {
        peer_id: PeerId,
        mv: MoveToken,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    RecordSnapshot {
        peer_id: PeerId,
        snapshot: StateSnapshot,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Reconnect {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Broadcast {
        message: ServerMessage,
        except: Option<PeerId>,
    },
    RoleOf {
        peer_id: PeerId,
        reply: oneshot::Sender<PlayerRole>,
    },
    Summary {
        reply: oneshot::Sender<RoomSummary>,
    },
    OpponentOf {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<PeerId>>,
    },
    Shutdown,
}

/// A cheap, cloneable reference to a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: RoomId,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub async fn add_player(&self, peer_id: PeerId) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::AddPlayer { peer_id, reply }).await
    }

    pub async fn add_spectator(&self, peer_id: PeerId) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::AddSpectator { peer_id, reply }).await
    }

    pub async fn remove_peer(&self, peer_id: PeerId) {
        let _ = self.tx.send(RoomCommand::RemovePeer { peer_id }).await;
    }

    pub async fn record_move(&self, peer_id: PeerId, mv: MoveToken) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::RecordMove { peer_id, mv, reply }).await
    }

    pub async fn record_snapshot(
        &self,
        peer_id: PeerId,
        snapshot: StateSnapshot,
    ) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::RecordSnapshot {
            peer_id,
            snapshot,
            reply,
        })
        .await
    }

    pub async fn reconnect(&self, peer_id: PeerId) -> Result<(), RoomError> {
        self.call(|reply| RoomCommand::Reconnect { peer_id, reply }).await
    }

    pub async fn broadcast(&self, message: ServerMessage, except: Option<PeerId>) {
        let _ = self.tx.send(RoomCommand::Broadcast { message, except }).await;
    }

    pub async fn role_of(&self, peer_id: PeerId) -> PlayerRole {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(RoomCommand::RoleOf { peer_id, reply: reply_tx })
            .await
            .is_err()
        {
            return PlayerRole::None;
        }
        reply_rx.await.unwrap_or(PlayerRole::None)
    }

    pub async fn summary(&self) -> Option<RoomSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(RoomCommand::Summary { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    pub async fn opponent_of(&self, peer_id: PeerId) -> Option<PeerId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::OpponentOf { peer_id, reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RoomCommand::Shutdown).await;
    }

    async fn call<F>(&self, make_cmd: F) -> Result<(), RoomError>
    where
        F: FnOnce(oneshot::Sender<Result<(), RoomError>>) -> RoomCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make_cmd(reply_tx)).await.is_err() {
            return Err(RoomError::NotAPlayer);
        }
        reply_rx.await.unwrap_or(Err(RoomError::NotAPlayer))
    }
}

/// Spawns the serial task owning `room` and returns a handle to it.
///
/// `sweep_interval` drives the internal tick that expires awaiting-reconnect
/// slots (§4.4 failure semantics); it is independent of the Room Registry's
/// own 30s sweep, which only reaps whole rooms.
pub fn spawn(
    room: Room,
    sink: Arc<dyn FanoutSink>,
    sweep_interval: Duration,
) -> RoomHandle {
    let room_id = room.id;
    let (tx, mut rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut room = room;
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_cmd = rx.recv() => {
                    let Some(cmd) = maybe_cmd else { break };
                    if !handle_command(&mut room, &sink, cmd).await {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let fanout = room.expire_awaiting_reconnects(Instant::now());
                    for f in fanout {
                        sink.deliver(f).await;
                    }
                    room.note_empty_if_applicable(Instant::now());
                }
            }
        }
    });

    RoomHandle { room_id, tx }
}

async fn handle_command(room: &mut Room, sink: &Arc<dyn FanoutSink>, cmd: RoomCommand) -> bool {
    match cmd {
        RoomCommand::AddPlayer { peer_id, reply } => {
            let result = room.add_player(peer_id);
            reply_with_fanout(sink, reply, result).await;
        }
        RoomCommand::AddSpectator { peer_id, reply } => {
            let result = room.add_spectator(peer_id);
            reply_with_fanout(sink, reply, result).await;
        }
        RoomCommand::RemovePeer { peer_id } => {
            for f in room.remove_peer(peer_id, Instant::now()) {
                sink.deliver(f).await;
            }
        }
        RoomCommand::RecordMove { peer_id, mv, reply } => {
            let result = room.record_move(peer_id, mv);
            reply_with_fanout(sink, reply, result).await;
        }
        RoomCommand::RecordSnapshot {
            peer_id,
            snapshot,
            reply,
        } => {
            let result = room.record_snapshot(peer_id, snapshot);
            reply_with_fanout(sink, reply, result).await;
        }
        RoomCommand::Reconnect { peer_id, reply } => {
            let result = room.reconnect(peer_id);
            reply_with_fanout(sink, reply, result).await;
        }
        RoomCommand::Broadcast { message, except } => {
            for f in room.broadcast(message, except, false) {
                sink.deliver(f).await;
            }
        }
        RoomCommand::RoleOf { peer_id, reply } => {
            let _ = reply.send(room.role_of(peer_id));
        }
        RoomCommand::Summary { reply } => {
            let _ = reply.send(room.summary());
        }
        RoomCommand::OpponentOf { peer_id, reply } => {
            let _ = reply.send(room.opponent_of(peer_id));
        }
        RoomCommand::Shutdown => return false,
    }
    true
}

async fn reply_with_fanout(
    sink: &Arc<dyn FanoutSink>,
    reply: oneshot::Sender<Result<(), RoomError>>,
    result: Result<Vec<Fanout>, RoomError>,
) {
    match result {
        Ok(fanout) => {
            for f in fanout {
                sink.deliver(f).await;
            }
            let _ = reply.send(Ok(()));
        }
        Err(e) => {
            let _ = reply.send(Err(e));
        }
    }
}
