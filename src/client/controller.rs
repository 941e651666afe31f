//! Peer Session Controller (§4.9): the single API surface a game app talks
//! to. Composes the Transport with a State Synchronizer, Conflict Resolver,
//! and Reconnection Manager, and drives the observable session state
//! machine (DISCONNECTED → CONNECTING → CONNECTED → IN_LOBBY/IN_ROOM →
//! IN_BATTLE, plus RECONNECTING and ERROR from any state).
//!
//! The game engine itself is never reached into directly: it is consumed
//! through [`GameEngineSnapshot`] (read-only) and driven through
//! [`GameEngineCommands`] (apply opponent move / apply resolved state), each
//! supplied by the caller. The controller holds no knowledge of match-3
//! rules beyond the opaque [`StateSnapshot`] it already exchanges over the
//! wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::conflict::{detect_conflict, resolve_conflict, ConflictStats};
use crate::error::ControllerError;
use crate::protocol::{
    ClientMessage, ConflictPolicy, ConflictRecord, ErrorCode, GameSnapshot, MatchMode, MoveToken,
    PeerId, Position, RoomId, ServerMessage, StateSnapshot, SyncMode,
};
use crate::reconnection::ReconnectionManager;
use crate::sync::{accept_remote_version, StateSynchronizer};

use super::transport::{Transport, TransportState};

const ROOM_OP_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSPORT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MOVE_HISTORY_CAPACITY: usize = 64;

/// A read-only view onto the surrounding game app's own state. Implemented
/// by the app, not the core; the controller calls this to produce outbound
/// `STATE_SYNC` frames.
pub trait GameEngineSnapshot: Send + Sync {
    fn capture(&self) -> StateSnapshot;
}

/// The command seam the controller drives the game app through. Implemented
/// by the app; the controller never mutates game rules directly.
pub trait GameEngineCommands: Send + Sync {
    fn apply_opponent_move(&self, mv: &MoveToken);
    fn apply_state(&self, state: &StateSnapshot);
}

/// Observable session state machine (§4.9). `InLobby` covers the span
/// between `find_match()` and a room being assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    InLobby,
    InRoom,
    InBattle,
    Reconnecting,
    Error,
}

/// Everything the app can subscribe to in one stream, instead of juggling a
/// channel per concern.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    SessionStateChanged(SessionState),
    StateSynced(StateSnapshot),
    OpponentMove(MoveToken),
    ConflictDetected(ConflictRecord),
    GameEnded {
        winner: Option<PeerId>,
        reason: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub enable_auto_sync: bool,
    pub sync_interval: Duration,
    pub sync_mode: SyncMode,
    pub conflict_policy: ConflictPolicy,
    /// Capacity of the conflict record ring kept for observability (§3 / §6);
    /// mirrors `HubConfig::conflict_ring_size`.
    pub conflict_ring_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enable_auto_sync: true,
            sync_interval: Duration::from_millis(5000),
            sync_mode: SyncMode::default(),
            conflict_policy: ConflictPolicy::default(),
            conflict_ring_size: crate::config::defaults::default_conflict_ring_size(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoomJoinOutcome {
    pub room_id: RoomId,
    pub opponent_id: Option<PeerId>,
    pub peer_count: u32,
}

enum RoomOutcome {
    Created(RoomId),
    Joined(RoomJoinOutcome),
}

pub struct PeerSessionController {
    transport: Arc<Transport>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>,
    engine_snapshot: Arc<dyn GameEngineSnapshot>,
    engine_commands: Arc<dyn GameEngineCommands>,
    synchronizer: Mutex<StateSynchronizer>,
    conflict_policy: ConflictPolicy,
    conflict_stats: Mutex<ConflictStats>,
    reconnection: Arc<ReconnectionManager>,
    session_state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<ControllerEvent>,
    room_id: Mutex<Option<RoomId>>,
    opponent_id: Mutex<Option<PeerId>>,
    move_counter: AtomicU64,
    move_history: Mutex<VecDeque<MoveToken>>,
    pending_room_reply: Mutex<Option<oneshot::Sender<Result<RoomOutcome, ControllerError>>>>,
    enable_auto_sync: bool,
    sync_interval: Duration,
    auto_sync_handle: Mutex<Option<JoinHandle<()>>>,
    disconnected_at_ms: Mutex<Option<i64>>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSessionController {
    pub fn new(
        url: impl Into<String>,
        engine_snapshot: Arc<dyn GameEngineSnapshot>,
        engine_commands: Arc<dyn GameEngineCommands>,
        reconnection: Arc<ReconnectionManager>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (transport, events_rx) = Transport::new(url);
        let (session_state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            transport,
            events_rx: Mutex::new(Some(events_rx)),
            engine_snapshot,
            engine_commands,
            synchronizer: Mutex::new(StateSynchronizer::new(options.sync_mode)),
            conflict_policy: options.conflict_policy,
            conflict_stats: Mutex::new(ConflictStats::with_capacity(options.conflict_ring_size)),
            reconnection,
            session_state_tx,
            events_tx,
            room_id: Mutex::new(None),
            opponent_id: Mutex::new(None),
            move_counter: AtomicU64::new(0),
            move_history: Mutex::new(VecDeque::with_capacity(MOVE_HISTORY_CAPACITY)),
            pending_room_reply: Mutex::new(None),
            enable_auto_sync: options.enable_auto_sync,
            sync_interval: options.sync_interval,
            auto_sync_handle: Mutex::new(None),
            disconnected_at_ms: Mutex::new(None),
            run_handle: Mutex::new(None),
            pump_handle: Mutex::new(None),
            watch_handle: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events_tx.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_state_tx.borrow()
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        *self.room_id.lock().await
    }

    pub async fn opponent_id(&self) -> Option<PeerId> {
        *self.opponent_id.lock().await
    }

    pub async fn peer_id(&self) -> Option<PeerId> {
        self.transport.peer_id().await
    }

    pub async fn latency_ms(&self) -> Option<f64> {
        self.transport.latency_ms().await
    }

    /// Connects to the Hub and waits for the `CONNECT` handshake, failing
    /// after 10 s (§5 Cancellation and timeouts).
    pub async fn connect(self: &Arc<Self>) -> Result<(), ControllerError> {
        let events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(ControllerError::AlreadyConnected)?;

        self.set_session_state(SessionState::Connecting);

        let run_transport = self.transport.clone();
        let run_handle = tokio::spawn(run_transport.run());
        *self.run_handle.lock().await = Some(run_handle);

        let pump_controller = self.clone();
        let pump_handle = tokio::spawn(async move { pump_controller.pump_events(events_rx).await });
        *self.pump_handle.lock().await = Some(pump_handle);

        let watch_controller = self.clone();
        let watch_handle = tokio::spawn(async move { watch_controller.mirror_transport_state().await });
        *self.watch_handle.lock().await = Some(watch_handle);

        let transport = self.transport.clone();
        let wait = tokio::time::timeout(CONNECT_TIMEOUT, async move {
            while transport.state().await != TransportState::Connected {
                tokio::time::sleep(TRANSPORT_POLL_INTERVAL).await;
            }
        })
        .await;

        match wait {
            Ok(()) => Ok(()),
            Err(_) => {
                self.set_session_state(SessionState::Error);
                Err(ControllerError::ConnectTimeout)
            }
        }
    }

    pub async fn create_room(&self) -> Result<RoomId, ControllerError> {
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        let (tx, rx) = oneshot::channel();
        *self.pending_room_reply.lock().await = Some(tx);
        self.transport.send(ClientMessage::CreateRoom { peer_id }).await;

        match tokio::time::timeout(ROOM_OP_TIMEOUT, rx).await {
            Ok(Ok(Ok(RoomOutcome::Created(room_id)))) => Ok(room_id),
            Ok(Ok(Ok(RoomOutcome::Joined(_)))) => Err(ControllerError::UnexpectedReply),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) | Err(_) => {
                *self.pending_room_reply.lock().await = None;
                Err(ControllerError::CreateRoomTimeout)
            }
        }
    }

    pub async fn join_room(&self, room_id: RoomId) -> Result<RoomJoinOutcome, ControllerError> {
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        let (tx, rx) = oneshot::channel();
        *self.pending_room_reply.lock().await = Some(tx);
        self.transport
            .send(ClientMessage::JoinRoom { room_id, peer_id })
            .await;

        match tokio::time::timeout(ROOM_OP_TIMEOUT, rx).await {
            Ok(Ok(Ok(RoomOutcome::Joined(outcome)))) => Ok(outcome),
            Ok(Ok(Ok(RoomOutcome::Created(_)))) => Err(ControllerError::UnexpectedReply),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) | Err(_) => {
                *self.pending_room_reply.lock().await = None;
                Err(ControllerError::JoinRoomTimeout)
            }
        }
    }

    pub async fn leave_room(&self) -> Result<(), ControllerError> {
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        let room_id = (*self.room_id.lock().await).ok_or(ControllerError::NoRoom)?;
        self.transport
            .send(ClientMessage::LeaveRoom { room_id, peer_id })
            .await;
        *self.room_id.lock().await = None;
        self.transport.set_room_id(None).await;
        self.stop_auto_sync().await;
        self.set_session_state(SessionState::Connected);
        Ok(())
    }

    /// Enters the matchmaking queue. Pairing itself arrives later as a
    /// `ROOM_JOINED`/`GAME_START` pair, observed via [`Self::subscribe`].
    pub async fn find_match(&self, mode: MatchMode) -> Result<(), ControllerError> {
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        self.transport.send(ClientMessage::FindMatch { peer_id, mode }).await;
        self.set_session_state(SessionState::InLobby);
        Ok(())
    }

    /// Convenience wrapper implementing the client-side 60 s matchmaking
    /// timeout (§5): cancels with the Hub if no room is assigned in time.
    pub async fn find_match_and_wait(
        &self,
        mode: MatchMode,
        timeout: Duration,
    ) -> Result<RoomId, ControllerError> {
        self.find_match(mode).await?;
        let mut state_rx = self.session_state_tx.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return None;
                }
                if *state_rx.borrow() == SessionState::InRoom {
                    if let Some(room_id) = *self.room_id.lock().await {
                        return Some(room_id);
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(Some(room_id)) => Ok(room_id),
            _ => {
                let _ = self.cancel_matchmaking().await;
                Err(ControllerError::MatchmakingTimeout)
            }
        }
    }

    pub async fn cancel_matchmaking(&self) -> Result<(), ControllerError> {
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        self.transport
            .send(ClientMessage::CancelMatchmaking { peer_id })
            .await;
        if self.session_state() == SessionState::InLobby {
            self.set_session_state(SessionState::Connected);
        }
        Ok(())
    }

    pub async fn execute_move(&self, pos_a: Position, pos_b: Position) -> Result<(), ControllerError> {
        if self.session_state() != SessionState::InBattle {
            return Err(ControllerError::NotInBattle);
        }
        let peer_id = self.transport.peer_id().await.ok_or(ControllerError::NotConnected)?;
        let room_id = (*self.room_id.lock().await).ok_or(ControllerError::NoRoom)?;

        let move_number = self.move_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mv = MoveToken {
            pos_a,
            pos_b,
            move_number,
            origin_peer_id: peer_id,
            server_timestamp: now_ms(),
        };
        self.push_move_history(mv.clone()).await;
        self.transport.send(ClientMessage::Move { room_id, mv }).await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.transport.close().await;
        self.stop_auto_sync().await;
        for handle in [
            self.pump_handle.lock().await.take(),
            self.run_handle.lock().await.take(),
            self.watch_handle.lock().await.take(),
        ] {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        self.set_session_state(SessionState::Disconnected);
    }

    fn set_session_state(&self, state: SessionState) {
        if *self.session_state_tx.borrow() == state {
            return;
        }
        let _ = self.session_state_tx.send(state);
        let _ = self.events_tx.send(ControllerEvent::SessionStateChanged(state));
    }

    async fn push_move_history(&self, mv: MoveToken) {
        let mut history = self.move_history.lock().await;
        history.push_back(mv);
        while history.len() > MOVE_HISTORY_CAPACITY {
            history.pop_front();
        }
    }

    async fn pump_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ServerMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle_server_message(message).await;
        }
    }

    /// Polls the Transport's connection state and mirrors it onto the
    /// session state machine, driving reconnect recovery on the way back up.
    async fn mirror_transport_state(self: Arc<Self>) {
        let mut last = TransportState::Disconnected;
        loop {
            let current = self.transport.state().await;
            if current != last {
                match current {
                    TransportState::Connecting => {}
                    TransportState::Connected => {
                        if last == TransportState::Reconnecting {
                            self.attempt_reconnect_recovery().await;
                        } else if self.session_state() == SessionState::Connecting {
                            self.set_session_state(SessionState::Connected);
                        }
                    }
                    TransportState::Reconnecting => {
                        let mut disconnected_at = self.disconnected_at_ms.lock().await;
                        if disconnected_at.is_none() {
                            *disconnected_at = Some(now_ms());
                        }
                        drop(disconnected_at);
                        self.set_session_state(SessionState::Reconnecting);
                    }
                    TransportState::Failed => {
                        self.set_session_state(SessionState::Error);
                        return;
                    }
                    TransportState::Disconnected => return,
                }
                last = current;
            }
            tokio::time::sleep(TRANSPORT_POLL_INTERVAL).await;
        }
    }

    /// Best-effort local recovery while waiting for the Hub's `RECONNECTED`
    /// reply (handled separately in `handle_server_message`).
    async fn attempt_reconnect_recovery(&self) {
        let Some(peer_id) = self.transport.peer_id().await else {
            return;
        };
        let Some(room_id) = *self.room_id.lock().await else {
            self.set_session_state(SessionState::Connected);
            return;
        };

        self.transport
            .send(ClientMessage::Reconnect {
                peer_id,
                room_id,
                reconnection_token: peer_id.to_string(),
            })
            .await;

        let disconnected_at = self
            .disconnected_at_ms
            .lock()
            .await
            .take()
            .unwrap_or_else(now_ms);

        match self
            .reconnection
            .recover_game_state(peer_id, room_id, disconnected_at, now_ms(), None)
            .await
        {
            Ok(snapshot) => {
                self.engine_commands.apply_state(&snapshot.state);
                self.set_session_state(SessionState::InBattle);
            }
            Err(err) => {
                tracing::debug!(error = %err, "no local snapshot yet; waiting for RECONNECTED");
            }
        }
    }

    async fn handle_server_message(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Connect { .. } => {
                if self.session_state() == SessionState::Connecting {
                    self.set_session_state(SessionState::Connected);
                }
            }
            ServerMessage::RoomCreated { room_id } => {
                *self.room_id.lock().await = Some(room_id);
                self.transport.set_room_id(Some(room_id)).await;
                self.set_session_state(SessionState::InRoom);
                self.resolve_pending_room(Ok(RoomOutcome::Created(room_id))).await;
            }
            ServerMessage::RoomJoined {
                room_id,
                opponent_id,
                peer_count,
            } => {
                *self.room_id.lock().await = Some(room_id);
                *self.opponent_id.lock().await = opponent_id;
                self.transport.set_room_id(Some(room_id)).await;
                self.set_session_state(SessionState::InRoom);
                self.resolve_pending_room(Ok(RoomOutcome::Joined(RoomJoinOutcome {
                    room_id,
                    opponent_id,
                    peer_count,
                })))
                .await;
            }
            ServerMessage::RoomNotFound { room_id } => {
                self.resolve_pending_room(Err(ControllerError::Rejected {
                    code: ErrorCode::RoomNotFound,
                    message: format!("room {room_id} not found"),
                }))
                .await;
            }
            ServerMessage::RoomFull { room_id } => {
                self.resolve_pending_room(Err(ControllerError::Rejected {
                    code: ErrorCode::RoomFull,
                    message: format!("room {room_id} is full"),
                }))
                .await;
            }
            ServerMessage::GameStart { players, .. } => {
                if self.opponent_id.lock().await.is_none() {
                    let self_peer = self.transport.peer_id().await;
                    let opponent = players.into_iter().find(|p| Some(*p) != self_peer);
                    *self.opponent_id.lock().await = opponent;
                }
                self.set_session_state(SessionState::InBattle);
                self.start_auto_sync().await;
            }
            ServerMessage::Move { mv, .. } => {
                let self_peer = self.transport.peer_id().await;
                if Some(mv.origin_peer_id) != self_peer {
                    self.engine_commands.apply_opponent_move(&mv);
                    self.push_move_history(mv.clone()).await;
                    let _ = self.events_tx.send(ControllerEvent::OpponentMove(mv));
                }
            }
            ServerMessage::StateSync { state, delta, .. } => {
                self.reconcile_remote_sync(state, delta).await;
            }
            ServerMessage::GameEnd { winner, reason, .. } => {
                self.stop_auto_sync().await;
                self.set_session_state(SessionState::InRoom);
                let _ = self.events_tx.send(ControllerEvent::GameEnded { winner, reason });
            }
            ServerMessage::Reconnected { state, .. } => {
                self.engine_commands.apply_state(&state);
                {
                    let mut synchronizer = self.synchronizer.lock().await;
                    synchronizer.create_snapshot(state.clone(), now_ms());
                }
                self.set_session_state(SessionState::InBattle);
                self.start_auto_sync().await;
                let _ = self.events_tx.send(ControllerEvent::StateSynced(state));
            }
            ServerMessage::Error { code, message, .. } => {
                if code == ErrorCode::ReconnectionFailed {
                    self.set_session_state(SessionState::Error);
                }
                self.resolve_pending_room(Err(ControllerError::Rejected {
                    code,
                    message: message.clone(),
                }))
                .await;
                let _ = self.events_tx.send(ControllerEvent::Error { code, message });
            }
            ServerMessage::PlayerLeft { .. }
            | ServerMessage::SpectatorLeft { .. }
            | ServerMessage::PlayerDisconnected { .. }
            | ServerMessage::Chat { .. }
            | ServerMessage::Pong { .. } => {}
        }
    }

    async fn resolve_pending_room(&self, outcome: Result<RoomOutcome, ControllerError>) {
        if let Some(tx) = self.pending_room_reply.lock().await.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Reconciles an incoming `STATE_SYNC` against our own last-known state:
    /// rejects stale versions, runs conflict detection/resolution, and feeds
    /// the resolved state to the game engine and the local snapshot store.
    async fn reconcile_remote_sync(
        &self,
        state: Option<StateSnapshot>,
        delta: Option<crate::protocol::StateDelta>,
    ) {
        let mut synchronizer = self.synchronizer.lock().await;
        let local = synchronizer.current().cloned();

        let remote = match (state, delta) {
            (Some(full), _) => full,
            (None, Some(delta)) => match &local {
                Some(local) => match crate::sync::apply_delta(local, &delta) {
                    Ok(applied) => applied,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to apply incoming delta");
                        return;
                    }
                },
                None => {
                    tracing::warn!("received a delta sync with no local snapshot to apply it to");
                    return;
                }
            },
            (None, None) => return,
        };

        let resolved = match &local {
            Some(local) => {
                if !accept_remote_version(local.version, remote.version) {
                    tracing::trace!("ignoring stale remote state sync");
                    return;
                }
                match detect_conflict(local, &remote) {
                    Some(conflict_type) => {
                        let resolution = resolve_conflict(self.conflict_policy, local, &remote);
                        synchronizer.record_conflict();
                        let record = ConflictRecord {
                            conflict_type,
                            detected_at: now_ms(),
                            local_version: local.version,
                            remote_version: remote.version,
                            description: resolution.message.clone(),
                        };
                        let mut stats = self.conflict_stats.lock().await;
                        stats.record(conflict_type, self.conflict_policy, 0.0, record.clone());
                        drop(stats);
                        let _ = self.events_tx.send(ControllerEvent::ConflictDetected(record));
                        resolution.resolved_state
                    }
                    None => remote,
                }
            }
            None => remote,
        };

        let stamped = synchronizer.create_snapshot(resolved, now_ms());
        drop(synchronizer);

        self.engine_commands.apply_state(&stamped);
        let _ = self.events_tx.send(ControllerEvent::StateSynced(stamped.clone()));
        self.persist_snapshot(stamped).await;
    }

    async fn persist_snapshot(&self, state: StateSnapshot) {
        let (Some(peer_id), Some(room_id)) = (self.transport.peer_id().await, *self.room_id.lock().await)
        else {
            return;
        };
        let opponent_id = *self.opponent_id.lock().await;
        let move_history: Vec<MoveToken> = self.move_history.lock().await.iter().cloned().collect();
        let last_synced_move_number = self.move_counter.load(Ordering::SeqCst);
        let snapshot = GameSnapshot {
            timestamp: now_ms(),
            room_id,
            peer_id,
            opponent_id,
            state,
            move_history,
            last_synced_move_number,
        };
        self.reconnection.save_snapshot(peer_id, snapshot, now_ms()).await;
    }

    async fn start_auto_sync(self: &Arc<Self>) {
        if !self.enable_auto_sync {
            return;
        }
        let mut handle_guard = self.auto_sync_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }
        let controller = self.clone();
        let interval = self.sync_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if controller.session_state() != SessionState::InBattle {
                    break;
                }
                controller.produce_and_send_sync().await;
            }
        });
        *handle_guard = Some(handle);
    }

    async fn stop_auto_sync(&self) {
        if let Some(handle) = self.auto_sync_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn produce_and_send_sync(&self) {
        let Some(room_id) = *self.room_id.lock().await else {
            return;
        };
        let snapshot = self.engine_snapshot.capture();

        let mut synchronizer = self.synchronizer.lock().await;
        let stamped = synchronizer.create_snapshot(snapshot, now_ms());
        let use_delta = synchronizer.should_use_delta_sync();
        let delta = if use_delta { synchronizer.build_delta() } else { None };
        synchronizer.record_sync(delta.as_ref().map(|d| d.changes.len()));
        drop(synchronizer);

        let message = match delta {
            Some(delta) => ClientMessage::StateSync {
                room_id,
                state: None,
                delta: Some(delta),
            },
            None => ClientMessage::StateSync {
                room_id,
                state: Some(stamped.clone()),
                delta: None,
            },
        };
        self.transport.send(message).await;
        self.persist_snapshot(stamped).await;
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
