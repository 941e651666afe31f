//! Client-side Transport (§4.2): a full-duplex WebSocket stream with
//! heartbeat-based latency measurement and an automatic reconnection loop.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::protocol::{ClientEnvelope, ClientMessage, PeerId, RoomId, ServerMessage};

use super::outbound::{is_critical, ClientOutboundQueue, PushOutcome};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_LOSS_THRESHOLD: i64 = 6;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const LATENCY_EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Owns the socket lifecycle for one logical connection to the Hub.
/// Cheap to share: hand out `Arc<Transport>` and call `run` once on a
/// spawned task.
pub struct Transport {
    url: String,
    peer_id: Mutex<Option<PeerId>>,
    room_id: Mutex<Option<RoomId>>,
    state: Mutex<TransportState>,
    outbound: ClientOutboundQueue,
    events: mpsc::UnboundedSender<ServerMessage>,
    ema_latency_ms: Mutex<Option<f64>>,
    missed_pongs: AtomicI64,
    closing: AtomicBool,
}

impl Transport {
    pub fn new(url: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            url: url.into(),
            peer_id: Mutex::new(None),
            room_id: Mutex::new(None),
            state: Mutex::new(TransportState::Disconnected),
            outbound: ClientOutboundQueue::new(),
            events,
            ema_latency_ms: Mutex::new(None),
            missed_pongs: AtomicI64::new(0),
            closing: AtomicBool::new(false),
        });
        (transport, rx)
    }

    pub async fn state(&self) -> TransportState {
        *self.state.lock().await
    }

    pub async fn peer_id(&self) -> Option<PeerId> {
        *self.peer_id.lock().await
    }

    pub async fn set_room_id(&self, room_id: Option<RoomId>) {
        *self.room_id.lock().await = room_id;
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        *self.room_id.lock().await
    }

    pub async fn latency_ms(&self) -> Option<f64> {
        *self.ema_latency_ms.lock().await
    }

    /// Queues a message for transmission, subject to the outbound queue's
    /// backpressure policy.
    pub async fn send(&self, message: ClientMessage) -> PushOutcome {
        let critical = is_critical(&message);
        self.outbound.push(message, critical).await
    }

    async fn set_state(&self, next: TransportState) {
        *self.state.lock().await = next;
    }

    /// Runs the connect/serve/reconnect loop until the transport gives up
    /// or `close` is called. Intended to be spawned once per `Transport`.
    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            self.set_state(TransportState::Connecting).await;
            match self.connect_and_serve().await {
                Ok(()) => {
                    if self.closing.load(Ordering::SeqCst) {
                        self.set_state(TransportState::Disconnected).await;
                        return;
                    }
                    attempt = 0;
                    self.set_state(TransportState::Reconnecting).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "transport connection lost");
                    if self.closing.load(Ordering::SeqCst) {
                        self.set_state(TransportState::Disconnected).await;
                        return;
                    }
                    self.set_state(TransportState::Reconnecting).await;
                }
            }

            if attempt >= MAX_RECONNECT_ATTEMPTS {
                tracing::error!("reconnection attempts exhausted, giving up");
                self.set_state(TransportState::Failed).await;
                return;
            }
            attempt += 1;
            let backoff = Duration::from_secs(2 * u64::from(attempt));
            tokio::time::sleep(backoff).await;
        }
    }

    /// Sends `DISCONNECT` and marks the transport to not reconnect once the
    /// current connection (if any) drops.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(peer_id) = self.peer_id().await {
            self.outbound
                .push(ClientMessage::Disconnect { peer_id }, true)
                .await;
        }
    }

    async fn connect_and_serve(self: &Arc<Self>) -> Result<(), TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|source| TransportError::Connect {
                url: self.url.clone(),
                source,
            })?;
        let (mut sink, mut stream) = ws_stream.split();

        let connect_frame = ClientMessage::Connect {
            peer_id: self.peer_id().await,
        };
        let envelope = ClientEnvelope {
            message: connect_frame,
            timestamp: now_ms(),
            peer_id: self.peer_id().await.unwrap_or_else(PeerId::nil),
            message_id: None,
        };
        let text = serde_json::to_string(&envelope).map_err(crate::protocol::CodecError::from)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|source| TransportError::Connect {
                url: self.url.clone(),
                source,
            })?;

        let writer_transport = self.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                let frames = writer_transport.outbound.drain().await;
                for frame in frames {
                    let peer_id = writer_transport.peer_id().await.unwrap_or_else(PeerId::nil);
                    let envelope = ClientEnvelope {
                        message: frame.message,
                        timestamp: now_ms(),
                        peer_id,
                        message_id: None,
                    };
                    let Ok(text) = serde_json::to_string(&envelope) else {
                        continue;
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
            }
        });

        let mut awaiting_pong = false;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.missed_pongs.store(0, Ordering::SeqCst);

        let result = loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    let Some(msg) = maybe_msg else { break Ok(()) };
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(err) => break Err(TransportError::Connect { url: self.url.clone(), source: err }),
                    };
                    match msg {
                        Message::Text(text) => {
                            let envelope: crate::protocol::ServerEnvelope =
                                match serde_json::from_str(&text) {
                                    Ok(envelope) => envelope,
                                    Err(err) => {
                                        tracing::warn!(error = %err, "failed to decode server frame");
                                        continue;
                                    }
                                };
                            self.handle_server_message(envelope.message, &mut awaiting_pong).await;
                        }
                        Message::Close(_) => break Ok(()),
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    if awaiting_pong {
                        let missed = self.missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
                        if missed >= HEARTBEAT_LOSS_THRESHOLD {
                            break Err(TransportError::HeartbeatLost { missed });
                        }
                    }
                    awaiting_pong = true;
                    self.outbound.push(ClientMessage::Ping { timestamp: now_ms() }, false).await;
                }
            }
        };

        writer_task.abort();
        result
    }

    async fn handle_server_message(&self, message: ServerMessage, awaiting_pong: &mut bool) {
        match &message {
            ServerMessage::Connect { peer_id, .. } => {
                *self.peer_id.lock().await = Some(*peer_id);
                self.set_state(TransportState::Connected).await;
                if let Some(room_id) = self.room_id().await {
                    self.outbound
                        .push(
                            ClientMessage::JoinRoom {
                                room_id,
                                peer_id: *peer_id,
                            },
                            true,
                        )
                        .await;
                }
            }
            ServerMessage::Pong { timestamp } => {
                *awaiting_pong = false;
                self.missed_pongs.store(0, Ordering::SeqCst);
                let latency = (now_ms() - timestamp).max(0) as f64;
                let mut ema = self.ema_latency_ms.lock().await;
                *ema = Some(match *ema {
                    Some(prev) => LATENCY_EMA_ALPHA * latency + (1.0 - LATENCY_EMA_ALPHA) * prev,
                    None => latency,
                });
            }
            _ => {}
        }
        let _ = self.events.send(message);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
