//! Client-side outbound queue (§4.2): the same bounded, drop-oldest-
//! non-critical policy as the Hub's peer queue, sized for `ClientMessage`
//! instead of `ServerMessage`.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::protocol::ClientMessage;

const CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientOutboundFrame {
    pub message: ClientMessage,
    pub critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Aborted,
}

pub struct ClientOutboundQueue {
    inner: Mutex<VecDeque<ClientOutboundFrame>>,
    notify: Notify,
}

impl ClientOutboundQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(CAPACITY)),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: ClientMessage, critical: bool) -> PushOutcome {
        let mut queue = self.inner.lock().await;
        if queue.len() >= CAPACITY {
            match queue.iter().position(|f| !f.critical) {
                Some(index) => {
                    queue.remove(index);
                }
                None => return PushOutcome::Aborted,
            }
        }
        queue.push_back(ClientOutboundFrame { message, critical });
        drop(queue);
        self.notify.notify_one();
        PushOutcome::Queued
    }

    pub async fn drain(&self) -> Vec<ClientOutboundFrame> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if !queue.is_empty() {
                    return queue.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }
}

impl Default for ClientOutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Critical frames are never dropped on overflow (§4.2): moves, the
/// terminal state sync of a battle, and any reconnect handshake frame.
pub fn is_critical(message: &ClientMessage) -> bool {
    matches!(message, ClientMessage::Move { .. } | ClientMessage::Reconnect { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerId;

    fn ping() -> ClientMessage {
        ClientMessage::Ping { timestamp: 0 }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_critical() {
        let queue = ClientOutboundQueue::new();
        for _ in 0..CAPACITY {
            queue.push(ping(), false).await;
        }
        let outcome = queue
            .push(ClientMessage::Disconnect { peer_id: PeerId::nil() }, true)
            .await;
        assert_eq!(outcome, PushOutcome::Queued);
    }
}
