//! Per-peer outbound queue (§5 Backpressure): bounded to
//! `outbound_queue_capacity`, drops the oldest non-critical frame on
//! overflow, and signals `BACKPRESSURE_ABORT` when a full queue holds
//! nothing droppable.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::protocol::ServerMessage;

#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub message: ServerMessage,
    pub critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full of critical frames; the caller must close the
    /// connection with `BACKPRESSURE_ABORT`.
    Aborted,
}

pub struct OutboundQueue {
    inner: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity,
        }
    }

    pub async fn push(&self, message: ServerMessage, critical: bool) -> PushOutcome {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            match queue.iter().position(|f| !f.critical) {
                Some(index) => {
                    queue.remove(index);
                }
                None => return PushOutcome::Aborted,
            }
        }
        queue.push_back(OutboundFrame { message, critical });
        drop(queue);
        self.notify.notify_one();
        PushOutcome::Queued
    }

    /// Waits until at least one frame is available, then drains and returns
    /// everything queued so far (preserves FIFO order).
    pub async fn drain(&self) -> Vec<OutboundFrame> {
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

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerId;

    fn msg() -> ServerMessage {
        ServerMessage::Pong { timestamp: 0 }
    }

    #[tokio::test]
    async fn push_then_drain_round_trips_in_order() {
        let queue = OutboundQueue::new(4);
        queue.push(msg(), false).await;
        queue.push(msg(), true).await;
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(!drained[0].critical);
        assert!(drained[1].critical);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_critical() {
        let queue = OutboundQueue::new(2);
        queue.push(msg(), false).await;
        queue.push(msg(), true).await;
        let outcome = queue
            .push(
                ServerMessage::Connect {
                    peer_id: PeerId::nil(),
                    status: "connected".to_string(),
                },
                true,
            )
            .await;
        assert_eq!(outcome, PushOutcome::Queued);
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|f| f.critical));
    }

    #[tokio::test]
    async fn overflow_with_all_critical_aborts() {
        let queue = OutboundQueue::new(1);
        queue.push(msg(), true).await;
        let outcome = queue.push(msg(), true).await;
        assert_eq!(outcome, PushOutcome::Aborted);
    }
}
