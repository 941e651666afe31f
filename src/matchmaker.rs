//! FIFO pairing queue (§4.5). `RANDOM` is the only mode implemented at the
//! core level; `RANKED` behaves as `RANDOM`, and `INVITE`/`CUSTOM` are
//! expected to route through the Room Registry directly rather than
//! through this queue (callers simply never enqueue those modes here).

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::error::MatchmakerError;
use crate::protocol::{MatchMode, MatchTicket, PeerId};

pub struct Matchmaker {
    queue: Mutex<VecDeque<MatchTicket>>,
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

impl Matchmaker {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a ticket. `RANKED` degrades to `RANDOM` at this layer per
    /// §4.5; the caller is responsible for routing `INVITE`/`CUSTOM`
    /// elsewhere instead of calling this at all.
    pub async fn enqueue(&self, peer_id: PeerId, mode: MatchMode, enqueued_at: i64) {
        let normalized_mode = match mode {
            MatchMode::Ranked => MatchMode::Random,
            other => other,
        };
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|t| t.peer_id == peer_id) {
            return;
        }
        queue.push_back(MatchTicket {
            peer_id,
            mode: normalized_mode,
            enqueued_at,
        });
    }

    /// O(n) removal by peer id.
    pub async fn cancel(&self, peer_id: PeerId) -> Result<(), MatchmakerError> {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|t| t.peer_id != peer_id);
        if queue.len() == before {
            return Err(MatchmakerError::NotEnqueued);
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Pops the two oldest tickets whose peers are still considered live
    /// by `is_live`, discarding any stale tickets encountered along the
    /// way (§4.5: "If a ticket references a peer that has since
    /// disconnected, discard it silently and continue.").
    pub async fn drain_one_pair<F>(&self, is_live: F) -> Option<(MatchTicket, MatchTicket)>
    where
        F: Fn(PeerId) -> bool,
    {
        let mut queue = self.queue.lock().await;
        let mut first = None;
        while let Some(ticket) = queue.pop_front() {
            if is_live(ticket.peer_id) {
                first = Some(ticket);
                break;
            }
        }
        let first = first?;

        let mut second = None;
        while let Some(ticket) = queue.pop_front() {
            if is_live(ticket.peer_id) {
                second = Some(ticket);
                break;
            }
        }
        match second {
            Some(second) => Some((first, second)),
            None => {
                // Only one live ticket was found; put it back at the front
                // so the next drain tick can pair it.
                queue.push_front(first);
                None
            }
        }
    }
}

/// Reference implementation of the Elo rating update (§4.5). Pure and
/// stateless; never wired into matchmaking decisions — rating persistence
/// and skill-based pairing are explicitly not goals of this crate.
pub fn elo_update(rating_a: f64, rating_b: f64, score_a: f64, k: f64) -> f64 {
    let expected_a = 1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0));
    rating_a + k * (score_a - expected_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn enqueue_then_drain_pairs_fifo() {
        let mm = Matchmaker::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        mm.enqueue(a, MatchMode::Random, 0).await;
        mm.enqueue(b, MatchMode::Random, 1).await;

        let pair = mm.drain_one_pair(|_| true).await.unwrap();
        assert_eq!(pair.0.peer_id, a);
        assert_eq!(pair.1.peer_id, b);
        assert!(mm.is_empty().await);
    }

    #[tokio::test]
    async fn single_ticket_is_not_paired_and_stays_queued() {
        let mm = Matchmaker::new();
        let a = Uuid::new_v4();
        mm.enqueue(a, MatchMode::Random, 0).await;
        assert!(mm.drain_one_pair(|_| true).await.is_none());
        assert_eq!(mm.len().await, 1);
    }

    #[tokio::test]
    async fn disconnected_ticket_is_discarded_silently() {
        let mm = Matchmaker::new();
        let stale = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        mm.enqueue(stale, MatchMode::Random, 0).await;
        mm.enqueue(a, MatchMode::Random, 1).await;
        mm.enqueue(b, MatchMode::Random, 2).await;

        let pair = mm
            .drain_one_pair(|peer| peer != stale)
            .await
            .unwrap();
        assert_eq!(pair.0.peer_id, a);
        assert_eq!(pair.1.peer_id, b);
    }

    #[tokio::test]
    async fn cancel_removes_ticket() {
        let mm = Matchmaker::new();
        let a = Uuid::new_v4();
        mm.enqueue(a, MatchMode::Random, 0).await;
        mm.cancel(a).await.unwrap();
        assert!(mm.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_unknown_peer_errors() {
        let mm = Matchmaker::new();
        let err = mm.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MatchmakerError::NotEnqueued));
    }

    #[tokio::test]
    async fn ranked_mode_is_normalized_to_random() {
        let mm = Matchmaker::new();
        let a = Uuid::new_v4();
        mm.enqueue(a, MatchMode::Ranked, 0).await;
        let queue = mm.queue.lock().await;
        assert_eq!(queue[0].mode, MatchMode::Random);
    }

    #[test]
    fn elo_update_winner_gains_rating() {
        let updated = elo_update(1200.0, 1200.0, 1.0, 32.0);
        assert!(updated > 1200.0);
        assert!((updated - 1216.0).abs() < 0.01);
    }

    #[test]
    fn elo_update_loser_loses_rating() {
        let updated = elo_update(1200.0, 1200.0, 0.0, 32.0);
        assert!(updated < 1200.0);
    }
}
