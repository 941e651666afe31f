//! Conflict Detector/Resolver (§4.7): ordered detection over a pair of
//! snapshots, and the five configurable resolution policies.

use std::collections::VecDeque;

use crate::protocol::{
    ChangeRecord, ConflictPolicy, ConflictRecord, ConflictType, Counters, GridSelector,
    StateSnapshot,
};

const GRID_MISMATCH_THRESHOLD: usize = 5;
const SCORE_MISMATCH_THRESHOLD: i64 = 100;
const DIVERGENCE_THRESHOLD_MS: i64 = 10_000;
/// §3 / SPEC_FULL §6: conflict record ring default. Overridable via
/// `HubConfig::conflict_ring_size` through [`ConflictStats::with_capacity`].
const DEFAULT_RECORD_RING_CAPACITY: usize = 100;

/// Ordered detection; the first rule that matches wins. Mirrors
/// §4.7: VERSION_MISMATCH, GRID_INCONSISTENCY, SCORE_MISMATCH,
/// STATE_DIVERGENCE, else none.
pub fn detect_conflict(local: &StateSnapshot, remote: &StateSnapshot) -> Option<ConflictType> {
    if local.version.abs_diff(remote.version) > 1 {
        return Some(ConflictType::VersionMismatch);
    }
    if grid_diff_count(&local.player_grid, &remote.opponent_grid) > GRID_MISMATCH_THRESHOLD
        || grid_diff_count(&local.opponent_grid, &remote.player_grid) > GRID_MISMATCH_THRESHOLD
    {
        return Some(ConflictType::GridInconsistency);
    }
    if (local.counters.sum_scores() - remote.counters.sum_scores()).abs() > SCORE_MISMATCH_THRESHOLD {
        return Some(ConflictType::ScoreMismatch);
    }
    if (local.timestamp - remote.timestamp).abs() > DIVERGENCE_THRESHOLD_MS {
        return Some(ConflictType::StateDivergence);
    }
    None
}

fn grid_diff_count(a: &[Vec<String>], b: &[Vec<String>]) -> usize {
    let mut count = 0;
    for row in 0..a.len().max(b.len()) {
        let a_row = a.get(row);
        let b_row = b.get(row);
        let cols = a_row.map_or(0, Vec::len).max(b_row.map_or(0, Vec::len));
        for col in 0..cols {
            let a_cell = a_row.and_then(|r| r.get(col));
            let b_cell = b_row.and_then(|r| r.get(col));
            if a_cell != b_cell {
                count += 1;
            }
        }
    }
    count
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub success: bool,
    pub strategy: ConflictPolicy,
    pub resolved_state: StateSnapshot,
    pub rollback_required: bool,
    pub compensation_moves: Vec<ChangeRecord>,
    pub message: String,
}

/// Applies `policy` to a detected conflict between `local` and `remote`.
pub fn resolve_conflict(
    policy: ConflictPolicy,
    local: &StateSnapshot,
    remote: &StateSnapshot,
) -> Resolution {
    match policy {
        ConflictPolicy::ServerAuthoritative => Resolution {
            success: true,
            strategy: policy,
            resolved_state: remote.clone(),
            rollback_required: local != remote,
            compensation_moves: cell_diffs(local, remote),
            message: "server snapshot applied".to_string(),
        },
        ConflictPolicy::ClientAuthoritative => Resolution {
            success: true,
            strategy: policy,
            resolved_state: local.clone(),
            rollback_required: false,
            compensation_moves: Vec::new(),
            message: "local snapshot retained".to_string(),
        },
        ConflictPolicy::LatestTimestamp => {
            let remote_wins = remote.timestamp > local.timestamp;
            let resolved = if remote_wins { remote.clone() } else { local.clone() };
            Resolution {
                success: true,
                strategy: policy,
                rollback_required: remote_wins,
                compensation_moves: if remote_wins {
                    cell_diffs(local, remote)
                } else {
                    Vec::new()
                },
                resolved_state: resolved,
                message: format!("later timestamp wins (remote_wins={remote_wins})"),
            }
        }
        ConflictPolicy::Merge => {
            let merged = merge_snapshots(local, remote);
            Resolution {
                success: true,
                strategy: policy,
                compensation_moves: cell_diffs(local, &merged),
                resolved_state: merged,
                rollback_required: false,
                message: "merged local and remote snapshots".to_string(),
            }
        }
        ConflictPolicy::Rollback => {
            let resolved = if local.version <= remote.version {
                local.clone()
            } else {
                remote.clone()
            };
            Resolution {
                success: true,
                strategy: policy,
                resolved_state: resolved,
                rollback_required: true,
                compensation_moves: Vec::new(),
                message: "rolled back to the smaller-version snapshot".to_string(),
            }
        }
    }
}

fn cell_diffs(from: &StateSnapshot, to: &StateSnapshot) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();
    diff_into(&from.player_grid, &to.player_grid, GridSelector::PlayerGrid, &mut changes);
    diff_into(
        &from.opponent_grid,
        &to.opponent_grid,
        GridSelector::OpponentGrid,
        &mut changes,
    );
    changes
}

fn diff_into(
    from: &[Vec<String>],
    to: &[Vec<String>],
    grid: GridSelector,
    out: &mut Vec<ChangeRecord>,
) {
    for row in 0..to.len() {
        for col in 0..to[row].len() {
            let before = from.get(row).and_then(|r| r.get(col));
            let after = &to[row][col];
            if before != Some(after) {
                out.push(ChangeRecord::Cell {
                    grid,
                    row,
                    col,
                    value: after.clone(),
                });
            }
        }
    }
}

/// MERGE rules (§4.7): scalars take the max; timestamp/turn/active-events
/// take the later snapshot; cells take the non-empty value, preferring
/// local when both sides are non-empty; version = max(local, remote) + 1.
fn merge_snapshots(local: &StateSnapshot, remote: &StateSnapshot) -> StateSnapshot {
    let later = if remote.timestamp >= local.timestamp {
        remote
    } else {
        local
    };

    let rows = local.player_grid.len().max(remote.player_grid.len());
    let merge_grid = |local_grid: &[Vec<String>], remote_grid: &[Vec<String>]| -> Vec<Vec<String>> {
        (0..rows)
            .map(|row| {
                let cols = local_grid
                    .get(row)
                    .map_or(0, Vec::len)
                    .max(remote_grid.get(row).map_or(0, Vec::len));
                (0..cols)
                    .map(|col| {
                        let local_cell = local_grid.get(row).and_then(|r| r.get(col));
                        let remote_cell = remote_grid.get(row).and_then(|r| r.get(col));
                        match (local_cell, remote_cell) {
                            (Some(l), _) if !l.is_empty() => l.clone(),
                            (_, Some(r)) if !r.is_empty() => r.clone(),
                            _ => String::new(),
                        }
                    })
                    .collect()
            })
            .collect()
    };

    StateSnapshot {
        version: local.version.max(remote.version) + 1,
        base_version: Some(local.version.max(remote.version)),
        timestamp: later.timestamp,
        player_grid: merge_grid(&local.player_grid, &remote.player_grid),
        opponent_grid: merge_grid(&local.opponent_grid, &remote.opponent_grid),
        counters: Counters {
            host_score: local.counters.host_score.max(remote.counters.host_score),
            guest_score: local.counters.guest_score.max(remote.counters.guest_score),
            host_moves: local.counters.host_moves.max(remote.counters.host_moves),
            guest_moves: local.counters.guest_moves.max(remote.counters.guest_moves),
        },
        event_progress: later.event_progress,
        active_events: later.active_events.clone(),
        current_turn: later.current_turn,
    }
}

/// Per-type/per-policy counters and an EMA of resolution latency, kept by
/// the Hub for observability (§4.7).
pub struct ConflictStats {
    by_type: [u64; 4],
    by_policy: [u64; 5],
    ema_latency_ms: Option<f64>,
    records: VecDeque<ConflictRecord>,
    capacity: usize,
}

const EMA_ALPHA: f64 = 0.3;

impl Default for ConflictStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictStats {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECORD_RING_CAPACITY)
    }

    /// Builds stats whose record ring holds `capacity` entries, per
    /// `HubConfig::conflict_ring_size`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_type: [0; 4],
            by_policy: [0; 5],
            ema_latency_ms: None,
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, conflict_type: ConflictType, policy: ConflictPolicy, latency_ms: f64, record: ConflictRecord) {
        self.by_type[conflict_type_index(conflict_type)] += 1;
        self.by_policy[policy_index(policy)] += 1;
        self.ema_latency_ms = Some(match self.ema_latency_ms {
            Some(prev) => EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * prev,
            None => latency_ms,
        });
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn count_for_type(&self, conflict_type: ConflictType) -> u64 {
        self.by_type[conflict_type_index(conflict_type)]
    }

    pub fn count_for_policy(&self, policy: ConflictPolicy) -> u64 {
        self.by_policy[policy_index(policy)]
    }

    pub fn ema_latency_ms(&self) -> Option<f64> {
        self.ema_latency_ms
    }

    pub fn recent_records(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.records.iter()
    }
}

fn conflict_type_index(t: ConflictType) -> usize {
    match t {
        ConflictType::VersionMismatch => 0,
        ConflictType::GridInconsistency => 1,
        ConflictType::ScoreMismatch => 2,
        ConflictType::StateDivergence => 3,
    }
}

fn policy_index(p: ConflictPolicy) -> usize {
    match p {
        ConflictPolicy::ServerAuthoritative => 0,
        ConflictPolicy::ClientAuthoritative => 1,
        ConflictPolicy::LatestTimestamp => 2,
        ConflictPolicy::Merge => 3,
        ConflictPolicy::Rollback => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlayerRole;

    fn grid(rows: usize, cols: usize, fill: &str) -> Vec<Vec<String>> {
        vec![vec![fill.to_string(); cols]; rows]
    }

    fn snapshot(version: u64, timestamp: i64) -> StateSnapshot {
        StateSnapshot {
            version,
            base_version: None,
            timestamp,
            player_grid: grid(2, 2, "red"),
            opponent_grid: grid(2, 2, "blue"),
            counters: Counters::default(),
            event_progress: 0,
            active_events: Vec::new(),
            current_turn: PlayerRole::Host,
        }
    }

    #[test]
    fn version_mismatch_detected_first() {
        let local = snapshot(10, 0);
        let remote = snapshot(5, 0);
        assert_eq!(detect_conflict(&local, &remote), Some(ConflictType::VersionMismatch));
    }

    #[test]
    fn grid_inconsistency_detected() {
        let local = snapshot(10, 0);
        let mut remote = snapshot(10, 0);
        remote.opponent_grid = grid(5, 5, "x");
        assert_eq!(
            detect_conflict(&local, &remote),
            Some(ConflictType::GridInconsistency)
        );
    }

    #[test]
    fn score_mismatch_detected() {
        let mut local = snapshot(10, 0);
        local.counters.host_score = 500;
        let remote = snapshot(10, 0);
        assert_eq!(detect_conflict(&local, &remote), Some(ConflictType::ScoreMismatch));
    }

    #[test]
    fn state_divergence_detected() {
        let local = snapshot(10, 0);
        let remote = snapshot(10, 20_000);
        assert_eq!(detect_conflict(&local, &remote), Some(ConflictType::StateDivergence));
    }

    #[test]
    fn no_conflict_for_close_snapshots() {
        let local = snapshot(10, 100);
        let remote = snapshot(10, 200);
        assert_eq!(detect_conflict(&local, &remote), None);
    }

    #[test]
    fn merge_takes_max_scalars_and_later_metadata() {
        let mut local = snapshot(10, 100);
        local.counters.host_score = 5;
        let mut remote = snapshot(11, 200);
        remote.counters.host_score = 9;

        let merged = merge_snapshots(&local, &remote);
        assert_eq!(merged.counters.host_score, 9);
        assert_eq!(merged.version, 12);
        assert_eq!(merged.timestamp, 200);
    }

    #[test]
    fn server_authoritative_chooses_remote() {
        let local = snapshot(10, 100);
        let remote = snapshot(11, 200);
        let resolution = resolve_conflict(ConflictPolicy::ServerAuthoritative, &local, &remote);
        assert_eq!(resolution.resolved_state.version, 11);
        assert!(resolution.rollback_required);
    }

    #[test]
    fn client_authoritative_chooses_local_without_rollback() {
        let local = snapshot(10, 100);
        let remote = snapshot(11, 200);
        let resolution = resolve_conflict(ConflictPolicy::ClientAuthoritative, &local, &remote);
        assert_eq!(resolution.resolved_state.version, 10);
        assert!(!resolution.rollback_required);
    }

    #[test]
    fn rollback_chooses_smaller_version() {
        let local = snapshot(10, 100);
        let remote = snapshot(3, 200);
        let resolution = resolve_conflict(ConflictPolicy::Rollback, &local, &remote);
        assert_eq!(resolution.resolved_state.version, 3);
        assert!(resolution.rollback_required);
    }

    #[test]
    fn server_authoritative_compensation_moves_cover_every_differing_cell() {
        let local = snapshot(10, 0);
        let mut remote = snapshot(10, 0);
        // Seven cells across both grids disagree between local and remote.
        remote.player_grid[0][0] = "changed".to_string();
        remote.player_grid[0][1] = "changed".to_string();
        remote.player_grid[1][0] = "changed".to_string();
        remote.player_grid[1][1] = "changed".to_string();
        remote.opponent_grid[0][0] = "changed".to_string();
        remote.opponent_grid[0][1] = "changed".to_string();
        remote.opponent_grid[1][0] = "changed".to_string();
        // opponent_grid[1][1] is left at its original value.

        let resolution = resolve_conflict(ConflictPolicy::ServerAuthoritative, &local, &remote);
        assert_eq!(resolution.strategy, ConflictPolicy::ServerAuthoritative);
        assert!(resolution.rollback_required);
        assert_eq!(resolution.resolved_state.version, remote.version);
        assert_eq!(resolution.compensation_moves.len(), 7);
    }

    #[test]
    fn stats_track_counts_and_ema() {
        let mut stats = ConflictStats::new();
        let record = ConflictRecord {
            conflict_type: ConflictType::ScoreMismatch,
            detected_at: 0,
            local_version: 1,
            remote_version: 2,
            description: "test".to_string(),
        };
        stats.record(ConflictType::ScoreMismatch, ConflictPolicy::Merge, 10.0, record);
        assert_eq!(stats.count_for_type(ConflictType::ScoreMismatch), 1);
        assert_eq!(stats.count_for_policy(ConflictPolicy::Merge), 1);
        assert_eq!(stats.ema_latency_ms(), Some(10.0));
    }
}
