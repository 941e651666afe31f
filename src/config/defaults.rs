//! Compiled-in default values, one function per field so `#[serde(default = "...")]`
//! can reference them individually.

use crate::protocol::{ConflictPolicy, SyncMode};

use super::logging::{LogFormat, LogLevel};

pub const fn default_port() -> u16 {
    8080
}

pub const fn default_idle_room_ttl_seconds() -> u64 {
    3600
}

pub const fn default_matchmake_interval_ms() -> u64 {
    2000
}

pub const fn default_room_sweep_interval_ms() -> u64 {
    30_000
}

pub const fn default_room_empty_grace_seconds() -> u64 {
    60
}

pub const fn default_heartbeat_interval_ms() -> u64 {
    5000
}

pub const fn default_heartbeat_loss_threshold() -> u32 {
    6
}

pub const fn default_outbound_queue_capacity() -> usize {
    256
}

pub const fn default_reconnection_window_seconds() -> u64 {
    30
}

pub const fn default_reconnection_recovery_timeout_seconds() -> u64 {
    60
}

pub const fn default_reconnection_ring_size() -> usize {
    10
}

pub const fn default_reconnection_min_persist_interval_seconds() -> u64 {
    5
}

pub const fn default_conflict_ring_size() -> usize {
    100
}

pub const fn default_sync_mode() -> SyncMode {
    SyncMode::Hybrid
}

pub const fn default_conflict_policy() -> ConflictPolicy {
    ConflictPolicy::ServerAuthoritative
}

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "hub.log".to_string()
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Text
}

pub const fn default_log_level() -> LogLevel {
    LogLevel::Info
}
