use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{ConflictPolicy, SyncMode};

use super::defaults::*;
use super::logging::LoggingConfig;

/// Root configuration for the Hub, loaded via [`super::loader::load`].
///
/// Every field maps onto an environment-variable override named per
/// `SCREAMING_SNAKE_CASE` of the field (see `loader::env_override_key`);
/// the four names called out in the wire spec (`PORT`,
/// `IDLE_ROOM_TTL_SECONDS`, `MATCHMAKE_INTERVAL_MS`,
/// `ROOM_SWEEP_INTERVAL_MS`) are the minimum required surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_idle_room_ttl_seconds")]
    pub idle_room_ttl_seconds: u64,

    #[serde(default = "default_matchmake_interval_ms")]
    pub matchmake_interval_ms: u64,

    #[serde(default = "default_room_sweep_interval_ms")]
    pub room_sweep_interval_ms: u64,

    #[serde(default = "default_room_empty_grace_seconds")]
    pub room_empty_grace_seconds: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_loss_threshold")]
    pub heartbeat_loss_threshold: u32,

    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_reconnection_window_seconds")]
    pub reconnection_window_seconds: u64,

    #[serde(default = "default_reconnection_recovery_timeout_seconds")]
    pub reconnection_recovery_timeout_seconds: u64,

    #[serde(default = "default_reconnection_ring_size")]
    pub reconnection_ring_size: usize,

    #[serde(default = "default_reconnection_min_persist_interval_seconds")]
    pub reconnection_min_persist_interval_seconds: u64,

    #[serde(default = "default_conflict_ring_size")]
    pub conflict_ring_size: usize,

    #[serde(default = "default_sync_mode")]
    pub default_sync_mode: SyncMode,

    #[serde(default = "default_conflict_policy")]
    pub default_conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            idle_room_ttl_seconds: default_idle_room_ttl_seconds(),
            matchmake_interval_ms: default_matchmake_interval_ms(),
            room_sweep_interval_ms: default_room_sweep_interval_ms(),
            room_empty_grace_seconds: default_room_empty_grace_seconds(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_loss_threshold: default_heartbeat_loss_threshold(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            reconnection_window_seconds: default_reconnection_window_seconds(),
            reconnection_recovery_timeout_seconds: default_reconnection_recovery_timeout_seconds(),
            reconnection_ring_size: default_reconnection_ring_size(),
            reconnection_min_persist_interval_seconds:
                default_reconnection_min_persist_interval_seconds(),
            conflict_ring_size: default_conflict_ring_size(),
            default_sync_mode: default_sync_mode(),
            default_conflict_policy: default_conflict_policy(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn idle_room_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_room_ttl_seconds)
    }

    pub fn matchmake_interval(&self) -> Duration {
        Duration::from_millis(self.matchmake_interval_ms)
    }

    pub fn room_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.room_sweep_interval_ms)
    }

    pub fn room_empty_grace(&self) -> Duration {
        Duration::from_secs(self.room_empty_grace_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnection_window(&self) -> Duration {
        Duration::from_secs(self.reconnection_window_seconds)
    }

    pub fn reconnection_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnection_recovery_timeout_seconds)
    }

    pub fn reconnection_min_persist_interval(&self) -> Duration {
        Duration::from_secs(self.reconnection_min_persist_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_spec() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.idle_room_ttl_seconds, 3600);
        assert_eq!(cfg.matchmake_interval_ms, 2000);
        assert_eq!(cfg.room_sweep_interval_ms, 30_000);
    }

    #[test]
    fn serializes_and_deserializes() {
        let cfg = HubConfig::default();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let back: HubConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.port, back.port);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.heartbeat_loss_threshold, 6);
    }
}
