//! Configuration validation: range and sanity checks run before the Hub
//! binds a port, and on demand via `--validate-config`.

use super::types::HubConfig;

/// Validates `cfg`, returning a description of every problem found (not
/// just the first) so `--validate-config` can report everything at once.
pub fn validate(cfg: &HubConfig) -> anyhow::Result<()> {
    let mut problems = Vec::new();

    if cfg.port == 0 {
        problems.push("port must be in 1..=65535, got 0".to_string());
    }

    if cfg.idle_room_ttl_seconds == 0 {
        problems.push("idle_room_ttl_seconds must be greater than zero".to_string());
    }

    if cfg.matchmake_interval_ms == 0 {
        problems.push("matchmake_interval_ms must be greater than zero".to_string());
    }

    if cfg.room_sweep_interval_ms == 0 {
        problems.push("room_sweep_interval_ms must be greater than zero".to_string());
    }

    if cfg.heartbeat_interval_ms == 0 {
        problems.push("heartbeat_interval_ms must be greater than zero".to_string());
    }

    if cfg.heartbeat_loss_threshold == 0 {
        problems.push("heartbeat_loss_threshold must be greater than zero".to_string());
    }

    if cfg.outbound_queue_capacity == 0 {
        problems.push("outbound_queue_capacity must be greater than zero".to_string());
    }

    if cfg.reconnection_ring_size == 0 {
        problems.push("reconnection_ring_size must be greater than zero".to_string());
    }

    if cfg.conflict_ring_size == 0 {
        problems.push("conflict_ring_size must be greater than zero".to_string());
    }

    if !problems.is_empty() {
        anyhow::bail!("configuration is invalid:\n  - {}", problems.join("\n  - "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&HubConfig::default()).is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cfg = HubConfig::default();
        cfg.port = 0;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("port must be"));
    }

    #[test]
    fn multiple_problems_are_all_reported() {
        let mut cfg = HubConfig::default();
        cfg.port = 0;
        cfg.heartbeat_loss_threshold = 0;
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("port must be"));
        assert!(err.contains("heartbeat_loss_threshold"));
    }
}
