//! Configuration loading and environment parsing.
//!
//! Precedence, lowest to highest:
//! 1. Compiled-in defaults (`HubConfig::default()`)
//! 2. `config.json` next to the running executable
//! 3. `config.json` in the current working directory
//! 4. A file path named by `BATTLE_HUB_CONFIG_PATH`
//! 5. Raw JSON in `BATTLE_HUB_CONFIG_JSON`
//! 6. Raw JSON on stdin, opt-in via `BATTLE_HUB_CONFIG_STDIN=true`
//! 7. Per-field environment variables with prefix `BATTLE_HUB__` and `__` as
//!    the nested separator, e.g. `BATTLE_HUB__PORT=9000` or
//!    `BATTLE_HUB__LOGGING__LEVEL=debug` — these win over every file/blob
//!    source above, field by field.
//!
//! Errors encountered while reading or parsing an individual source are
//! printed to stderr and that source is skipped; `load()` always returns a
//! `HubConfig`. Callers that need a hard failure should run the returned
//! config through [`super::validate`].

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::types::HubConfig;

#[must_use]
pub fn load() -> HubConfig {
    use std::env;
    use std::io::Read;

    let defaults = HubConfig::default();
    let mut merged =
        serde_json::to_value(&defaults).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    if let Ok(exe_path) = env::current_exe() {
        if let Some(mut exe_dir) = exe_path.parent().map(Path::to_path_buf) {
            exe_dir.push("config.json");
            merge_file_source(&mut merged, &exe_dir);
        }
    }

    merge_file_source(&mut merged, &PathBuf::from("config.json"));

    if let Ok(path) = env::var("BATTLE_HUB_CONFIG_PATH") {
        merge_file_source(&mut merged, &PathBuf::from(path));
    }

    if let Ok(json) = env::var("BATTLE_HUB_CONFIG_JSON") {
        if let Some(value) = parse_json_document(&json, "BATTLE_HUB_CONFIG_JSON") {
            merge_values(&mut merged, value);
        }
    }

    if let Ok(val) = env::var("BATTLE_HUB_CONFIG_STDIN") {
        if env_var_truthy(&val) {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("Failed to read config from stdin: {e}");
            } else if let Some(value) = parse_json_document(&buf, "stdin") {
                merge_values(&mut merged, value);
            }
        }
    }

    apply_env_overrides(&mut merged);

    match serde_json::from_value::<HubConfig>(merged) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to deserialize config; using defaults: {e}");
            defaults
        }
    }
}

fn parse_json_document(raw: &str, label: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("Failed to parse config from {label}: {err}");
            None
        }
    }
}

fn merge_file_source(target: &mut Value, path: &Path) {
    if path.as_os_str().is_empty() || !path.exists() {
        return;
    }
    match fs::read_to_string(path) {
        Ok(contents) => {
            if let Some(value) =
                parse_json_document(&contents, &format!("file {}", path.display()))
            {
                merge_values(target, value);
            }
        }
        Err(err) => {
            eprintln!("Failed to read config from {}: {}", path.display(), err);
        }
    }
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target_slot, source_value) => {
            *target_slot = source_value;
        }
    }
}

fn apply_env_overrides(root: &mut Value) {
    for (key, raw_value) in std::env::vars() {
        let Some(stripped) = key.strip_prefix("BATTLE_HUB__") else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if segments.is_empty() {
            continue;
        }
        let value = parse_env_value(&raw_value);
        set_nested_value(root, &segments, value);
    }

    // The four names called out explicitly in the wire spec are accepted
    // bare (no prefix) so the Hub matches conventional unprefixed env vars
    // for the most common tunables.
    for (bare, segment) in [
        ("PORT", "port"),
        ("IDLE_ROOM_TTL_SECONDS", "idle_room_ttl_seconds"),
        ("MATCHMAKE_INTERVAL_MS", "matchmake_interval_ms"),
        ("ROOM_SWEEP_INTERVAL_MS", "room_sweep_interval_ms"),
    ] {
        if let Ok(raw) = std::env::var(bare) {
            set_nested_value(root, &[segment.to_string()], parse_env_value(&raw));
        }
    }
}

fn env_var_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.contains(',') {
        let items = trimmed
            .split(',')
            .map(|segment| parse_scalar(segment.trim()))
            .collect::<Vec<_>>();
        return Value::Array(items);
    }
    parse_scalar(trimmed)
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_nested_value(target: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        *target = value;
        return;
    }
    if segments.len() == 1 {
        let map = ensure_object(target);
        map.insert(segments[0].clone(), value);
        return;
    }
    let map = ensure_object(target);
    let key = segments[0].clone();
    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested_value(entry, &segments[1..], value);
}

fn ensure_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    value
        .as_object_mut()
        .expect("value was just coerced into an object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn bare_port_env_var_overrides_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PORT", "9001");
        let cfg = load();
        std::env::remove_var("PORT");
        assert_eq!(cfg.port, 9001);
    }

    #[test]
    fn prefixed_nested_env_var_overrides_logging_level() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("BATTLE_HUB__LOGGING__LEVEL", "debug");
        let cfg = load();
        std::env::remove_var("BATTLE_HUB__LOGGING__LEVEL");
        assert_eq!(cfg.logging.level, super::super::LogLevel::Debug);
    }

    #[test]
    fn config_json_blob_overrides_file_sources() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("BATTLE_HUB_CONFIG_JSON", r#"{"port": 7777}"#);
        let cfg = load();
        std::env::remove_var("BATTLE_HUB_CONFIG_JSON");
        assert_eq!(cfg.port, 7777);
    }

    #[test]
    fn malformed_json_blob_is_skipped_not_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("BATTLE_HUB_CONFIG_JSON", "{not valid json");
        let cfg = load();
        std::env::remove_var("BATTLE_HUB_CONFIG_JSON");
        assert_eq!(cfg.port, 8080);
    }
}
