//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CulvertSettings::default()`]
//! 2. If `~/.culvert/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CULVERT_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::CulvertSettings;

/// Resolve the path to the settings file (`~/.culvert/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".culvert").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CulvertSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CulvertSettings> {
    let defaults = serde_json::to_value(CulvertSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CulvertSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per-key; arrays and primitives are replaced entirely;
/// null source values preserve the target.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_env_overrides(settings: &mut CulvertSettings) {
    if let Some(v) = read_env_u16("CULVERT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("CULVERT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("CULVERT_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("CULVERT_IDLE_TIMEOUT_MS", 1000, 86_400_000) {
        settings.server.idle_timeout_ms = v;
    }
    if let Some(v) = read_env_string("CULVERT_FORWARD_TARGET") {
        settings.server.forward_target = v;
    }

    if let Some(v) = read_env_usize("CULVERT_WORKERS", 1, 64) {
        settings.enrichment.workers = v;
    }
    if let Some(v) = read_env_usize("CULVERT_QUEUE_CAPACITY", 1, 4096) {
        settings.enrichment.queue_capacity = v;
    }
    if let Some(v) = read_env_usize("CULVERT_MEMORY_CAPACITY", 1, 1000) {
        settings.enrichment.memory_capacity = v;
    }
    if let Some(v) = read_env_string("CULVERT_MODEL") {
        settings.enrichment.model = v;
    }

    if let Some(v) = read_env_string("CULVERT_BUCKET") {
        settings.storage.bucket = v;
    }
    if let Some(v) = read_env_string("CULVERT_SIGNING_KEY") {
        settings.storage.signing_key = v;
    }
    if let Some(v) = read_env_string("CULVERT_SIGNING_HOST") {
        settings.storage.signing_host = v;
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
