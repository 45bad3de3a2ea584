//! Config loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If a settings file exists, deep-merge its values over defaults
//! 3. Deep-merge explicit caller overrides (e.g. CLI flags)
//! 4. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::AppConfig;

/// Load config from an optional file plus explicit overrides, then env.
pub fn load_config(path: Option<&Path>, overrides: Value) -> Result<AppConfig> {
    let mut merged = serde_json::to_value(AppConfig::default())?;

    if let Some(path) = path {
        if path.exists() {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            merged = deep_merge(merged, user);
        } else {
            debug!(?path, "settings file not found, using defaults");
        }
    }

    merged = deep_merge(merged, overrides);

    let mut config: AppConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Load config from a specific path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    load_config(Some(path), Value::Object(serde_json::Map::new()))
}

/// Recursive deep merge of two JSON values.
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
        (target, Value::Null) => target,
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` environment variable overrides.
///
/// Invalid values are ignored (fall back to file/default).
pub fn apply_env_overrides(config: &mut AppConfig) {
    apply_overrides_with(config, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_overrides_with(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = read_string(&lookup, "SWITCHBOARD_IP") {
        config.ip = v;
    }
    if let Some(v) = read_u16(&lookup, "SWITCHBOARD_PORT", 1, 65535) {
        config.port = v;
    }
    if let Some(v) = read_usize(&lookup, "SWITCHBOARD_WORKERS", 1, 1024) {
        config.worker_concurrency = v;
    }
    if let Some(v) = read_string(&lookup, "SWITCHBOARD_LOG") {
        config.log_level = v;
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.worker_concurrency == 0 {
        return Err(SettingsError::InvalidValue(
            "worker_concurrency must be at least 1".into(),
        ));
    }
    if config.worker_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "worker_queue must be at least 1".into(),
        ));
    }
    if config.max_connections == 0 {
        return Err(SettingsError::InvalidValue(
            "max_connections must be at least 1".into(),
        ));
    }
    if config.max_send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "max_send_queue must be at least 1".into(),
        ));
    }
    if config.caches.keys().any(String::is_empty) {
        return Err(SettingsError::InvalidValue("cache names must be non-empty".into()));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_u16(lookup: &impl Fn(&str) -> Option<String>, name: &str, min: u16, max: u16) -> Option<u16> {
    let val = lookup(name)?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: usize,
    max: usize,
) -> Option<usize> {
    let val = lookup(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
