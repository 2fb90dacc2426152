//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::MurmurSettings;

/// `~/.murmur/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".murmur").join("settings.json")
}

pub fn load_settings() -> Result<MurmurSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path, then apply `MURMUR_*` overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MurmurSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<MurmurSettings> {
    let defaults = serde_json::to_value(MurmurSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `MURMUR_*` environment variables. Invalid values are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut MurmurSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an arbitrary variable source.
pub fn apply_overrides<F>(settings: &mut MurmurSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("MURMUR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MURMUR_PORT", 1, 65535) {
        settings.server.port = v;
    }

    if let Some(v) = env.string("MURMUR_AGENT_URL") {
        settings.agent.url = Some(v);
    }
    if let Some(v) = env.string("MURMUR_AGENT_API_KEY") {
        settings.agent.api_key = Some(v);
    }

    if let Some(v) = env.string("MURMUR_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = env.bool("MURMUR_SHOW_STEPS") {
        settings.client.show_intermediate_steps = v;
    }
    if let Some(v) = env.u64("MURMUR_REPLAY_MIN_MS", 0, 60_000) {
        settings.client.replay_min_ms = v;
    }
    if let Some(v) = env.u64("MURMUR_REPLAY_MAX_MS", 0, 60_000) {
        settings.client.replay_max_ms = v;
    }
    if settings.client.replay_min_ms > settings.client.replay_max_ms {
        warn!(
            min = settings.client.replay_min_ms,
            max = settings.client.replay_max_ms,
            "replay window inverted, collapsing to minimum"
        );
        settings.client.replay_max_ms = settings.client.replay_min_ms;
    }

    if let Some(v) = env.string("MURMUR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MURMUR_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("MURMUR_LOG_DB") {
        settings.logging.db_path = Some(v);
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
