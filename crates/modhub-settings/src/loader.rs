//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `MODHUB_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{HubSettings, LogLevel};

/// Default settings file, relative to the working directory.
pub fn settings_path() -> PathBuf {
    PathBuf::from("modhub.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HubSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Like [`load_settings_from_path`], reading overrides through `lookup`.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<HubSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(HubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HubSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, &EnvSource(lookup));
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HubSettings) {
    apply_overrides(settings, &EnvSource(|name: &str| std::env::var(name).ok()));
}

/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
fn apply_overrides<F>(settings: &mut HubSettings, env: &EnvSource<F>)
where
    F: Fn(&str) -> Option<String>,
{
    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("MODHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MODHUB_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("MODHUB_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }

    // ── Auth settings ───────────────────────────────────────────────
    if let Some(v) = env.string("MODHUB_VERIFY_KEYS") {
        settings.auth.verify_keys_path = v;
    }
    if let Some(v) = env.u64("MODHUB_TOKEN_TTL_SECS", 1, 31_536_000) {
        settings.auth.token_ttl_secs = v;
    }
    if let Some(v) = env.bool("MODHUB_INSECURE_SKIP_VERIFICATION") {
        settings.auth.insecure_skip_verification = v;
    }

    // ── Collaborators ───────────────────────────────────────────────
    if let Some(v) = env.string("MODHUB_TEMPLATES_DIR") {
        settings.templates.directory = v;
    }
    if let Some(v) = env.string("MODHUB_USERS") {
        settings.users.directory_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MODHUB_LOG_LEVEL") {
        match serde_json::from_value::<LogLevel>(Value::String(v.to_lowercase())) {
            Ok(level) => settings.logging.level = level,
            Err(_) => warn!(key = "MODHUB_LOG_LEVEL", value = %v, "invalid log level env var, ignoring"),
        }
    }
    if let Some(v) = env.bool("MODHUB_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.0)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.0)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.0)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
