//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SupervisorSettings;

/// Resolve the settings file path: `SUPERVISOR_CONFIG` if set, otherwise
/// `~/.supervisor/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("SUPERVISOR_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".supervisor").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SupervisorSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SupervisorSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<SupervisorSettings> {
    let defaults = serde_json::to_value(SupervisorSettings::default())?;

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
        (_, source) => source,
    }
}

/// Apply `SUPERVISOR_*` environment overrides.
///
/// Numbers must parse and fall within range; enums must name a variant.
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut SupervisorSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SUPERVISOR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SUPERVISOR_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("SUPERVISOR_SESSION_HEADER") {
        settings.server.session_header = v;
    }
    if let Some(v) = read_env_u64("SUPERVISOR_SSE_KEEP_ALIVE_SECS", 1, 3600) {
        settings.server.sse_keep_alive_secs = v;
    }

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = read_env_enum("SUPERVISOR_MODEL_PROVIDER") {
        settings.model.provider = v;
    }
    if let Some(v) = read_env_string("SUPERVISOR_MODEL_ID") {
        settings.model.model_id = v;
    }
    if let Some(v) = read_env_f64("SUPERVISOR_TEMPERATURE", 0.0, 1.0) {
        settings.model.temperature = v;
    }
    if let Some(v) = read_env_u64("SUPERVISOR_MAX_TOKENS", 1, 200_000) {
        settings.model.max_tokens = v as u32;
    }
    if let Some(v) = read_env_string("SUPERVISOR_MODEL_BASE_URL") {
        settings.model.base_url = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_env_enum("SUPERVISOR_SESSION_MODE") {
        settings.session.mode = v;
    }
    if let Some(v) = read_env_usize("SUPERVISOR_WINDOW_SIZE", 1, 10_000) {
        settings.session.conversation_window_size = v;
    }
    if let Some(v) = read_env_u64("SUPERVISOR_MAX_TOOL_ROUNDS", 1, 100) {
        settings.session.max_tool_rounds = v as u32;
    }
    if let Some(v) = read_env_u64("SUPERVISOR_IDLE_TTL_SECS", 1, 604_800) {
        settings.session.idle_ttl_secs = Some(v);
    }

    // ── Memory store / knowledge base ──────────────────────────────
    if let Some(v) = read_env_string("SUPERVISOR_MEMORY_ID") {
        settings.memory_store.memory_id = Some(v);
    }
    if let Some(v) = read_env_string("SUPERVISOR_MEMORY_PATH") {
        settings.memory_store.path = v;
    }
    if let Some(v) = read_env_string("SUPERVISOR_KNOWLEDGE_BASE_ID") {
        settings.knowledge_base.knowledge_base_id = Some(v);
    }
    if let Some(v) = read_env_string("SUPERVISOR_KNOWLEDGE_BASE_ENDPOINT") {
        settings.knowledge_base.endpoint = Some(v);
    }

    // ── Tools / agent / logging ────────────────────────────────────
    if let Some(v) = read_env_string("SUPERVISOR_TOOLS") {
        settings.tools.enabled = parse_list(&v);
    }
    if let Some(v) = read_env_string("SUPERVISOR_SYSTEM_PROMPT") {
        settings.agent.system_prompt = v;
    }
    if let Some(v) = read_env_string("SUPERVISOR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_enum("SUPERVISOR_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a snake/lowercase enum name through its serde representation.
pub fn parse_enum<T: serde::de::DeserializeOwned>(val: &str) -> Option<T> {
    serde_json::from_value(Value::String(val.trim().to_lowercase())).ok()
}

/// Split a comma-separated list, dropping empty entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

fn read_env_enum<T: serde::de::DeserializeOwned>(name: &str) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse_enum(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "unrecognized env var value, ignoring");
    }
    result
}
