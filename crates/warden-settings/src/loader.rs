//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WardenSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WARDEN_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{StorageBackend, WardenSettings};

/// `~/.warden`, or `/tmp/.warden` when `HOME` is unset.
pub fn warden_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden")
}

/// Resolve the path to the settings file (`~/.warden/settings.json`).
pub fn settings_path() -> PathBuf {
    warden_home().join("settings.json")
}

/// Resolve a configured path: absolute paths pass through, relative ones
/// land under [`warden_home`].
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        warden_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
fn load_file_layer(path: &Path) -> Result<WardenSettings> {
    let defaults = serde_json::to_value(WardenSettings::default())?;

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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WARDEN_*` environment variable overrides to loaded settings.
///
/// Integers must parse and fall inside their range, booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_env_overrides(settings: &mut WardenSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// [`apply_env_overrides`] over an arbitrary variable source.
pub fn apply_overrides<F>(settings: &mut WardenSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("WARDEN_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("WARDEN_KEEP_ALIVE_SECS", 1, 3_600) {
        settings.server.keep_alive_secs = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_STORAGE_BACKEND") {
        match parse_enum::<StorageBackend>(&v) {
            Some(backend) => settings.storage.backend = backend,
            None => tracing::warn!(key = "WARDEN_STORAGE_BACKEND", value = %v, "invalid storage backend, ignoring"),
        }
    }
    if let Some(v) = env.string("WARDEN_DB_PATH") {
        settings.storage.db_path = v;
    }

    // ── Policies ────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_POLICIES_DIR") {
        settings.policies.dir = v;
    }

    // ── Models ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_MODEL_BASE_URL") {
        settings.models.base_url = v;
    }
    if let Some(v) = env.string("WARDEN_API_KEY_ENV") {
        settings.models.api_key_env = v;
    }
    if let Some(v) = env.string("WARDEN_GATE_MODEL") {
        settings.models.gate_model = v;
    }
    if let Some(v) = env.string("WARDEN_TASK_MODEL") {
        settings.models.task_model = v;
    }
    if let Some(v) = env.u64("WARDEN_MODEL_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.models.timeout_ms = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_FRAGMENT_ATTRIBUTION") {
        match parse_enum(&v) {
            Some(mode) => settings.runtime.fragment_attribution = mode,
            None => tracing::warn!(key = "WARDEN_FRAGMENT_ATTRIBUTION", value = %v, "invalid attribution, ignoring"),
        }
    }
    if let Some(v) = env.usize("WARDEN_MAX_BUNDLES", 1, 64) {
        settings.runtime.max_bundles = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WARDEN_LOG_JSON") {
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

/// Parse a lowercase unit-variant name through serde.
fn parse_enum<T: serde::de::DeserializeOwned>(val: &str) -> Option<T> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use warden_core::events::FragmentAttribution;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8787, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null, "c": 3});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["c"], 3);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, WardenSettings::default().server.port);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "runtime": {"fragmentAttribution": "strict"}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.runtime.fragment_attribution, FragmentAttribution::Strict);
    }

    #[test]
    fn file_replaces_default_bundles_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"policies": {"defaultRunConfig": {"policy_bundles": [
                {"tag": "strict", "policy_ids": ["no-violence"]},
                {"tag": "lenient", "policy_ids": ["family"]}
            ]}}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        let bundles = &settings.policies.default_run_config.policy_bundles;
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[1].tag.as_str(), "lenient");
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"runtime": {"channelCapacity": 0}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = WardenSettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("WARDEN_PORT", "9000"),
                ("WARDEN_STORAGE_BACKEND", "Memory"),
                ("WARDEN_FRAGMENT_ATTRIBUTION", "strict"),
                ("WARDEN_MAX_BUNDLES", "3"),
                ("WARDEN_LOG_JSON", "yes"),
                ("WARDEN_GATE_MODEL", "gate-small"),
            ]),
        );
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.runtime.fragment_attribution, FragmentAttribution::Strict);
        assert_eq!(settings.runtime.max_bundles, 3);
        assert!(settings.logging.json);
        assert_eq!(settings.models.gate_model, "gate-small");
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = WardenSettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("WARDEN_PORT", "0"),
                ("WARDEN_STORAGE_BACKEND", "postgres"),
                ("WARDEN_MAX_BUNDLES", "many"),
                ("WARDEN_LOG_JSON", "maybe"),
                ("WARDEN_HOST", ""),
            ]),
        );
        let defaults = WardenSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.storage.backend, defaults.storage.backend);
        assert_eq!(settings.runtime.max_bundles, defaults.runtime.max_bundles);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, defaults.server.host);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("999", 1_000, 2_000), None);
        assert_eq!(parse_usize_range("4", 1, 64), Some(4));
        assert_eq!(parse_usize_range("-1", 1, 64), None);
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        assert_eq!(resolve_path("/var/lib/warden.db"), PathBuf::from("/var/lib/warden.db"));
        assert!(resolve_path("warden.db").ends_with(".warden/warden.db"));
    }
}
