//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `LIVEHUB_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use livehub_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{HubSettings, TokenEntry};

/// Resolve the default settings file (`~/.livehub/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livehub").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<HubSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving overrides through `env`.
pub fn load_settings_with<F>(path: &Path, env: F) -> Result<HubSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(HubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HubSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
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

/// Apply `LIVEHUB_*` overrides read through `env`.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_overrides<F>(settings: &mut HubSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = get("LIVEHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_PORT", |v| parse_range::<u16>(v, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = get("LIVEHUB_WS_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_MAX_CONNECTIONS", |v| {
        parse_range::<usize>(v, 1, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }

    // ── Keepalive / broadcast ───────────────────────────────────────
    if let Some(v) = parsed(&get, "LIVEHUB_PING_INTERVAL_SECS", |v| {
        parse_range::<u64>(v, 1, 3600)
    }) {
        settings.keepalive.ping_interval_secs = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_PONG_WAIT_SECS", |v| {
        parse_range::<u64>(v, 1, 7200)
    }) {
        settings.keepalive.pong_wait_secs = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_WRITE_TIMEOUT_SECS", |v| {
        parse_range::<u64>(v, 1, 300)
    }) {
        settings.broadcast.write_timeout_secs = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_HEALTH_INTERVAL_SECS", |v| {
        parse_range::<u64>(v, 0, 86_400)
    }) {
        settings.broadcast.health_interval_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = parsed(&get, "LIVEHUB_ALLOW_ANONYMOUS", parse_bool) {
        settings.auth.allow_anonymous = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_AUTH_TOKENS", parse_token_list) {
        settings.auth.tokens = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = get("LIVEHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&get, "LIVEHUB_LOG_FORMAT", |v| v.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
}

fn parsed<T, G, P>(get: &G, name: &str, parse: P) -> Option<T>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = get(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env override, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `subject=token` pairs separated by commas.
///
/// Any malformed pair rejects the whole list.
pub fn parse_token_list(val: &str) -> Option<Vec<TokenEntry>> {
    val.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (subject, token) = pair.split_once('=')?;
            let (subject, token) = (subject.trim(), token.trim());
            (!subject.is_empty() && !token.is_empty()).then(|| TokenEntry {
                subject: subject.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8090, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── load_settings_with ──────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings =
            load_settings_with(Path::new("/nonexistent/livehub/settings.json"), no_env).unwrap();
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.keepalive.ping_interval_secs, 30);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "keepalive": {"pongWaitSecs": 90}}"#,
        )
        .unwrap();

        let settings = load_settings_with(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.keepalive.pong_wait_secs, 90);
        assert_eq!(settings.keepalive.ping_interval_secs, 30);
        assert_eq!(settings.server.path, "/ws");
    }

    #[test]
    fn load_tokens_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"auth": {"allowAnonymous": false, "tokens": [{"subject": "ops", "token": "s3cret"}]}}"#,
        )
        .unwrap();

        let settings = load_settings_with(&path, no_env).unwrap();
        assert!(!settings.auth.allow_anonymous);
        assert_eq!(settings.auth.tokens.len(), 1);
        assert_eq!(settings.auth.tokens[0].subject, "ops");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"keepalive": {"pingIntervalSecs": 120}}"#).unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100}}"#).unwrap();

        let env = env_from(&[
            ("LIVEHUB_PORT", "9200"),
            ("LIVEHUB_LOG_FORMAT", "json"),
            ("LIVEHUB_ALLOW_ANONYMOUS", "off"),
            ("LIVEHUB_AUTH_TOKENS", "ops=abc, grafana=def"),
        ]);
        let settings = load_settings_with(&path, env).unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(!settings.auth.allow_anonymous);
        assert_eq!(settings.auth.tokens.len(), 2);
        assert_eq!(settings.auth.tokens[1].subject, "grafana");
        assert_eq!(settings.auth.tokens[1].token, "def");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = HubSettings::default();
        apply_overrides(
            &mut settings,
            env_from(&[
                ("LIVEHUB_PORT", "not-a-port"),
                ("LIVEHUB_PING_INTERVAL_SECS", "0"),
                ("LIVEHUB_ALLOW_ANONYMOUS", "maybe"),
                ("LIVEHUB_AUTH_TOKENS", "missing-separator"),
            ]),
        );
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.keepalive.ping_interval_secs, 30);
        assert!(settings.auth.allow_anonymous);
        assert!(settings.auth.tokens.is_empty());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut settings = HubSettings::default();
        apply_overrides(&mut settings, env_from(&[("LIVEHUB_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u64>("30", 1, 3600), Some(30));
        assert_eq!(parse_range::<u64>("0", 1, 3600), None);
        assert_eq!(parse_range::<u64>("3601", 1, 3600), None);
        assert_eq!(parse_range::<u16>("70000", 0, u16::MAX), None);
        assert_eq!(parse_range::<usize>(" 12 ", 1, 100), Some(12));
    }

    #[test]
    fn parse_token_list_pairs() {
        let tokens = parse_token_list("a=1,b=2,").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].subject, "a");
        assert_eq!(tokens[0].token, "1");
        assert!(parse_token_list("a=1,=2").is_none());
        assert!(parse_token_list("a=").is_none());
    }
}
