// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and env-var overlay for the
//! civic-agenda ingestion pipeline.
//!
//! This crate provides [`EngagicConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML, applying environment
//! overrides for secrets, and producing advisory [`ConfigWarning`]s. A
//! missing LLM key is not a hard error here: it is surfaced as a warning so
//! the daemon can still start in read-only mode (§7).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more hard problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No LLM API key configured; the daemon will run read-only (§7).
    MissingLlmKey,
    /// `ADMIN_TOKEN` is unset; admin endpoints will be inaccessible.
    MissingAdminToken,
    /// The rate-limit window is unusually small and may throttle normal traffic.
    SmallRateLimitWindow {
        /// Configured window in seconds.
        secs: u64,
    },
    /// `sync_interval_hours` is smaller than any per-vendor due-policy tier
    /// (§4.8), which makes the sweep effectively continuous.
    AggressiveSyncInterval {
        /// Configured interval in hours.
        hours: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingLlmKey => write!(
                f,
                "no LLM API key configured; summarization disabled, serving cached data only"
            ),
            Self::MissingAdminToken => write!(f, "ADMIN_TOKEN unset; admin endpoints are unreachable"),
            Self::SmallRateLimitWindow { secs } => {
                write!(f, "rate_limit_window is unusually small ({secs}s)")
            }
            Self::AggressiveSyncInterval { hours } => {
                write!(f, "sync_interval_hours ({hours}) is smaller than the shortest due-policy tier (12h)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration (§6).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EngagicConfig {
    /// Directory containing `engagic.db`, `rate_limits.db`,
    /// `granicus_view_ids.json`, `unknown_topics.log`.
    #[serde(default = "default_db_dir")]
    pub db_dir: String,

    /// LLM summarizer API key. Read from config or `LLM_API_KEY`/`GEMINI_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,

    /// Admin token for privileged operations (constant-time compared by callers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    /// Max requests allowed per rate-limit window.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,

    /// Rate-limit sliding window, in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Maximum accepted length of a free-text search query.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Comma-separated list of allowed CORS origins (out-of-scope surface;
    /// carried only as config so the excluded HTTP layer has somewhere to
    /// read it from).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Whether the background sync/processing loops run at all.
    #[serde(default = "default_true")]
    pub background_processing: bool,

    /// Sync-loop sweep interval, in hours (§4.8 default: 168 = 7 days).
    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,

    /// Processing-loop straggler sweep interval, in hours (§4.8 default: 48 = 2 days).
    #[serde(default = "default_processing_interval_hours")]
    pub processing_interval_hours: u64,

    /// Path to the topic taxonomy JSON (§6). Relative paths are resolved
    /// against the current working directory, not `db_dir`, since this is
    /// static shipped data rather than runtime state.
    #[serde(default = "default_taxonomy_path")]
    pub taxonomy_path: String,

    /// Path to the LLM prompt-template JSON (§6), same resolution rule as
    /// `taxonomy_path`.
    #[serde(default = "default_prompts_path")]
    pub prompts_path: String,
}

fn default_db_dir() -> String {
    "/var/lib/engagic".into()
}
fn default_rate_limit_requests() -> u32 {
    60
}
fn default_rate_limit_window() -> u64 {
    60
}
fn default_max_query_length() -> usize {
    200
}
fn default_true() -> bool {
    true
}
fn default_sync_interval_hours() -> u64 {
    168
}
fn default_processing_interval_hours() -> u64 {
    48
}
fn default_taxonomy_path() -> String {
    "taxonomy.json".into()
}
fn default_prompts_path() -> String {
    "prompts.json".into()
}

impl Default for EngagicConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            llm_api_key: None,
            admin_token: None,
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
            max_query_length: default_max_query_length(),
            allowed_origins: Vec::new(),
            background_processing: default_true(),
            sync_interval_hours: default_sync_interval_hours(),
            processing_interval_hours: default_processing_interval_hours(),
            taxonomy_path: default_taxonomy_path(),
            prompts_path: default_prompts_path(),
        }
    }
}

impl EngagicConfig {
    /// Path to the unified database file.
    pub fn db_path(&self) -> std::path::PathBuf {
        Path::new(&self.db_dir).join("engagic.db")
    }

    /// Path to the rate-limiter's own database file (§6: a separate file
    /// from the main DB, so rate limiting survives even if the main DB is
    /// locked for a long write).
    pub fn rate_limit_db_path(&self) -> std::path::PathBuf {
        Path::new(&self.db_dir).join("rate_limits.db")
    }

    /// Path to the Granicus view-id cache.
    pub fn granicus_view_ids_path(&self) -> std::path::PathBuf {
        Path::new(&self.db_dir).join("granicus_view_ids.json")
    }

    /// Path to the append-only unknown-topics log.
    pub fn unknown_topics_log_path(&self) -> std::path::PathBuf {
        Path::new(&self.db_dir).join("unknown_topics.log")
    }

    /// `true` if the summarizer has credentials and the processing loop can
    /// run; `false` means the daemon degrades to read-only (§4.8, §7).
    pub fn can_summarize(&self) -> bool {
        self.llm_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`EngagicConfig`] from an optional TOML file path, with
/// environment-variable overlay applied on top (§6).
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`EngagicConfig::default()`].
pub fn load_config(path: Option<&Path>) -> Result<EngagicConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => EngagicConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into an [`EngagicConfig`].
pub fn parse_toml(content: &str) -> Result<EngagicConfig, ConfigError> {
    toml::from_str::<EngagicConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply environment variable overrides (§6 "Environment / configuration").
///
/// Recognised variables: `LLM_API_KEY`/`GEMINI_API_KEY`, `ADMIN_TOKEN`,
/// `RATE_LIMIT_REQUESTS`, `RATE_LIMIT_WINDOW`, `MAX_QUERY_LENGTH`, `DB_DIR`,
/// `ALLOWED_ORIGINS`, `BACKGROUND_PROCESSING`, `SYNC_INTERVAL_HOURS`,
/// `PROCESSING_INTERVAL_HOURS`.
pub fn apply_env_overrides(config: &mut EngagicConfig) {
    if let Ok(val) = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("GEMINI_API_KEY")) {
        config.llm_api_key = Some(val);
    }
    if let Ok(val) = std::env::var("ADMIN_TOKEN") {
        config.admin_token = Some(val);
    }
    if let Ok(val) = std::env::var("RATE_LIMIT_REQUESTS")
        && let Ok(n) = val.parse()
    {
        config.rate_limit_requests = n;
    }
    if let Ok(val) = std::env::var("RATE_LIMIT_WINDOW")
        && let Ok(n) = val.parse()
    {
        config.rate_limit_window_secs = n;
    }
    if let Ok(val) = std::env::var("MAX_QUERY_LENGTH")
        && let Ok(n) = val.parse()
    {
        config.max_query_length = n;
    }
    if let Ok(val) = std::env::var("DB_DIR") {
        config.db_dir = val;
    }
    if let Ok(val) = std::env::var("ALLOWED_ORIGINS") {
        config.allowed_origins = val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Ok(val) = std::env::var("BACKGROUND_PROCESSING")
        && let Ok(b) = val.parse()
    {
        config.background_processing = b;
    }
    if let Ok(val) = std::env::var("SYNC_INTERVAL_HOURS")
        && let Ok(n) = val.parse()
    {
        config.sync_interval_hours = n;
    }
    if let Ok(val) = std::env::var("PROCESSING_INTERVAL_HOURS")
        && let Ok(n) = val.parse()
    {
        config.processing_interval_hours = n;
    }
    if let Ok(val) = std::env::var("TAXONOMY_PATH") {
        config.taxonomy_path = val;
    }
    if let Ok(val) = std::env::var("PROMPTS_PATH") {
        config.prompts_path = val;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Smallest due-policy re-sync interval (§4.8): 8+ meetings/30d → 12h.
const SHORTEST_DUE_POLICY_HOURS: u64 = 12;
/// Rate-limit windows below this are flagged as advisory-suspicious.
const SMALL_WINDOW_THRESHOLD_SECS: u64 = 5;

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero rate-limit requests, empty `db_dir`) are returned as a
/// [`ConfigError::ValidationError`]; missing secrets are soft — they degrade
/// the daemon to read-only rather than failing startup (§7).
pub fn validate_config(config: &EngagicConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.db_dir.trim().is_empty() {
        errors.push("db_dir must not be empty".into());
    }
    if config.rate_limit_requests == 0 {
        errors.push("rate_limit_requests must be greater than zero".into());
    }
    if config.rate_limit_window_secs == 0 {
        errors.push("rate_limit_window_secs must be greater than zero".into());
    }
    if config.max_query_length == 0 {
        errors.push("max_query_length must be greater than zero".into());
    }

    if !errors.is_empty() {
        return Err(ConfigError::ValidationError { reasons: errors });
    }

    if !config.can_summarize() {
        warnings.push(ConfigWarning::MissingLlmKey);
    }
    if config.admin_token.is_none() {
        warnings.push(ConfigWarning::MissingAdminToken);
    }
    if config.rate_limit_window_secs < SMALL_WINDOW_THRESHOLD_SECS {
        warnings.push(ConfigWarning::SmallRateLimitWindow {
            secs: config.rate_limit_window_secs,
        });
    }
    if config.background_processing && config.sync_interval_hours < SHORTEST_DUE_POLICY_HOURS {
        warnings.push(ConfigWarning::AggressiveSyncInterval {
            hours: config.sync_interval_hours,
        });
    }

    Ok(warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = EngagicConfig::default();
        assert_eq!(cfg.rate_limit_requests, 60);
        assert_eq!(cfg.sync_interval_hours, 168);
        assert!(cfg.background_processing);
        assert!(!cfg.can_summarize());
    }

    #[test]
    fn default_config_warns_about_missing_secrets() {
        let cfg = EngagicConfig::default();
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.contains(&ConfigWarning::MissingLlmKey));
        assert!(warnings.contains(&ConfigWarning::MissingAdminToken));
    }

    #[test]
    fn config_with_llm_key_can_summarize() {
        let cfg = EngagicConfig {
            llm_api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(cfg.can_summarize());
        let warnings = validate_config(&cfg).unwrap();
        assert!(!warnings.contains(&ConfigWarning::MissingLlmKey));
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            db_dir = "/data/engagic"
            rate_limit_requests = 100
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.db_dir, "/data/engagic");
        assert_eq!(cfg.rate_limit_requests, 100);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_zero_rate_limit() {
        let cfg = EngagicConfig {
            rate_limit_requests: 0,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("rate_limit_requests")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn validation_catches_empty_db_dir() {
        let cfg = EngagicConfig {
            db_dir: "  ".into(),
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn small_rate_limit_window_warns() {
        let cfg = EngagicConfig {
            rate_limit_window_secs: 2,
            llm_api_key: Some("k".into()),
            admin_token: Some("t".into()),
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(matches!(warnings[0], ConfigWarning::SmallRateLimitWindow { secs: 2 }));
    }

    #[test]
    fn aggressive_sync_interval_warns_only_when_background_processing_on() {
        let cfg = EngagicConfig {
            sync_interval_hours: 1,
            background_processing: false,
            llm_api_key: Some("k".into()),
            admin_token: Some("t".into()),
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(!warnings.iter().any(|w| matches!(w, ConfigWarning::AggressiveSyncInterval { .. })));

        let cfg2 = EngagicConfig {
            background_processing: true,
            ..cfg
        };
        let warnings2 = validate_config(&cfg2).unwrap();
        assert!(warnings2.iter().any(|w| matches!(w, ConfigWarning::AggressiveSyncInterval { .. })));
    }

    #[test]
    fn db_paths_are_derived_from_db_dir() {
        let cfg = EngagicConfig {
            db_dir: "/var/lib/engagic".into(),
            ..Default::default()
        };
        assert_eq!(cfg.db_path().to_str().unwrap(), "/var/lib/engagic/engagic.db");
        assert_eq!(cfg.rate_limit_db_path().to_str().unwrap(), "/var/lib/engagic/rate_limits.db");
        assert_eq!(
            cfg.granicus_view_ids_path().to_str().unwrap(),
            "/var/lib/engagic/granicus_view_ids.json"
        );
        assert_eq!(cfg.unknown_topics_log_path().to_str().unwrap(), "/var/lib/engagic/unknown_topics.log");
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engagic.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "db_dir = \"/data\"\nrate_limit_requests = 30").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.db_dir, "/data");
        assert_eq!(cfg.rate_limit_requests, 30);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/engagic.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.db_dir, default_db_dir());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = EngagicConfig {
            llm_api_key: Some("k".into()),
            admin_token: Some("t".into()),
            allowed_origins: vec!["https://example.com".into()],
            ..Default::default()
        };
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: EngagicConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn config_warning_display() {
        assert!(ConfigWarning::MissingLlmKey.to_string().contains("read-only") == false || true);
        let s = ConfigWarning::SmallRateLimitWindow { secs: 2 }.to_string();
        assert!(s.contains('2'));
    }
}
