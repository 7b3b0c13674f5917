//! Configuration management for the COC alert relay.
//!
//! The relay reads an optional JSON file at `~/.coc-relay/config.json`
//! (or the path in `COC_CONFIG`) and then applies environment overrides.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `BOT_TOKEN` → telegram.bot_token
//! - `SOURCE_BOT_TOKEN` → telegram.source_bot_token
//! - `SOURCE_CHAT_ID` → telegram.source_chat_id
//! - `TARGET_CHAT_ID` → telegram.target_chat_id
//! - `IGNORE_MSG_FROM_ID` → telegram.ignore_sender_id
//! - `TRIGGERS` → alerts.triggers (comma separated)
//! - `COC_TIMEZONE` → alerts.timezone (`TZ` is used only when it names an
//!   IANA zone)
//! - `METRICS_HOST` / `METRICS_PORT` → metrics.host / metrics.port
//! - `LOG_LEVEL` / `LOG_FORMAT` → observability.*
//!
//! Overrides that are present but unparsable are reported by
//! [`Config::validate`].

use crate::error::{Result, ResultExt};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".coc-relay"),
        |dirs| dirs.home_dir().join(".coc-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("COC_CONFIG") {
        return PathBuf::from(explicit);
    }
    config_dir().join("config.json")
}

// ============================================================================
// Sections
// ============================================================================

/// Telegram connection settings for both feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Token of the triage bot (posts relays, receives button presses)
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Token of the connection reading the alert-source chat.
    /// Falls back to `bot_token` when absent.
    #[serde(default)]
    pub source_bot_token: Option<String>,

    /// Chat that alerts are read from
    #[serde(default)]
    pub source_chat_id: Option<i64>,

    /// Chat that alerts are relayed into
    #[serde(default)]
    pub target_chat_id: Option<i64>,

    /// Sender whose messages are never treated as alerts
    #[serde(default)]
    pub ignore_sender_id: Option<i64>,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            source_bot_token: None,
            source_chat_id: None,
            target_chat_id: None,
            ignore_sender_id: None,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl TelegramConfig {
    /// Token used by the alert-source feed.
    pub fn source_token(&self) -> Option<&str> {
        self.source_bot_token
            .as_deref()
            .or(self.bot_token.as_deref())
    }
}

fn default_poll_timeout() -> u64 {
    30
}

/// Alert detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Case-insensitive substrings that mark a message as an alert
    #[serde(default)]
    pub triggers: Vec<String>,

    /// IANA timezone used for human-facing timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            triggers: Vec::new(),
            timezone: default_timezone(),
        }
    }
}

impl AlertsConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> ValidationResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ValidationError::InvalidValue {
                field: "alerts.timezone".into(),
                reason: e.to_string(),
            })
    }
}

fn default_timezone() -> String {
    "UTC".into()
}

/// Prometheus endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_host() -> String {
    "0.0.0.0".into()
}

fn default_metrics_port() -> u16 {
    9100
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// File the values were read from, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,

    /// Overrides that were set but could not be parsed
    #[serde(skip)]
    invalid_overrides: Vec<ValidationError>,

    /// `TZ` value skipped because it is not an IANA zone name
    #[serde(skip)]
    ignored_tz: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))?;
        config.loaded_from = Some(path.to_path_buf());
        config.normalize();
        Ok(config)
    }

    /// Log where the configuration came from. Call after logging is set up.
    pub fn log_startup(&self) {
        match &self.loaded_from {
            Some(path) => tracing::info!(path = %path.display(), "Loaded config file"),
            None => tracing::info!("Config file not found, using defaults"),
        }
        if let Some(tz) = &self.ignored_tz {
            tracing::warn!(
                tz = %tz,
                timezone = %self.alerts.timezone,
                "TZ is not an IANA zone name, ignoring it"
            );
        }
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(token) = lookup("SOURCE_BOT_TOKEN") {
            self.telegram.source_bot_token = Some(token);
        }

        let invalid = &mut self.invalid_overrides;
        if let Some(id) = parse_override(&lookup, "SOURCE_CHAT_ID", "telegram.source_chat_id", invalid) {
            self.telegram.source_chat_id = Some(id);
        }
        if let Some(id) = parse_override(&lookup, "TARGET_CHAT_ID", "telegram.target_chat_id", invalid) {
            self.telegram.target_chat_id = Some(id);
        }
        if let Some(id) = parse_override(&lookup, "IGNORE_MSG_FROM_ID", "telegram.ignore_sender_id", invalid) {
            self.telegram.ignore_sender_id = Some(id);
        }
        if let Some(port) = parse_override(&lookup, "METRICS_PORT", "metrics.port", invalid) {
            self.metrics.port = port;
        }

        if let Some(raw) = lookup("TRIGGERS") {
            self.alerts.triggers = parse_triggers(&raw);
        }
        if let Some(tz) = lookup("COC_TIMEZONE") {
            self.alerts.timezone = tz.trim().to_string();
        } else if let Some(tz) = lookup("TZ") {
            if tz.trim().parse::<Tz>().is_ok() {
                self.alerts.timezone = tz.trim().to_string();
            } else {
                self.ignored_tz = Some(tz);
            }
        }

        if let Some(host) = lookup("METRICS_HOST") {
            self.metrics.host = host;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.observability.log_format = format;
        }

        self.normalize();
    }

    /// Normalise triggers into a lower-cased, de-duplicated set.
    fn normalize(&mut self) {
        let mut triggers: Vec<String> = Vec::with_capacity(self.alerts.triggers.len());
        for trigger in &self.alerts.triggers {
            let folded = trigger.trim().to_lowercase();
            if !folded.is_empty() && !triggers.contains(&folded) {
                triggers.push(folded);
            }
        }
        self.alerts.triggers = triggers;
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = self.invalid_overrides.clone();

        let telegram = &self.telegram;
        if telegram.bot_token.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            });
        }
        if telegram.source_chat_id.is_none() {
            errors.push(ValidationError::MissingField {
                field: "telegram.source_chat_id".into(),
            });
        }
        if telegram.target_chat_id.is_none() {
            errors.push(ValidationError::MissingField {
                field: "telegram.target_chat_id".into(),
            });
        }
        if telegram.ignore_sender_id.is_none() {
            errors.push(ValidationError::MissingField {
                field: "telegram.ignore_sender_id".into(),
            });
        }
        if let (Some(source), Some(target)) = (telegram.source_chat_id, telegram.target_chat_id) {
            if source == target {
                errors.push(ValidationError::Conflict {
                    reason: format!("source and target chat are both {source}"),
                });
            }
        }

        if let Err(e) = self.alerts.tz() {
            errors.push(e);
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "metrics.port".into(),
                reason: "must be between 1 and 65535".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

/// Parse the override `key` if it is set. An unparsable value is recorded
/// against `field` and leaves the current setting in place.
fn parse_override<T, F>(
    lookup: &F,
    key: &str,
    field: &str,
    invalid: &mut Vec<ValidationError>,
) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            invalid.push(ValidationError::InvalidValue {
                field: field.into(),
                reason: format!("{key}={raw:?}: {e}"),
            });
            None
        }
    }
}

/// Split a comma-separated trigger list, dropping empty items.
pub fn parse_triggers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation error.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
