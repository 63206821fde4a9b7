//! Sync configuration.
//!
//! # Responsibility
//! - Define tunables for periodic sync, fetch timeout and notification policy.
//! - Load them from JSON with per-field defaults.
//!
//! # Invariants
//! - `period_secs` and `fetch_timeout_secs` are non-zero after `validate()`.
//! - `log_level` is one of `trace|debug|info|warn|error` after `validate()`.

use crate::logging::{default_log_level, normalize_level, LoggingError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Default periodic sync interval: four hours.
pub const DEFAULT_PERIOD_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// More than this many notifications in one cycle are folded into one.
pub const DEFAULT_COALESCE_ABOVE: usize = 3;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config: {err}"),
            Self::Parse(err) => write!(f, "cannot parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Boundary policy for how many notifications one cycle may raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    /// `None` delivers every notification individually.
    pub coalesce_above: Option<usize>,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            coalesce_above: Some(DEFAULT_COALESCE_ABOVE),
        }
    }
}

impl NotificationPolicy {
    /// Never coalesce.
    pub fn individual() -> Self {
        Self {
            coalesce_above: None,
        }
    }

    pub fn should_coalesce(&self, pending: usize) -> bool {
        self.coalesce_above
            .is_some_and(|threshold| pending > threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub period_secs: u64,
    pub fetch_timeout_secs: u64,
    pub notification: NotificationPolicy,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_PERIOD_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            notification: NotificationPolicy::default(),
            log_level: default_log_level().to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_secs == 0 {
            return Err(ConfigError::Invalid("period_secs must be > 0".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be > 0".to_string(),
            ));
        }
        normalize_level(&self.log_level).map_err(|level| {
            ConfigError::Invalid(format!("log_level: {}", LoggingError::UnsupportedLevel(level)))
        })?;
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
