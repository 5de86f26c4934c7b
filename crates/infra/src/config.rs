//! Dispatcher configuration.
//!
//! Defaults cover the common case; `from_env()` overrides them from
//! `CHRONICLE_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_NAME: &str = "CHRONICLE_DISPATCH_NAME";
pub const ENV_INTERVAL_MS: &str = "CHRONICLE_DISPATCH_INTERVAL_MS";
pub const ENV_BATCH_SIZE: &str = "CHRONICLE_DISPATCH_BATCH_SIZE";
pub const ENV_CONFIRMATION_TIMEOUT_SECS: &str = "CHRONICLE_CONFIRMATION_TIMEOUT_SECS";
pub const ENV_CONFIRMATION_CHECK_INTERVAL_MS: &str = "CHRONICLE_CONFIRMATION_CHECK_INTERVAL_MS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error("{0}")]
    OutOfRange(String),
}

/// Settings for one journal dispatcher and the worker hosting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Dispatcher name; also names its global reader, so the cursor survives restarts.
    pub name: String,
    /// Polling interval between dispatch cycles.
    pub interval: Duration,
    /// Maximum entries read per cycle.
    pub batch_size: usize,
    /// How long a projectable may stay pending before `check_unconfirmed` reports it.
    pub confirmation_timeout: Duration,
    /// When set, the worker re-dispatches unconfirmed projectables on this period.
    pub confirmation_check_interval: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "journal-dispatcher".to_string(),
            interval: Duration::from_millis(100),
            batch_size: 100,
            confirmation_timeout: Duration::from_secs(30),
            confirmation_check_interval: None,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl DispatcherConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_confirmation_check_interval(mut self, interval: Duration) -> Self {
        self.confirmation_check_interval = Some(interval);
        self
    }

    /// Defaults overridden by `CHRONICLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_NAME) {
            config.name = name;
        }
        if let Some(v) = lookup(ENV_INTERVAL_MS) {
            config.interval = Duration::from_millis(parse(ENV_INTERVAL_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = parse(ENV_BATCH_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_CONFIRMATION_TIMEOUT_SECS) {
            config.confirmation_timeout =
                Duration::from_secs(parse(ENV_CONFIRMATION_TIMEOUT_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_CONFIRMATION_CHECK_INTERVAL_MS) {
            config.confirmation_check_interval = Some(Duration::from_millis(parse(
                ENV_CONFIRMATION_CHECK_INTERVAL_MS,
                &v,
            )?));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::OutOfRange("dispatcher name must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange("batch size must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::OutOfRange("interval must be non-zero".into()));
        }
        if self.confirmation_check_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::OutOfRange(
                "confirmation check interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
