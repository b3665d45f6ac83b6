use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upper bound accepted for `sync.pending_link_capacity`.
pub const MAX_PENDING_LINK_CAPACITY: usize = 65_536;

/// User-facing history settings, persisted as history.toml.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HistoryConfig {
    /// Loads config from a TOML file. Returns default config if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, HistoryConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), HistoryConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates config values and returns list of validation errors.
    /// Returns empty vec if config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.sync.pending_link_capacity > MAX_PENDING_LINK_CAPACITY {
            errors.push(format!(
                "pending_link_capacity must be at most {MAX_PENDING_LINK_CAPACITY}"
            ));
        }

        if self.logging.log_level.trim().is_empty() {
            errors.push("log_level must not be empty".to_string());
        }

        errors
    }

    /// Returns a validated config, replacing invalid values with defaults.
    pub fn with_defaults_for_invalid(&self) -> Self {
        let defaults = Self::default();
        Self {
            sync: SyncConfig {
                pending_link_capacity: if self.sync.pending_link_capacity
                    > MAX_PENDING_LINK_CAPACITY
                {
                    defaults.sync.pending_link_capacity
                } else {
                    self.sync.pending_link_capacity
                },
            },
            logging: LoggingConfig {
                log_level: if self.logging.log_level.trim().is_empty() {
                    defaults.logging.log_level
                } else {
                    self.logging.log_level.clone()
                },
            },
        }
    }
}

/// Change-feed synchronization settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many selections may wait for their query link before the oldest is dropped.
    #[serde(default = "default_pending_link_capacity")]
    pub pending_link_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pending_link_capacity: default_pending_link_capacity(),
        }
    }
}

fn default_pending_link_capacity() -> usize {
    256
}

/// Logging settings, applied by hosts that install a subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `warn` or `qhist_search=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Errors that can occur when loading or saving config.
#[derive(Debug, Error)]
pub enum HistoryConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
