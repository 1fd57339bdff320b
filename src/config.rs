//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the link
//! control plane. Configuration is loaded from:
//! 1. Built-in defaults (one CRU card `#1` with 12 links and 12 channels)
//! 2. `config/alf.toml` (or a file given explicitly)
//! 3. Environment variables (prefixed with `ALF_`, nesting separated by `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ALF_APPLICATION__LOG_LEVEL=debug
//! ALF_TIMING__SWT_READ_TIMEOUT_MS=20
//! ALF_SWT__WORD_SIZE=high
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_alf::config::AlfConfig;
//!
//! let config = AlfConfig::load()?;
//! println!("Cards: {}", config.cards.len());
//! # Ok::<(), rust_alf::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocols::swt_word::SwtWordSize;

/// Number of links (and channels) of a CRU endpoint.
pub const CRU_NUM_LINKS: u32 = 12;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlfConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Timeouts and default step durations
    #[serde(default)]
    pub timing: TimingConfig,
    /// SWT adapter settings
    #[serde(default)]
    pub swt: SwtConfig,
    /// Card topology: which links and channels exist on each card
    #[serde(default = "default_cards")]
    pub cards: Vec<CardDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (text or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Timing configuration shared by every adapter bound through a registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Timeout used by a sequence `read` step that carries none
    #[serde(default = "default_swt_read_timeout")]
    pub swt_read_timeout_ms: u64,
    /// Duration used by a sequence `wait` step that carries none
    #[serde(default = "default_wait")]
    pub wait_ms: u64,
    /// Period between two polls of a read FIFO or busy flag
    #[serde(default = "default_poll_interval")]
    pub poll_interval_us: u64,
    /// Bound on the SCA busy-flag wait around a transaction
    #[serde(default = "default_sca_busy_timeout")]
    pub sca_busy_timeout_ms: u64,
    /// Bound on the SCA channel-busy wait while collecting a reply
    #[serde(default = "default_sca_busy_timeout")]
    pub sca_channel_busy_timeout_ms: u64,
    /// Settle time between an IC write and its acknowledge check
    #[serde(default = "default_ic_write_settle")]
    pub ic_write_settle_ms: u64,
}

/// SWT adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SwtConfig {
    /// Width of the words read and written by SWT adapters
    #[serde(default)]
    pub word_size: SwtWordSize,
}

/// A card and the ranges of links and channels it exposes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardDefinition {
    /// Card identifier (e.g. "#1" or a PCI address)
    pub id: String,
    /// Number of valid link ids
    #[serde(default = "default_num_links")]
    pub links: u32,
    /// Number of valid channel ids
    #[serde(default = "default_num_links")]
    pub channels: u32,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "rust_alf".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_swt_read_timeout() -> u64 {
    10
}

fn default_wait() -> u64 {
    3
}

fn default_poll_interval() -> u64 {
    500
}

fn default_sca_busy_timeout() -> u64 {
    10
}

fn default_ic_write_settle() -> u64 {
    10
}

fn default_num_links() -> u32 {
    CRU_NUM_LINKS
}

fn default_cards() -> Vec<CardDefinition> {
    vec![CardDefinition {
        id: "#1".to_string(),
        links: CRU_NUM_LINKS,
        channels: CRU_NUM_LINKS,
    }]
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            swt_read_timeout_ms: default_swt_read_timeout(),
            wait_ms: default_wait(),
            poll_interval_us: default_poll_interval(),
            sca_busy_timeout_ms: default_sca_busy_timeout(),
            sca_channel_busy_timeout_ms: default_sca_busy_timeout(),
            ic_write_settle_ms: default_ic_write_settle(),
        }
    }
}

impl Default for AlfConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            timing: TimingConfig::default(),
            swt: SwtConfig::default(),
            cards: default_cards(),
        }
    }
}

impl TimingConfig {
    pub fn swt_read_timeout(&self) -> Duration {
        Duration::from_millis(self.swt_read_timeout_ms)
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn sca_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.sca_busy_timeout_ms)
    }

    pub fn sca_channel_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.sca_channel_busy_timeout_ms)
    }

    pub fn ic_write_settle(&self) -> Duration {
        Duration::from_millis(self.ic_write_settle_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl AlfConfig {
    /// Load configuration from `config/alf.toml` and environment variables
    ///
    /// Precedence (highest to lowest): `ALF_` environment variables, the TOML
    /// file, built-in defaults. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/alf.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or the result is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(AlfConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ALF_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and log format are known
    /// - Card ids are non-empty and unique
    /// - Every card has at least one link and one channel
    /// - The poll interval is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.timing.poll_interval_us == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_us must be greater than 0".to_string(),
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for card in &self.cards {
            if card.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Card id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&card.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate card ID: '{}'",
                    card.id
                )));
            }
            if card.links == 0 || card.channels == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Card '{}' must expose at least one link and one channel",
                    card.id
                )));
            }
        }

        Ok(())
    }

    /// Look up a card definition by id
    pub fn card(&self, id: &str) -> Option<&CardDefinition> {
        self.cards.iter().find(|card| card.id == id)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
