//! Configuration for the stolen-time accounting runtime.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StealError, StealResult};

/// Nanoseconds per second, used to derive the tick length.
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Top-level accounting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Scheduler tick frequency in Hz; the tick length is
    /// `1s / scheduler_hz`.
    pub scheduler_hz: u32,

    /// Period of the sampling loop. Defaults to one scheduler tick.
    #[serde(with = "humantime_serde")]
    pub sample_period: Duration,

    /// Bound on the stop handshake: how long `stop()` waits for the
    /// sampling thread to acknowledge before reporting a timeout.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Interval between periodic counter reports (daemon only).
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        let scheduler_hz = 100;
        Self {
            scheduler_hz,
            sample_period: Duration::from_nanos(NS_PER_SEC / u64::from(scheduler_hz)),
            stop_timeout: Duration::from_secs(5),
            report_interval: Duration::from_secs(10),
        }
    }
}

impl AccountingConfig {
    /// Length of one scheduler tick in nanoseconds.
    #[must_use]
    pub fn tick_length_ns(&self) -> u64 {
        if self.scheduler_hz == 0 {
            0
        } else {
            NS_PER_SEC / u64::from(self.scheduler_hz)
        }
    }

    /// Validated tick length; fails on a zero or out-of-range frequency.
    pub fn tick_length(&self) -> StealResult<NonZeroU64> {
        NonZeroU64::new(self.tick_length_ns()).ok_or_else(|| {
            StealError::Config(format!(
                "scheduler_hz {} yields an empty tick",
                self.scheduler_hz
            ))
        })
    }

    /// Validate the configuration as a whole.
    pub fn validate(&self) -> StealResult<()> {
        self.tick_length()?;
        if self.sample_period.is_zero() {
            return Err(StealError::Config("sample_period must be nonzero".into()));
        }
        if self.stop_timeout.is_zero() {
            return Err(StealError::Config("stop_timeout must be nonzero".into()));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
