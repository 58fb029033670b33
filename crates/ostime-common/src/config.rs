//! Configuration structures for the time service.
//!
//! Supports TOML deserialization with defaults that match the reference
//! console counter and a one-second rebase period.

use crate::error::{ClockError, ClockResult};
use crate::time::{OsTime, TickRate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level time service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Logical time the clock reads right after initialization.
    ///
    /// At most `i64::MAX`, the largest integer TOML can hold.
    pub initial_time: OsTime,

    /// Hardware counter configuration.
    pub counter: CounterConfig,

    /// How readers and the rebasing writer are kept apart.
    pub sync: SyncConfig,

    /// Periodic rebase configuration.
    pub rebase: RebaseConfig,
}

/// Hardware counter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Counter frequency in Hz.
    pub rate_hz: TickRate,

    /// Counter value at startup (host counters only).
    /// Values close to `u32::MAX` make the first wrap happen early.
    pub start: u32,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            rate_hz: TickRate::default(),
            start: 0,
        }
    }
}

/// Synchronisation strategy for the base pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Spin lock around the counter sample and pair read (multi-core safe).
    #[default]
    Spinlock,
    /// Mask interrupts on the calling core (single-core only).
    InterruptMask,
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Spinlock => write!(f, "spinlock"),
            SyncStrategy::InterruptMask => write!(f, "interrupt_mask"),
        }
    }
}

/// Synchronisation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Selected strategy.
    pub strategy: SyncStrategy,
}

/// Periodic rebase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebaseConfig {
    /// Rebase periodically: from a timer thread under `spinlock`, from the
    /// interrupt signal under `interrupt_mask`.
    ///
    /// Must stay on; without rebases the clock falls back by a full counter
    /// period at the first wrap.
    pub enabled: bool,

    /// Time between rebases. Must be shorter than one counter wrap.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for RebaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
        }
    }
}

impl RebaseConfig {
    /// Check the interval against the wrap period of a counter at `rate`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::RebaseInterval`] if more than one wrap could
    /// elapse between two rebases, or [`ClockError::Config`] for a zero interval.
    pub fn validate(&self, rate: TickRate) -> ClockResult<()> {
        if self.interval.is_zero() {
            return Err(ClockError::Config("rebase interval must be non-zero".into()));
        }

        let wrap = rate.wrap_period();
        if self.interval >= wrap {
            return Err(ClockError::RebaseInterval {
                interval_ns: self.interval.as_nanos(),
                wrap_ns: wrap.as_nanos(),
            });
        }

        if self.interval > wrap / 2 {
            warn!(
                interval_ms = self.interval.as_millis(),
                wrap_ms = wrap.as_millis(),
                "Rebase interval leaves less than half a wrap period of headroom"
            );
        }
        Ok(())
    }
}

impl ClockConfig {
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

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the configuration for combinations the runtime cannot honour.
    ///
    /// # Errors
    ///
    /// Returns an error when rebasing is disabled, for an invalid rebase
    /// interval, or for an initial time TOML cannot represent.
    pub fn validate(&self) -> ClockResult<()> {
        if !self.rebase.enabled {
            return Err(ClockError::Config(format!(
                "rebasing must be enabled: the clock would fall back by a full counter period at the first wrap (every {})",
                humantime::format_duration(self.counter.rate_hz.wrap_period())
            )));
        }
        self.rebase.validate(self.counter.rate_hz)?;

        if i64::try_from(self.initial_time.ticks()).is_err() {
            return Err(ClockError::Config(format!(
                "initial_time {} exceeds the largest TOML integer {}",
                self.initial_time.ticks(),
                i64::MAX
            )));
        }
        Ok(())
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
