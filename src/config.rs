//! Buffer configuration.
//!
//! Configuration can be built in code, taken from [`BufferConfig::default`],
//! or loaded from TOML:
//!
//! ```toml
//! flush_threshold = 1000
//! flush_interval_ms = 60000
//! channel_capacity = 4096
//! ```
//!
//! Every key is optional; missing keys take their default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pending-event count that triggers an immediate flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Period of the timer-driven flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Requests that may queue behind an in-flight flush.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Configuration for a buffer actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Flush as soon as this many events are pending.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Flush on this period whether or not anything is pending.
    #[serde(
        default = "default_flush_interval",
        rename = "flush_interval_ms",
        with = "duration_ms"
    )]
    pub flush_interval: Duration,

    /// Capacity of the request channel into the actor.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BufferConfig {
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(Error::Config(
                "flush_threshold must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config(
                "flush_interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
