//! Context configuration from defaults, builders and `STRATUM_*` environment variables.

use std::env;
use std::time::Duration;

use crate::debug_trace::DebugVerbosity;
use crate::error::ConfigError;

/// Default size of the transient ring: 4 MiB.
pub const DEFAULT_RING_CAPACITY: u64 = 4 * 1024 * 1024;

pub const ENV_RING_CAPACITY: &str = "STRATUM_RING_CAPACITY";
pub const ENV_DEBUG_LEVEL: &str = "STRATUM_DEBUG_LEVEL";
pub const ENV_SCRIBBLE: &str = "STRATUM_SCRIBBLE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Bytes in the transient ring. Rounded up to the device's transient alignment.
    pub ring_capacity: u64,
    pub verbosity: DebugVerbosity,
    /// Overwrite reclaimed ring bytes with [`SCRIBBLE_BYTE`](crate::ring::SCRIBBLE_BYTE).
    pub scribble_on_reclaim: bool,
    /// Bound for the blocking waits issued by `WAIT_ON_SUBMIT` commits and
    /// [`DebugVerbosity::WaitForComplete`]. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Prefix for command buffer and ring labels.
    pub label: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            verbosity: if cfg!(debug_assertions) {
                DebugVerbosity::Validate
            } else {
                DebugVerbosity::Off
            },
            scribble_on_reclaim: false,
            wait_timeout: Some(Duration::from_secs(5)),
            label: "stratum".to_owned(),
        }
    }
}

impl ContextConfig {
    pub fn with_ring_capacity(mut self, ring_capacity: u64) -> Self {
        self.ring_capacity = ring_capacity;
        self
    }

    pub fn with_verbosity(mut self, verbosity: DebugVerbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_scribble_on_reclaim(mut self, scribble_on_reclaim: bool) -> Self {
        self.scribble_on_reclaim = scribble_on_reclaim;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Defaults overridden by `STRATUM_RING_CAPACITY`, `STRATUM_DEBUG_LEVEL`
    /// and `STRATUM_SCRIBBLE` where set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| env::var(key).ok())
    }

    fn merge_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_RING_CAPACITY) {
            self.ring_capacity = parse_byte_size(&value).ok_or(ConfigError::InvalidEnvVar {
                key: ENV_RING_CAPACITY,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_DEBUG_LEVEL) {
            self.verbosity = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SCRIBBLE) {
            self.scribble_on_reclaim = parse_bool(&value).ok_or(ConfigError::InvalidEnvVar {
                key: ENV_SCRIBBLE,
                value,
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::Validation("ring_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Plain byte counts or `K`/`M`/`G` (binary) suffixed sizes.
fn parse_byte_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last()? {
        (index, 'k' | 'K') => (&value[..index], 1024),
        (index, 'm' | 'M') => (&value[..index], 1024 * 1024),
        (index, 'g' | 'G') => (&value[..index], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
