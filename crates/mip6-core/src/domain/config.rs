//! Configuration for the mobility core.
//!
//! Table capacities are fixed when the tables are constructed; nothing here is
//! re-read at runtime. Every section has defaults, so an empty TOML document
//! is a valid configuration.
//!
//! ```toml
//! [cache]
//! capacity = 128
//!
//! [ledger]
//! reject_cooldown_ms = 60000
//!
//! [rate_limit]
//! max_fast_sends = 5
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MobilityConfig {
    pub cache: CacheConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
}

/// Binding cache sizing and refresh-request policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub capacity: usize,
    pub buckets: usize,
    /// How long before expiry a refresh request is solicited.
    pub refresh_lead_ms: u64,
    /// A binding counts as in use if looked up within this window.
    pub refresh_window_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            buckets: 32,
            refresh_lead_ms: 3_000,
            refresh_window_ms: 10_000,
        }
    }
}

/// Binding update list sizing and retransmission policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub capacity: usize,
    pub buckets: usize,
    /// Initial retransmission delay.
    pub initial_retry_ms: u64,
    /// Retransmission delay ceiling.
    pub max_retry_ms: u64,
    /// How long sends to a rejecting peer stay suppressed.
    pub reject_cooldown_ms: u64,
    /// Refresh is armed at this share (percent) of the granted lifetime.
    pub refresh_percent: u8,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            buckets: 16,
            initial_retry_ms: 1_000,
            max_retry_ms: 32_000,
            reject_cooldown_ms: 60_000,
            refresh_percent: 80,
        }
    }
}

/// Option scheduler sizing and default coalescing delays.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub capacity: usize,
    pub buckets: usize,
    /// Max delay for binding updates to correspondents.
    pub update_max_delay_ms: u64,
    /// Max delay for acknowledgements.
    pub ack_max_delay_ms: u64,
    /// Max delay for binding requests.
    pub request_max_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            buckets: 32,
            update_max_delay_ms: 500,
            ack_max_delay_ms: 0,
            request_max_delay_ms: 1_000,
        }
    }
}

/// Update send-rate policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Consecutive sends allowed at the fast interval.
    pub max_fast_sends: u32,
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_fast_sends: 5,
            fast_interval_ms: 1_000,
            slow_interval_ms: 10_000,
        }
    }
}

impl MobilityConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: MobilityConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity", "must be greater than zero"));
        }
        if self.ledger.capacity == 0 {
            return Err(invalid("ledger.capacity", "must be greater than zero"));
        }
        if self.scheduler.capacity == 0 {
            return Err(invalid("scheduler.capacity", "must be greater than zero"));
        }
        if self.ledger.initial_retry_ms == 0 {
            return Err(invalid("ledger.initial_retry_ms", "must be greater than zero"));
        }
        if self.ledger.max_retry_ms < self.ledger.initial_retry_ms {
            return Err(invalid(
                "ledger.max_retry_ms",
                format!(
                    "must be at least initial_retry_ms ({})",
                    self.ledger.initial_retry_ms
                ),
            ));
        }
        if self.ledger.refresh_percent == 0 || self.ledger.refresh_percent > 100 {
            return Err(invalid("ledger.refresh_percent", "must be within 1..=100"));
        }
        if self.rate_limit.slow_interval_ms < self.rate_limit.fast_interval_ms {
            return Err(invalid(
                "rate_limit.slow_interval_ms",
                "must not be shorter than fast_interval_ms",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
