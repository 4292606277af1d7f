//! Cache configuration and the cache-worthiness policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::secs;
use crate::types::{AiResponse, GenerationRequest};
use crate::{GovernorError, Result};

/// Configuration for the [`CacheManager`](super::CacheManager).
///
/// ```rust
/// # use vedrfolnir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_size(500)
///     .ttl(Duration::from_secs(1800));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory tier. Default: 100.
    pub max_size: usize,
    /// Time-to-live applied when `set` is called without an override.
    /// Default: 1 hour.
    #[serde(rename = "default_ttl_secs", with = "secs")]
    pub default_ttl: Duration,
    /// Whether the in-process tier is used. Default: true.
    pub memory_tier: bool,
    /// Whether the durable tier is used (requires a store). Default: true.
    pub durable_tier: bool,
    /// How often the background sweep runs. Default: 10 minutes.
    #[serde(rename = "cleanup_interval_secs", with = "secs")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl: Duration::from_secs(3600),
            memory_tier: true,
            durable_tier: true,
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier capacity.
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    /// Set the default time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enable or disable the memory tier.
    pub fn memory_tier(mut self, enabled: bool) -> Self {
        self.memory_tier = enabled;
        self
    }

    /// Enable or disable the durable tier.
    pub fn durable_tier(mut self, enabled: bool) -> Self {
        self.durable_tier = enabled;
        self
    }

    /// Set the background sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Reject configurations that would make the cache useless or spin.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(GovernorError::Configuration(
                "cache default_ttl must be greater than zero".into(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(GovernorError::Configuration(
                "cache cleanup_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Partial update for a running cache. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct CacheConfigUpdate {
    pub max_size: Option<usize>,
    pub default_ttl: Option<Duration>,
    pub memory_tier: Option<bool>,
    pub durable_tier: Option<bool>,
}

impl CacheConfigUpdate {
    pub(crate) fn apply_to(&self, config: &mut CacheConfig) {
        if let Some(n) = self.max_size {
            config.max_size = n;
        }
        if let Some(ttl) = self.default_ttl {
            config.default_ttl = ttl;
        }
        if let Some(enabled) = self.memory_tier {
            config.memory_tier = enabled;
        }
        if let Some(enabled) = self.durable_tier {
            config.durable_tier = enabled;
        }
    }
}

/// Decides whether a request is worth caching at all.
///
/// High-temperature requests ask for fresh samples, so a cache hit would
/// defeat their purpose. Very short responses are usually error-shaped and
/// are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Requests above this temperature bypass the cache. Default: 0.9.
    pub max_temperature: f32,
    /// Minimum response length in characters for a response to be stored.
    /// Default: 50.
    pub min_response_len: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_temperature: 0.9,
            min_response_len: 50,
        }
    }
}

impl CachePolicy {
    /// Whether the cache should be consulted (and populated) for `request`.
    ///
    /// Requests without an explicit temperature run at the provider's
    /// default, which is not known here, so they are treated as uncacheable.
    pub fn should_consult(&self, request: &GenerationRequest) -> bool {
        request
            .temperature
            .is_some_and(|t| t <= self.max_temperature)
    }

    /// Whether `response` is substantial enough to store.
    pub fn should_store(&self, response: &AiResponse) -> bool {
        response.text.chars().count() >= self.min_response_len
    }
}
