//! Builder for configuring governor instances

use std::sync::Arc;

use super::Governor;
use crate::Result;
use crate::cache::{CacheConfig, CacheManager, CachePolicy, DurableStore};
use crate::clock::{Clock, SystemClock};
use crate::config::GovernanceConfig;
use crate::ratelimit::{RateLimitConfig, RateLimiter};

/// Builder for configuring governor instances.
///
/// Without a durable store the cache runs memory-only.
pub struct GovernorBuilder {
    cache_config: CacheConfig,
    rate_limit_config: RateLimitConfig,
    policy: CachePolicy,
    store: Option<Arc<dyn DurableStore>>,
    clock: Arc<dyn Clock>,
}

impl GovernorBuilder {
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            rate_limit_config: RateLimitConfig::default(),
            policy: CachePolicy::default(),
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Start from a loaded configuration, including its durable store.
    pub fn from_config(config: &GovernanceConfig) -> Result<Self> {
        let mut builder = Self::new()
            .cache(config.cache.clone())
            .rate_limit(config.rate_limit.clone())
            .policy(config.policy.clone());
        builder.store = config.storage.build()?;
        Ok(builder)
    }

    /// Set the cache configuration.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Set the rate limiter configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    /// Set the cache-worthiness policy.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `store` as the durable cache tier.
    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the time source of both components.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate configuration and build the governor.
    pub fn build(self) -> Result<Governor> {
        self.cache_config.validate()?;
        self.rate_limit_config.validate()?;

        let mut cache = CacheManager::new(self.cache_config).with_clock(Arc::clone(&self.clock));
        if let Some(store) = self.store {
            cache = cache.with_store(store);
        }
        let limiter = RateLimiter::new(self.rate_limit_config).with_clock(self.clock);

        Ok(Governor::new(
            Arc::new(cache),
            Arc::new(limiter),
            self.policy,
        ))
    }
}

impl Default for GovernorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
