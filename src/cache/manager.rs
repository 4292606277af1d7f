//! Two-tier response cache.
//!
//! [`CacheManager`] memoizes [`AiResponse`]s keyed by
//! [`RequestFingerprint::cache_key`]. The memory tier is a bounded map
//! guarded by a mutex; the durable tier is any [`DurableStore`] and holds
//! JSON-encoded [`CacheEntry`] records under [`DURABLE_KEY_PREFIX`].
//!
//! # Eviction
//!
//! When the memory tier grows past `max_size`, entries are ranked by
//! `(hit_count, created_at)` ascending and the lowest-ranked ones are
//! evicted. Responses reused in bursts keep their slot over responses that
//! were merely written recently.
//!
//! # Failure semantics
//!
//! Durable-tier errors never reach the caller. Reads degrade to misses,
//! writes to no-ops, corrupt records are deleted on sight. A failed write
//! also sweeps expired records from the store, which is the usual way to
//! recover from a full store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigUpdate};
use super::entry::CacheEntry;
use super::fingerprint::RequestFingerprint;
use super::store::DurableStore;
use crate::clock::{Clock, SystemClock, millis};
use crate::error::Result;
use crate::sweeper::{CleanupTask, Sweep};
use crate::telemetry;
use crate::types::AiResponse;

/// Prefix of every key the cache writes to its durable store.
pub const DURABLE_KEY_PREFIX: &str = "vedr_cache:";

/// Snapshot of cache state and counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently held in the memory tier (including expired ones
    /// not yet swept).
    pub memory_entries: usize,
    pub config: CacheConfig,
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub evictions: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.saves.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Two-tier memoization of AI responses.
///
/// Thread-safe; share it behind an `Arc`. No lock is held across an
/// `.await`.
pub struct CacheManager {
    memory: Mutex<HashMap<String, CacheEntry>>,
    durable: Option<Arc<dyn DurableStore>>,
    config: RwLock<CacheConfig>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    /// Create a memory-only cache using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            durable: None,
            config: RwLock::new(config),
            counters: Counters::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach a durable store as the second tier.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Look up a memoized response.
    ///
    /// Checks the memory tier first, then the durable tier. A durable hit is
    /// promoted into the memory tier. Every hit increments the entry's
    /// `hit_count`.
    pub async fn get(&self, fingerprint: &RequestFingerprint) -> Option<AiResponse> {
        let key = fingerprint.cache_key();
        let (memory_tier, durable_tier, max_size) = {
            let config = self.config.read();
            (config.memory_tier, config.durable_tier, config.max_size)
        };
        let now = self.clock.now_ms();

        if memory_tier {
            let mut memory = self.memory.lock();
            let lookup = memory.get_mut(&key).map(|entry| {
                if entry.is_expired(now) {
                    None
                } else {
                    entry.hit_count += 1;
                    Some(entry.response.clone())
                }
            });
            match lookup {
                Some(Some(response)) => {
                    drop(memory);
                    self.record_hit("memory");
                    return Some(response);
                }
                Some(None) => {
                    memory.remove(&key);
                    metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL, "tier" => "memory")
                        .increment(1);
                }
                None => {}
            }
        }

        if durable_tier {
            if let Some(store) = &self.durable {
                if let Some(mut entry) = self.load_durable(store.as_ref(), &key, now).await {
                    entry.hit_count += 1;
                    let response = entry.response.clone();
                    if memory_tier {
                        let mut memory = self.memory.lock();
                        memory.insert(key, entry);
                        self.enforce_capacity(&mut memory, max_size);
                    }
                    self.record_hit("durable");
                    return Some(response);
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        None
    }

    /// Memoize a response.
    ///
    /// The entry expires after `ttl` (or the configured default). The memory
    /// write enforces capacity; the durable write is best-effort.
    pub async fn set(
        &self,
        fingerprint: &RequestFingerprint,
        response: AiResponse,
        ttl: Option<Duration>,
    ) {
        let key = fingerprint.cache_key();
        let (memory_tier, durable_tier, max_size, ttl) = {
            let config = self.config.read();
            (
                config.memory_tier,
                config.durable_tier,
                config.max_size,
                ttl.unwrap_or(config.default_ttl),
            )
        };
        let now = self.clock.now_ms();
        let entry = CacheEntry::new(response, now, millis(ttl));

        if durable_tier {
            if let Some(store) = &self.durable {
                self.store_durable(store.as_ref(), &key, &entry, now).await;
            }
        }

        if memory_tier {
            let mut memory = self.memory.lock();
            memory.insert(key, entry);
            self.enforce_capacity(&mut memory, max_size);
        }

        self.counters.saves.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_SAVES_TOTAL).increment(1);
    }

    /// Remove a single entry from both tiers.
    pub async fn invalidate(&self, fingerprint: &RequestFingerprint) {
        let key = fingerprint.cache_key();
        self.memory.lock().remove(&key);
        if let Some(store) = &self.durable {
            let durable_key = durable_key(&key);
            if let Err(e) = store.delete(&durable_key).await {
                self.storage_error("delete", &durable_key, &e);
            }
        }
    }

    /// Remove expired entries from both tiers. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let memory_removed = {
            let mut memory = self.memory.lock();
            let before = memory.len();
            memory.retain(|_, entry| !entry.is_expired(now));
            before - memory.len()
        };
        if memory_removed > 0 {
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL, "tier" => "memory")
                .increment(memory_removed as u64);
        }

        let durable_removed = match &self.durable {
            Some(store) => self.sweep_durable(store.as_ref(), now).await,
            None => 0,
        };

        if memory_removed + durable_removed > 0 {
            debug!(memory_removed, durable_removed, "cache cleanup");
        }
        memory_removed + durable_removed
    }

    /// Empty both tiers and reset all counters.
    pub async fn clear(&self) {
        self.memory.lock().clear();
        if let Some(store) = &self.durable {
            match store.keys(DURABLE_KEY_PREFIX).await {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = store.delete(&key).await {
                            self.storage_error("delete", &key, &e);
                        }
                    }
                }
                Err(e) => self.storage_error("keys", DURABLE_KEY_PREFIX, &e),
            }
        }
        self.counters.reset();
        info!("cache cleared");
    }

    /// Current counters and configuration.
    pub fn get_stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            memory_entries: self.memory.lock().len(),
            config: self.config.read().clone(),
            hits,
            misses,
            saves: self.counters.saves.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Hot-swap configuration. The merged configuration is validated
    /// before it replaces the current one; on error nothing changes. A
    /// smaller `max_size` takes effect immediately.
    pub fn update_config(&self, update: CacheConfigUpdate) -> Result<()> {
        let max_size = {
            let mut config = self.config.write();
            let mut merged = config.clone();
            update.apply_to(&mut merged);
            merged.validate()?;
            *config = merged;
            info!(
                max_size = config.max_size,
                default_ttl_secs = config.default_ttl.as_secs(),
                memory_tier = config.memory_tier,
                durable_tier = config.durable_tier,
                "cache config updated"
            );
            config.max_size
        };
        let mut memory = self.memory.lock();
        self.enforce_capacity(&mut memory, max_size);
        Ok(())
    }

    /// Spawn the periodic cleanup task at the configured interval.
    pub fn spawn_cleanup(self: &Arc<Self>) -> CleanupTask {
        let interval = self.config.read().cleanup_interval;
        CleanupTask::spawn(Arc::clone(self), interval)
    }

    /// Hit count of the memory-tier entry for `fingerprint`, if present.
    pub fn hit_count(&self, fingerprint: &RequestFingerprint) -> Option<u64> {
        self.memory
            .lock()
            .get(&fingerprint.cache_key())
            .map(|e| e.hit_count)
    }

    fn record_hit(&self, tier: &'static str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
    }

    /// Evict the lowest-ranked entries until `memory.len() <= max_size`.
    /// Returns the evicted keys, lowest rank first.
    fn enforce_capacity(
        &self,
        memory: &mut HashMap<String, CacheEntry>,
        max_size: usize,
    ) -> Vec<String> {
        let evicted = select_evictions(memory, max_size);
        for key in &evicted {
            memory.remove(key);
        }
        if !evicted.is_empty() {
            self.counters
                .evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(evicted.len() as u64);
            debug!(count = evicted.len(), max_size, "evicted cache entries");
        }
        evicted
    }

    async fn load_durable(
        &self,
        store: &dyn DurableStore,
        key: &str,
        now: u64,
    ) -> Option<CacheEntry> {
        let durable_key = durable_key(key);
        let raw = match store.get(&durable_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.storage_error("get", &durable_key, &e);
                return None;
            }
        };
        let entry = match CacheEntry::decode(&durable_key, &raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "deleting corrupt cache record");
                self.delete_quietly(store, &durable_key).await;
                return None;
            }
        };
        if entry.is_expired(now) {
            self.delete_quietly(store, &durable_key).await;
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL, "tier" => "durable").increment(1);
            return None;
        }
        Some(entry)
    }

    async fn store_durable(
        &self,
        store: &dyn DurableStore,
        key: &str,
        entry: &CacheEntry,
        now: u64,
    ) {
        let durable_key = durable_key(key);
        let raw = match entry.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %durable_key, error = %e, "failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = store.set(&durable_key, raw).await {
            self.storage_error("set", &durable_key, &e);
            let removed = self.sweep_durable(store, now).await;
            debug!(removed, "swept durable tier after failed write");
        }
    }

    /// Delete expired and corrupt records from the durable tier.
    async fn sweep_durable(&self, store: &dyn DurableStore, now: u64) -> usize {
        let keys = match store.keys(DURABLE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                self.storage_error("keys", DURABLE_KEY_PREFIX, &e);
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys {
            let dead = match store.get(&key).await {
                Ok(Some(raw)) => match CacheEntry::decode(&key, &raw) {
                    Ok(entry) => entry.is_expired(now),
                    Err(e) => {
                        debug!(error = %e, "sweeping corrupt cache record");
                        true
                    }
                },
                Ok(None) => false,
                Err(e) => {
                    self.storage_error("get", &key, &e);
                    false
                }
            };
            if dead && self.delete_quietly(store, &key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            metrics::counter!(telemetry::CACHE_EXPIRED_TOTAL, "tier" => "durable")
                .increment(removed as u64);
        }
        removed
    }

    async fn delete_quietly(&self, store: &dyn DurableStore, key: &str) -> bool {
        match store.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                self.storage_error("delete", key, &e);
                false
            }
        }
    }

    fn storage_error(&self, operation: &'static str, key: &str, error: &crate::GovernorError) {
        let store = self.durable.as_ref().map_or("none", |s| s.name());
        warn!(store, operation, key, error = %error, "durable cache tier error");
        metrics::counter!(telemetry::CACHE_STORAGE_ERRORS_TOTAL, "operation" => operation)
            .increment(1);
    }
}

#[async_trait]
impl Sweep for CacheManager {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn sweep(&self) -> usize {
        self.cleanup().await
    }
}

fn durable_key(key: &str) -> String {
    format!("{DURABLE_KEY_PREFIX}{key}")
}

/// Rank entries by `(hit_count, created_at)` ascending and return the keys of
/// the `len - max_size` lowest-ranked. Ties fall back to key order so the
/// choice is deterministic.
fn select_evictions(memory: &HashMap<String, CacheEntry>, max_size: usize) -> Vec<String> {
    if memory.len() <= max_size {
        return Vec::new();
    }
    let mut ranked: Vec<(&String, &CacheEntry)> = memory.iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| {
        a.hit_count
            .cmp(&b.hit_count)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| ka.cmp(kb))
    });
    let excess = memory.len() - max_size;
    ranked
        .into_iter()
        .take(excess)
        .map(|(k, _)| k.clone())
        .collect()
}
