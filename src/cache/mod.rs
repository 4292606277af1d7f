//! Response caching.
//!
//! - [`CacheManager`]: two-tier memoization of AI responses, a bounded
//!   in-process map in front of an optional [`DurableStore`].
//! - [`RequestFingerprint`]: normalized request identity and its stable
//!   cache key.
//! - [`CachePolicy`]: decides whether a request is worth caching at all.
//!   Applied by [`Governor`](crate::Governor); callers driving the cache
//!   directly should apply it themselves.

mod config;
mod entry;
mod fingerprint;
mod manager;
pub mod store;

pub use config::{CacheConfig, CacheConfigUpdate, CachePolicy};
pub use entry::CacheEntry;
pub use fingerprint::RequestFingerprint;
pub use manager::{CacheManager, CacheStats, DURABLE_KEY_PREFIX};
pub use store::{DurableStore, FileStore, MemoryStore};
