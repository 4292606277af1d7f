//! Telemetry metric name constants.
//!
//! Centralised metric names for vedrfolnir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `vedrfolnir_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `tier`: cache tier that served or stored an entry: "memory" or "durable"
//! - `operation`: durable-tier operation: "get", "set", "delete", "keys"
//! - `outcome`: rate-limit decision: "allowed" or "rejected"
//! - `reason`: rejection reason code (e.g. "hourly_cost", "window")
//! - `class`: identity class (e.g. "guest", "premium")

/// Total cache hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "vedrfolnir_cache_hits_total";

/// Total cache misses (neither tier had a live entry).
pub const CACHE_MISSES_TOTAL: &str = "vedrfolnir_cache_misses_total";

/// Total responses written to the cache.
pub const CACHE_SAVES_TOTAL: &str = "vedrfolnir_cache_saves_total";

/// Total entries evicted from the memory tier for capacity.
pub const CACHE_EVICTIONS_TOTAL: &str = "vedrfolnir_cache_evictions_total";

/// Total entries removed because they expired.
///
/// Labels: `tier`.
pub const CACHE_EXPIRED_TOTAL: &str = "vedrfolnir_cache_expired_total";

/// Total durable-tier failures swallowed by the cache.
///
/// Labels: `operation`.
pub const CACHE_STORAGE_ERRORS_TOTAL: &str = "vedrfolnir_cache_storage_errors_total";

/// Total rate-limit decisions.
///
/// Labels: `outcome`, `reason`, `class`.
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "vedrfolnir_rate_limit_decisions_total";

/// Total requests recorded against usage logs.
///
/// Labels: `class`.
pub const USAGE_REQUESTS_TOTAL: &str = "vedrfolnir_usage_requests_total";

/// Total tokens recorded against usage logs.
///
/// Labels: `class`.
pub const USAGE_TOKENS_TOTAL: &str = "vedrfolnir_usage_tokens_total";
