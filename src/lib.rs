//! Vedrfolnir - Request governance for pay-per-token AI providers
//!
//! This crate sits in front of a generation call and decides whether the
//! call may happen at all, and whether it needs to happen:
//!
//! - [`RateLimiter`] admits requests per identity across minute, hour and
//!   day sliding windows, behind a global cost-based emergency brake, with
//!   limits tightened when the system is under load.
//! - [`CacheManager`] memoizes responses in a bounded in-process tier in
//!   front of an optional durable tier, keyed by a normalized request
//!   fingerprint.
//! - [`Governor`] composes the two around a caller-supplied generator.
//!
//! # Example
//!
//! ```rust,no_run
//! use vedrfolnir::{AiResponse, GenerationRequest, Governor, IdentityClass, Usage};
//!
//! #[tokio::main]
//! async fn main() -> vedrfolnir::Result<()> {
//!     let governor = Governor::builder().build()?;
//!     let _tasks = governor.spawn_cleanup();
//!
//!     let request = GenerationRequest::new("claude-sonnet", "Name three rivers.")
//!         .temperature(0.3)
//!         .max_tokens(200);
//!
//!     match governor
//!         .generate("user-42", IdentityClass::Free, &request, |req| async move {
//!             Ok(AiResponse::new(format!("answer to {}", req.prompt), req.model)
//!                 .with_usage(Usage::new(12, 40)))
//!         })
//!         .await
//!     {
//!         Ok(out) => println!("{} (cached: {})", out.response.text, out.cache_hit),
//!         Err(e) if e.is_rate_limited() => println!("slow down: {e}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! [`GovernanceConfig::load`] reads a TOML file; see the [`config`] module.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod governor;
pub mod ratelimit;
pub mod sweeper;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{
    CacheConfig, CacheConfigUpdate, CachePolicy, CacheManager, CacheStats, DurableStore,
    FileStore, MemoryStore, RequestFingerprint,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GovernanceConfig, StorageBackend, StorageConfig};
pub use error::{GovernorError, Result};
pub use governor::{GovernedResponse, Governor, GovernorBuilder, GovernorTasks};
pub use ratelimit::{
    IdentityClass, RateLimitConfig, RateLimitConfigUpdate, RateLimitDecision, RateLimiter,
    RejectReason, RuleSet, UsageMetrics, Window,
};
pub use sweeper::{CleanupTask, Sweep};
pub use types::{AiResponse, GenerationRequest, Usage};
pub use version::{PKG_VERSION, version_string};
