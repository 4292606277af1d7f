//! Rate limiting.
//!
//! [`RateLimiter`] admits or rejects requests per identity across minute,
//! hour and day sliding windows, behind a global cost-based emergency brake,
//! with limits tightened under load. See the [`limiter`] module docs for the
//! decision order.

mod config;
mod decision;
pub mod limiter;
mod usage;

pub use config::{
    AdaptiveThrottleConfig, EmergencyBrakeConfig, IdentityClass, RateLimitConfig,
    RateLimitConfigUpdate, RateLimitRule, RuleSet, RuleSets, ThrottleMultipliers, Window,
};
pub use decision::{RateLimitDecision, RejectReason};
pub use limiter::RateLimiter;
pub use usage::{UsageEntry, UsageMetrics};
