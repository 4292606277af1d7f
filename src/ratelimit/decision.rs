//! Admission decisions.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::config::Window;
use crate::{GovernorError, Result};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Global spend in the trailing hour would exceed the hourly ceiling.
    HourlyCostLimit,
    /// Global spend in the trailing day would exceed the daily ceiling.
    DailyCostLimit,
    /// The identity used up its quota for `window`.
    WindowLimit { window: Window },
    /// The identity hit its load-reduced quota for `window`.
    Throttled { window: Window },
}

impl RejectReason {
    /// Short machine-readable code, used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::HourlyCostLimit => "hourly_cost",
            RejectReason::DailyCostLimit => "daily_cost",
            RejectReason::WindowLimit { .. } => "window",
            RejectReason::Throttled { .. } => "throttled",
        }
    }

    /// Whether this is a global cost rejection rather than a per-identity
    /// quota. The two have different remedies: waiting versus upgrading.
    pub fn is_emergency_brake(&self) -> bool {
        matches!(
            self,
            RejectReason::HourlyCostLimit | RejectReason::DailyCostLimit
        )
    }

    /// Message suitable for end users. `reset_at_display` is the caller's
    /// rendering of the time the quota frees up.
    pub fn user_message(&self, reset_at_display: &str) -> String {
        match self {
            RejectReason::HourlyCostLimit | RejectReason::DailyCostLimit => {
                "Service temporarily saturated, please try again later.".to_owned()
            }
            RejectReason::Throttled { .. } => {
                format!("The service is under heavy load; you can try again at {reset_at_display}.")
            }
            RejectReason::WindowLimit { .. } => {
                format!("You've hit your usage limit until {reset_at_display}.")
            }
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::HourlyCostLimit => f.write_str("hourly cost limit exceeded"),
            RejectReason::DailyCostLimit => f.write_str("daily cost limit exceeded"),
            RejectReason::WindowLimit { window } => write!(f, "per-{window} request limit exceeded"),
            RejectReason::Throttled { window } => {
                write!(f, "per-{window} request limit exceeded under high load")
            }
        }
    }
}

/// Outcome of [`RateLimiter::check_rate_limit`](super::RateLimiter::check_rate_limit).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left under the tightest rule. `u32::MAX` when the class has
    /// no rules; 0 when rejected.
    pub remaining_requests: u32,
    /// Unix epoch milliseconds at which the tightest (or blocking) window
    /// next frees a slot.
    pub reset_at: u64,
    /// Time until `reset_at`. Only set on rejection.
    pub retry_after: Option<Duration>,
    pub reason: Option<RejectReason>,
}

impl RateLimitDecision {
    pub(crate) fn allow(remaining_requests: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining_requests,
            reset_at,
            retry_after: None,
            reason: None,
        }
    }

    pub(crate) fn reject(reason: RejectReason, reset_at: u64, now: u64) -> Self {
        Self {
            allowed: false,
            remaining_requests: 0,
            reset_at,
            retry_after: Some(Duration::from_millis(reset_at.saturating_sub(now))),
            reason: Some(reason),
        }
    }

    /// Convert a rejection into [`GovernorError::RateLimited`].
    pub fn into_result(self) -> Result<Self> {
        match self.reason {
            Some(reason) if !self.allowed => Err(GovernorError::RateLimited {
                reason,
                retry_after: self.retry_after,
                reset_at: self.reset_at,
            }),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_converts_to_error() {
        let decision = RateLimitDecision::reject(
            RejectReason::WindowLimit {
                window: Window::Minute,
            },
            70_000,
            10_000,
        );
        assert_eq!(decision.retry_after, Some(Duration::from_secs(60)));
        let err = decision.into_result().unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert!(err.to_string().contains("per-minute request limit exceeded"));
    }

    #[test]
    fn allowed_passes_through() {
        let decision = RateLimitDecision::allow(3, 1_000);
        assert!(decision.clone().into_result().is_ok());
        assert_eq!(decision.retry_after, None);
    }

    #[test]
    fn brake_and_quota_messages_differ() {
        assert!(RejectReason::HourlyCostLimit.is_emergency_brake());
        let brake = RejectReason::DailyCostLimit.user_message("12:00");
        let quota = RejectReason::WindowLimit { window: Window::Day }.user_message("12:00");
        assert!(brake.contains("saturated"));
        assert!(quota.contains("until 12:00"));
    }
}
