//! Multi-window rate limiter with an emergency brake and adaptive
//! throttling.
//!
//! # Decision order
//!
//! [`RateLimiter::check_rate_limit`] evaluates, first failure wins:
//!
//! 1. **Emergency brake**: global spend in the trailing hour, then day,
//!    plus this request's estimated cost, against the configured ceilings.
//! 2. **Sliding windows**: for each rule of the identity's class, the count
//!    of that identity's requests inside the window against the limit.
//! 3. **Adaptive throttling**: when global load exceeds the threshold, the
//!    same rules again with limits scaled down by the class multiplier.
//!
//! # Check, then record
//!
//! Checking never mutates usage; [`record_request`](RateLimiter::record_request)
//! is called after the provider call succeeds. The two are not atomic, so
//! concurrent requests for one identity can all pass the check before any
//! of them records. Overshoot is bounded by the number of such in-flight
//! requests; there is no reservation step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::config::{
    AdaptiveThrottleConfig, IdentityClass, RateLimitConfig, RateLimitConfigUpdate, RuleSet, Window,
};
use super::decision::{RateLimitDecision, RejectReason};
use super::usage::{UsageEntry, UsageMetrics, WindowLogs};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::sweeper::{CleanupTask, Sweep};
use crate::telemetry;

#[derive(Debug, Default)]
struct IdentityUsage {
    logs: WindowLogs,
}

#[derive(Debug, Default)]
struct LimiterState {
    identities: HashMap<String, IdentityUsage>,
    global: WindowLogs,
}

/// Per-identity admission control.
///
/// Thread-safe and synchronous; share it behind an `Arc`. Configuration and
/// usage live behind separate locks, always taken in that order.
pub struct RateLimiter {
    config: RwLock<RateLimitConfig>,
    state: Mutex<LimiterState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter using the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(LimiterState::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether `identity` may issue a request estimated at
    /// `estimated_tokens`. Does not record anything.
    pub fn check_rate_limit(
        &self,
        identity: &str,
        class: IdentityClass,
        estimated_tokens: u64,
    ) -> RateLimitDecision {
        let config = self.config.read();
        let state = self.state.lock();
        let now = self.clock.now_ms();

        let decision = evaluate(&config, &state, identity, class, estimated_tokens, now);
        drop(state);
        drop(config);

        match decision.reason {
            Some(reason) => {
                debug!(
                    identity,
                    class = %class,
                    reason = %reason,
                    retry_after_ms = decision.retry_after.map_or(0, |d| d.as_millis() as u64),
                    "request rejected"
                );
                metrics::counter!(telemetry::RATE_LIMIT_DECISIONS_TOTAL,
                    "outcome" => "rejected",
                    "reason" => reason.code(),
                    "class" => class.as_str()
                )
                .increment(1);
            }
            None => {
                metrics::counter!(telemetry::RATE_LIMIT_DECISIONS_TOTAL,
                    "outcome" => "allowed",
                    "reason" => "none",
                    "class" => class.as_str()
                )
                .increment(1);
            }
        }
        decision
    }

    /// Record a successful request of `tokens` tokens for `identity`.
    pub fn record_request(&self, identity: &str, tokens: u64, class: IdentityClass) {
        let cost_per_token = self.config.read().cost_per_token;
        let entry = UsageEntry {
            timestamp: self.clock.now_ms(),
            token_count: tokens,
            estimated_cost: tokens as f64 * cost_per_token,
        };
        {
            let mut state = self.state.lock();
            state
                .identities
                .entry(identity.to_owned())
                .or_default()
                .logs
                .push(entry);
            state.global.push(entry);
        }
        metrics::counter!(telemetry::USAGE_REQUESTS_TOTAL, "class" => class.as_str()).increment(1);
        metrics::counter!(telemetry::USAGE_TOKENS_TOTAL, "class" => class.as_str())
            .increment(tokens);
    }

    /// Usage totals for one identity, or system-wide when `identity` is
    /// `None`. Unknown identities report zero usage.
    pub fn get_usage_metrics(&self, identity: Option<&str>) -> UsageMetrics {
        let capacity = self.config.read().adaptive.assumed_capacity;
        let state = self.state.lock();
        let now = self.clock.now_ms();
        match identity {
            Some(id) => state
                .identities
                .get(id)
                .map(|usage| UsageMetrics::from_logs(&usage.logs, now))
                .unwrap_or_default(),
            None => {
                let mut metrics = UsageMetrics::from_logs(&state.global, now);
                metrics.tracked_identities = Some(state.identities.len());
                metrics.system_load = Some(load(&state.global, capacity, now));
                metrics
            }
        }
    }

    /// Current load in `[0, 1]`: global requests in the trailing minute over
    /// the assumed capacity.
    pub fn system_load(&self) -> f64 {
        let capacity = self.config.read().adaptive.assumed_capacity;
        let state = self.state.lock();
        load(&state.global, capacity, self.clock.now_ms())
    }

    /// Map a caller-supplied class name to an [`IdentityClass`], falling back
    /// to the configured `default_class` for unknown names.
    pub fn resolve_class(&self, name: &str) -> IdentityClass {
        let default = self.config.read().default_class;
        IdentityClass::parse_or(name, default)
    }

    /// Apply a partial configuration update. The merged configuration is
    /// validated first; on error nothing changes.
    pub fn update_config(&self, update: RateLimitConfigUpdate) -> Result<()> {
        let mut config = self.config.write();
        let mut merged = config.clone();
        update.apply_to(&mut merged);
        merged.validate()?;
        *config = merged;
        info!(
            cost_per_token = config.cost_per_token,
            max_hourly_cost = config.emergency_brake.max_hourly_cost,
            max_daily_cost = config.emergency_brake.max_daily_cost,
            adaptive = config.adaptive.enabled,
            "rate limit config updated"
        );
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config.read().clone()
    }

    /// Drop usage entries that have left their windows and forget identities
    /// with no remaining usage. Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let mut removed = state.global.purge(now);
        for usage in state.identities.values_mut() {
            removed += usage.logs.purge(now);
        }
        let before = state.identities.len();
        state.identities.retain(|_, usage| !usage.logs.is_empty());
        let dropped_identities = before - state.identities.len();
        if removed > 0 || dropped_identities > 0 {
            debug!(removed, dropped_identities, "rate limiter cleanup");
        }
        removed
    }

    /// Forget all recorded usage.
    pub fn reset(&self) {
        *self.state.lock() = LimiterState::default();
        info!("rate limiter usage reset");
    }

    /// Spawn the periodic cleanup task at the configured interval.
    pub fn spawn_cleanup(self: &Arc<Self>) -> CleanupTask {
        let interval = self.config.read().cleanup_interval;
        CleanupTask::spawn(Arc::clone(self), interval)
    }
}

#[async_trait]
impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    async fn sweep(&self) -> usize {
        self.cleanup()
    }
}

fn load(global: &WindowLogs, assumed_capacity: u32, now: u64) -> f64 {
    let (count, _) = global.window_stats(Window::Minute, now);
    (f64::from(count) / f64::from(assumed_capacity.max(1))).clamp(0.0, 1.0)
}

/// Window close time for a window whose oldest live entry is `oldest`.
fn window_reset(window: Window, oldest: Option<u64>, now: u64) -> u64 {
    oldest.unwrap_or(now).saturating_add(window.duration_ms())
}

fn evaluate(
    config: &RateLimitConfig,
    state: &LimiterState,
    identity: &str,
    class: IdentityClass,
    estimated_tokens: u64,
    now: u64,
) -> RateLimitDecision {
    // 1. Emergency brake
    let brake = &config.emergency_brake;
    if brake.enabled {
        let request_cost = estimated_tokens as f64 * config.cost_per_token;
        let ceilings = [
            (Window::Hour, brake.max_hourly_cost, RejectReason::HourlyCostLimit),
            (Window::Day, brake.max_daily_cost, RejectReason::DailyCostLimit),
        ];
        for (window, ceiling, reason) in ceilings {
            let spent = state.global.cost_in_window(window, now);
            if spent + request_cost > ceiling {
                let (_, oldest) = state.global.window_stats(window, now);
                return RateLimitDecision::reject(reason, window_reset(window, oldest, now), now);
            }
        }
    }

    let rules = config.rule_sets.for_class(class);
    let logs = state.identities.get(identity).map(|u| &u.logs);

    // 2. Sliding windows at nominal limits
    if let Err(rejection) = check_rules(rules, logs, 1.0, now, |window| {
        RejectReason::WindowLimit { window }
    }) {
        return rejection;
    }

    // 3. The same rules at load-reduced limits
    let multiplier = throttle_multiplier(&config.adaptive, &state.global, class, now);
    let reduced = check_rules(rules, logs, multiplier, now, |window| {
        RejectReason::Throttled { window }
    });
    match reduced {
        Ok(decision) | Err(decision) => decision,
    }
}

/// Multiplier for the current load: 1.0 unless adaptive throttling is
/// enabled and load exceeds the threshold.
fn throttle_multiplier(
    adaptive: &AdaptiveThrottleConfig,
    global: &WindowLogs,
    class: IdentityClass,
    now: u64,
) -> f64 {
    if !adaptive.enabled {
        return 1.0;
    }
    if load(global, adaptive.assumed_capacity, now) > adaptive.load_threshold {
        adaptive.multipliers.for_class(class)
    } else {
        1.0
    }
}

/// Limit after applying `multiplier`. Scaling never takes a positive limit
/// to zero.
fn effective_limit(max_requests: u32, multiplier: f64) -> u32 {
    if multiplier >= 1.0 || max_requests == 0 {
        return max_requests;
    }
    ((f64::from(max_requests) * multiplier).floor() as u32).max(1)
}

fn check_rules(
    rules: &RuleSet,
    logs: Option<&WindowLogs>,
    multiplier: f64,
    now: u64,
    reason: impl Fn(Window) -> RejectReason,
) -> std::result::Result<RateLimitDecision, RateLimitDecision> {
    let mut remaining = u32::MAX;
    let mut reset_at: Option<u64> = None;

    for rule in rules.rules() {
        let limit = effective_limit(rule.max_requests, multiplier);
        let (count, oldest) = logs.map_or((0, None), |l| l.window_stats(rule.window, now));
        let rule_reset = window_reset(rule.window, oldest, now);
        if count >= limit {
            return Err(RateLimitDecision::reject(reason(rule.window), rule_reset, now));
        }
        let slack = limit - count;
        if reset_at.is_none() || slack < remaining {
            remaining = slack;
            reset_at = Some(rule_reset);
        }
    }

    Ok(RateLimitDecision::allow(remaining, reset_at.unwrap_or(now)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_scales_down_but_not_to_zero() {
        assert_eq!(effective_limit(10, 1.0), 10);
        assert_eq!(effective_limit(10, 0.5), 5);
        assert_eq!(effective_limit(3, 0.7), 2);
        assert_eq!(effective_limit(1, 0.5), 1);
        assert_eq!(effective_limit(0, 0.5), 0);
    }

    #[test]
    fn empty_rule_set_is_unlimited() {
        let decision = check_rules(&RuleSet::default(), None, 1.0, 5_000, |window| {
            RejectReason::WindowLimit { window }
        })
        .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining_requests, u32::MAX);
    }

    #[test]
    fn tightest_rule_wins() {
        let mut logs = WindowLogs::default();
        for ts in [10_000, 20_000] {
            logs.push(UsageEntry {
                timestamp: ts,
                token_count: 1,
                estimated_cost: 0.0,
            });
        }
        // minute slack 1, hour slack 8, day slack 23
        let rules = RuleSet::new(3, 10, 25);
        let decision = check_rules(&rules, Some(&logs), 1.0, 30_000, |window| {
            RejectReason::WindowLimit { window }
        })
        .unwrap();
        assert_eq!(decision.remaining_requests, 1);
        assert_eq!(decision.reset_at, 70_000);
    }

    #[test]
    fn zero_limit_rejects_with_full_window_wait() {
        let rules = RuleSet {
            minute: Some(0),
            hour: None,
            day: None,
        };
        let decision = check_rules(&rules, None, 1.0, 1_000, |window| {
            RejectReason::WindowLimit { window }
        })
        .unwrap_err();
        assert_eq!(decision.reset_at, 61_000);
    }
}
