//! Rate limiter configuration: windows, rule-sets, identity classes,
//! the emergency brake and adaptive throttling.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::secs;
use crate::{GovernorError, Result};

/// A sliding-window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// All windows, shortest first.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    /// Window length.
    pub fn duration(self) -> Duration {
        Duration::from_millis(self.duration_ms())
    }

    /// Window length in milliseconds.
    pub fn duration_ms(self) -> u64 {
        match self {
            Window::Minute => 60_000,
            Window::Hour => 3_600_000,
            Window::Day => 86_400_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Window,
    pub max_requests: u32,
}

/// Per-window request limits for one identity class. A `None` window is
/// unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl RuleSet {
    /// A rule-set limiting every window.
    pub const fn new(minute: u32, hour: u32, day: u32) -> Self {
        Self {
            minute: Some(minute),
            hour: Some(hour),
            day: Some(day),
        }
    }

    /// Limit for one window.
    pub fn limit(&self, window: Window) -> Option<u32> {
        match window {
            Window::Minute => self.minute,
            Window::Hour => self.hour,
            Window::Day => self.day,
        }
    }

    /// The configured rules, shortest window first.
    pub fn rules(&self) -> impl Iterator<Item = RateLimitRule> + '_ {
        Window::ALL.into_iter().filter_map(|window| {
            self.limit(window).map(|max_requests| RateLimitRule {
                window,
                max_requests,
            })
        })
    }
}

/// Class of caller, selecting a rule-set and throttle multiplier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityClass {
    #[default]
    Guest,
    Free,
    Premium,
    Admin,
}

impl IdentityClass {
    pub const ALL: [IdentityClass; 4] = [
        IdentityClass::Guest,
        IdentityClass::Free,
        IdentityClass::Premium,
        IdentityClass::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IdentityClass::Guest => "guest",
            IdentityClass::Free => "free",
            IdentityClass::Premium => "premium",
            IdentityClass::Admin => "admin",
        }
    }

    /// Parse a class name, falling back to `default` for unknown names.
    pub fn parse_or(name: &str, default: IdentityClass) -> IdentityClass {
        name.parse().unwrap_or_else(|_| {
            warn!(class = name, fallback = %default, "unknown identity class");
            default
        })
    }
}

impl fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityClass {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(IdentityClass::Guest),
            "free" => Ok(IdentityClass::Free),
            "premium" => Ok(IdentityClass::Premium),
            "admin" => Ok(IdentityClass::Admin),
            other => Err(GovernorError::InvalidInput(format!(
                "unknown identity class '{other}'"
            ))),
        }
    }
}

/// Rule-sets for every identity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSets {
    pub guest: RuleSet,
    pub free: RuleSet,
    pub premium: RuleSet,
    pub admin: RuleSet,
}

impl Default for RuleSets {
    fn default() -> Self {
        Self {
            guest: RuleSet::new(2, 10, 25),
            free: RuleSet::new(10, 100, 500),
            premium: RuleSet::new(30, 500, 2_000),
            admin: RuleSet::new(100, 2_000, 10_000),
        }
    }
}

impl RuleSets {
    pub fn for_class(&self, class: IdentityClass) -> &RuleSet {
        match class {
            IdentityClass::Guest => &self.guest,
            IdentityClass::Free => &self.free,
            IdentityClass::Premium => &self.premium,
            IdentityClass::Admin => &self.admin,
        }
    }

    pub fn for_class_mut(&mut self, class: IdentityClass) -> &mut RuleSet {
        match class {
            IdentityClass::Guest => &mut self.guest,
            IdentityClass::Free => &mut self.free,
            IdentityClass::Premium => &mut self.premium,
            IdentityClass::Admin => &mut self.admin,
        }
    }
}

/// Global cost ceilings, in the unit of `cost_per_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyBrakeConfig {
    pub enabled: bool,
    /// Default: 10.0.
    pub max_hourly_cost: f64,
    /// Default: 100.0.
    pub max_daily_cost: f64,
}

impl Default for EmergencyBrakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hourly_cost: 10.0,
            max_daily_cost: 100.0,
        }
    }
}

/// Effective-limit multipliers applied under load. Lower is stricter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleMultipliers {
    pub guest: f64,
    pub free: f64,
    pub premium: f64,
    pub admin: f64,
}

impl Default for ThrottleMultipliers {
    fn default() -> Self {
        Self {
            guest: 0.5,
            free: 0.7,
            premium: 0.9,
            admin: 1.0,
        }
    }
}

impl ThrottleMultipliers {
    pub fn for_class(&self, class: IdentityClass) -> f64 {
        match class {
            IdentityClass::Guest => self.guest,
            IdentityClass::Free => self.free,
            IdentityClass::Premium => self.premium,
            IdentityClass::Admin => self.admin,
        }
    }
}

/// Load-adaptive tightening of limits.
///
/// Load is the global request count in the trailing minute divided by
/// `assumed_capacity`, clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThrottleConfig {
    pub enabled: bool,
    /// Requests per minute the system is assumed to sustain. Default: 100.
    pub assumed_capacity: u32,
    /// Load above which multipliers apply. Default: 0.8.
    pub load_threshold: f64,
    pub multipliers: ThrottleMultipliers,
}

impl Default for AdaptiveThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assumed_capacity: 100,
            load_threshold: 0.8,
            multipliers: ThrottleMultipliers::default(),
        }
    }
}

/// Configuration for the [`RateLimiter`](super::RateLimiter).
///
/// ```rust
/// # use vedrfolnir::ratelimit::{IdentityClass, RateLimitConfig, RuleSet};
/// let config = RateLimitConfig::new()
///     .rule_set(IdentityClass::Guest, RuleSet::new(5, 20, 50))
///     .cost_per_token(0.000_01);
/// assert_eq!(config.rule_sets.guest.minute, Some(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rule_sets: RuleSets,
    /// Class used when a caller-supplied class name is not recognised.
    pub default_class: IdentityClass,
    /// Estimated cost of one token. Default: 0.000002.
    pub cost_per_token: f64,
    pub emergency_brake: EmergencyBrakeConfig,
    pub adaptive: AdaptiveThrottleConfig,
    /// How often the background sweep runs. Default: 10 minutes.
    #[serde(rename = "cleanup_interval_secs", with = "secs")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rule_sets: RuleSets::default(),
            default_class: IdentityClass::Guest,
            cost_per_token: 0.000_002,
            emergency_brake: EmergencyBrakeConfig::default(),
            adaptive: AdaptiveThrottleConfig::default(),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rule-set of one class.
    pub fn rule_set(mut self, class: IdentityClass, rules: RuleSet) -> Self {
        *self.rule_sets.for_class_mut(class) = rules;
        self
    }

    /// Set the estimated cost of one token.
    pub fn cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }

    /// Set the emergency brake ceilings.
    pub fn emergency_brake(mut self, max_hourly_cost: f64, max_daily_cost: f64) -> Self {
        self.emergency_brake.max_hourly_cost = max_hourly_cost;
        self.emergency_brake.max_daily_cost = max_daily_cost;
        self
    }

    /// Enable or disable the emergency brake.
    pub fn brake_enabled(mut self, enabled: bool) -> Self {
        self.emergency_brake.enabled = enabled;
        self
    }

    /// Enable or disable adaptive throttling.
    pub fn adaptive(mut self, enabled: bool) -> Self {
        self.adaptive.enabled = enabled;
        self
    }

    /// Set the assumed system capacity in requests per minute.
    pub fn assumed_capacity(mut self, requests_per_minute: u32) -> Self {
        self.adaptive.assumed_capacity = requests_per_minute;
        self
    }

    /// Set the background sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Check ranges that would otherwise make decisions meaningless.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(GovernorError::Configuration(msg.to_owned()));

        if !self.cost_per_token.is_finite() || self.cost_per_token < 0.0 {
            return invalid("cost_per_token must be a non-negative number");
        }
        let brake = &self.emergency_brake;
        if !(brake.max_hourly_cost > 0.0 && brake.max_daily_cost > 0.0) {
            return invalid("emergency brake ceilings must be positive");
        }
        let adaptive = &self.adaptive;
        if adaptive.assumed_capacity == 0 {
            return invalid("adaptive.assumed_capacity must be greater than zero");
        }
        if !(adaptive.load_threshold > 0.0 && adaptive.load_threshold <= 1.0) {
            return invalid("adaptive.load_threshold must be in (0, 1]");
        }
        let multipliers_ok = IdentityClass::ALL.iter().all(|c| {
            let m = adaptive.multipliers.for_class(*c);
            m > 0.0 && m <= 1.0
        });
        if !multipliers_ok {
            return invalid("throttle multipliers must be in (0, 1]");
        }
        if self.cleanup_interval.is_zero() {
            return invalid("cleanup_interval must be greater than zero");
        }
        Ok(())
    }
}

/// Partial update for a running limiter. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfigUpdate {
    pub guest: Option<RuleSet>,
    pub free: Option<RuleSet>,
    pub premium: Option<RuleSet>,
    pub admin: Option<RuleSet>,
    pub default_class: Option<IdentityClass>,
    pub cost_per_token: Option<f64>,
    pub emergency_brake: Option<EmergencyBrakeConfig>,
    pub adaptive: Option<AdaptiveThrottleConfig>,
}

impl RateLimitConfigUpdate {
    /// Set the rule-set for one class.
    pub fn rule_set(mut self, class: IdentityClass, rules: RuleSet) -> Self {
        let slot = match class {
            IdentityClass::Guest => &mut self.guest,
            IdentityClass::Free => &mut self.free,
            IdentityClass::Premium => &mut self.premium,
            IdentityClass::Admin => &mut self.admin,
        };
        *slot = Some(rules);
        self
    }

    pub(crate) fn apply_to(&self, config: &mut RateLimitConfig) {
        for class in IdentityClass::ALL {
            let update = match class {
                IdentityClass::Guest => self.guest,
                IdentityClass::Free => self.free,
                IdentityClass::Premium => self.premium,
                IdentityClass::Admin => self.admin,
            };
            if let Some(rules) = update {
                *config.rule_sets.for_class_mut(class) = rules;
            }
        }
        if let Some(class) = self.default_class {
            config.default_class = class;
        }
        if let Some(cost) = self.cost_per_token {
            config.cost_per_token = cost;
        }
        if let Some(brake) = &self.emergency_brake {
            config.emergency_brake = brake.clone();
        }
        if let Some(adaptive) = &self.adaptive {
            config.adaptive = adaptive.clone();
        }
    }
}
