//! Sliding-window usage logs.
//!
//! Every recorded request is appended to a minute, an hour and a day log.
//! Window membership is decided at query time (`timestamp > now - window`),
//! so the logs may hold stale entries until the next sweep.

use std::collections::VecDeque;

use serde::Serialize;

use super::config::Window;

/// One successful provider request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageEntry {
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub token_count: u64,
    pub estimated_cost: f64,
}

/// Minute, hour and day logs for one identity (or for the whole system).
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowLogs {
    minute: VecDeque<UsageEntry>,
    hour: VecDeque<UsageEntry>,
    day: VecDeque<UsageEntry>,
}

impl WindowLogs {
    fn log(&self, window: Window) -> &VecDeque<UsageEntry> {
        match window {
            Window::Minute => &self.minute,
            Window::Hour => &self.hour,
            Window::Day => &self.day,
        }
    }

    fn log_mut(&mut self, window: Window) -> &mut VecDeque<UsageEntry> {
        match window {
            Window::Minute => &mut self.minute,
            Window::Hour => &mut self.hour,
            Window::Day => &mut self.day,
        }
    }

    /// Append `entry` to every window's log.
    pub(crate) fn push(&mut self, entry: UsageEntry) {
        for window in Window::ALL {
            self.log_mut(window).push_back(entry);
        }
    }

    /// Entries of `window`'s log that are inside the window at `now`.
    pub(crate) fn in_window(
        &self,
        window: Window,
        now: u64,
    ) -> impl Iterator<Item = &UsageEntry> + '_ {
        self.log(window)
            .iter()
            .filter(move |e| is_live(e.timestamp, window, now))
    }

    /// Count of live entries and the oldest live timestamp.
    pub(crate) fn window_stats(&self, window: Window, now: u64) -> (u32, Option<u64>) {
        self.in_window(window, now).fold((0u32, None), |(count, oldest), e| {
            let oldest = Some(oldest.map_or(e.timestamp, |o: u64| o.min(e.timestamp)));
            (count.saturating_add(1), oldest)
        })
    }

    /// Total estimated cost of live entries in `window`.
    pub(crate) fn cost_in_window(&self, window: Window, now: u64) -> f64 {
        self.in_window(window, now).map(|e| e.estimated_cost).sum()
    }

    /// Drop entries that have left their window. Returns how many.
    pub(crate) fn purge(&mut self, now: u64) -> usize {
        let mut removed = 0;
        for window in Window::ALL {
            let log = self.log_mut(window);
            let before = log.len();
            log.retain(|e| is_live(e.timestamp, window, now));
            removed += before - log.len();
        }
        removed
    }

    pub(crate) fn is_empty(&self) -> bool {
        Window::ALL.iter().all(|w| self.log(*w).is_empty())
    }
}

/// Aggregated usage, for one identity or the whole system.
///
/// Totals cover the trailing day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageMetrics {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub requests_last_minute: u64,
    pub requests_last_hour: u64,
    /// Identities with any live usage. Only set for global metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_identities: Option<usize>,
    /// Current system load in `[0, 1]`. Only set for global metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_load: Option<f64>,
}

impl UsageMetrics {
    pub(crate) fn from_logs(logs: &WindowLogs, now: u64) -> Self {
        let (total_requests, total_tokens, total_cost) = logs
            .in_window(Window::Day, now)
            .fold((0u64, 0u64, 0.0f64), |(r, t, c), e| {
                (r + 1, t + e.token_count, c + e.estimated_cost)
            });
        Self {
            total_requests,
            total_tokens,
            total_cost,
            requests_last_minute: logs.in_window(Window::Minute, now).count() as u64,
            requests_last_hour: logs.in_window(Window::Hour, now).count() as u64,
            tracked_identities: None,
            system_load: None,
        }
    }
}

/// Whether an entry at `timestamp` is inside `window` at `now`. Before one
/// full window has elapsed since the epoch, everything is inside.
fn is_live(timestamp: u64, window: Window, now: u64) -> bool {
    match now.checked_sub(window.duration_ms()) {
        Some(cutoff) => timestamp > cutoff,
        None => true,
    }
}
