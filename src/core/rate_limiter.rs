//! Per-key admission control with a fixed window and a burst sub-window.
//!
//! Each `key:route` pair owns its own counters behind its own mutex; the map
//! of entries sits behind an `RwLock` that is only write-locked to create or
//! sweep entries, so unrelated tenants and routes never contend.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{RateLimitConfig, WindowLimits};
use crate::util::clock::now_ms;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests left in the main window; `0` when denied.
    pub remaining: u32,
    /// When the limiting window resets, epoch milliseconds.
    pub reset_time_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: u64,
    count: u32,
}

impl Window {
    const fn new(now_ms: u64) -> Self {
        Self {
            start_ms: now_ms,
            count: 0,
        }
    }

    fn roll(&mut self, len_ms: u64, now_ms: u64) {
        if now_ms >= self.start_ms.saturating_add(len_ms) {
            *self = Self::new(now_ms);
        }
    }

    const fn reset_at(&self, len_ms: u64) -> u64 {
        self.start_ms.saturating_add(len_ms)
    }
}

#[derive(Debug)]
struct WindowState {
    limits: WindowLimits,
    window: Window,
    burst: Window,
}

impl WindowState {
    const fn new(limits: WindowLimits, now_ms: u64) -> Self {
        Self {
            limits,
            window: Window::new(now_ms),
            burst: Window::new(now_ms),
        }
    }

    fn check(&mut self, now_ms: u64) -> RateLimitDecision {
        let limits = self.limits;
        self.window.roll(limits.window_ms, now_ms);
        self.burst.roll(limits.burst_window_ms, now_ms);

        let window_full = self.window.count >= limits.max_requests;
        let burst_full = self.burst.count >= limits.burst_max;
        if window_full || burst_full {
            let window_reset = self.window.reset_at(limits.window_ms);
            let burst_reset = self.burst.reset_at(limits.burst_window_ms);
            let reset_time_ms = match (window_full, burst_full) {
                (true, true) => window_reset.max(burst_reset),
                (true, false) => window_reset,
                _ => burst_reset,
            };
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time_ms,
            };
        }

        self.window.count += 1;
        self.burst.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: limits.max_requests - self.window.count,
            reset_time_ms: self.window.reset_at(limits.window_ms),
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.window.reset_at(self.limits.window_ms)
            && now_ms >= self.burst.reset_at(self.limits.burst_window_ms)
    }
}

/// In-memory, single-process rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<String, Arc<Mutex<WindowState>>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter with the given limits.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and count a request for `key` on `route` now.
    pub fn check_rate_limit(&self, key: &str, route: &str) -> RateLimitDecision {
        self.check_rate_limit_at(key, route, now_ms())
    }

    /// Check and count a request for `key` on `route` at `now_ms`.
    ///
    /// Denied requests are not counted.
    pub fn check_rate_limit_at(&self, key: &str, route: &str, now_ms: u64) -> RateLimitDecision {
        let entry_key = format!("{key}:{route}");
        let entry = self.entry(&entry_key, route, now_ms);
        let decision = entry.lock().check(now_ms);
        if !decision.allowed {
            debug!(key = %entry_key, reset_at_ms = decision.reset_time_ms, "rate limit exceeded");
        }
        decision
    }

    /// Counters for `entry_key`, created on first use. The returned handle
    /// pins the entry against [`RateLimiter::sweep_expired`] while held.
    fn entry(&self, entry_key: &str, route: &str, now_ms: u64) -> Arc<Mutex<WindowState>> {
        if let Some(entry) = self.entries.read().get(entry_key) {
            return Arc::clone(entry);
        }
        let limits = self.config.limits_for(route);
        Arc::clone(
            self.entries
                .write()
                .entry(entry_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(WindowState::new(limits, now_ms)))),
        )
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop entries whose windows have all expired. Returns how many were
    /// removed.
    ///
    /// Entries still referenced by an in-flight check are kept; handles are
    /// only cloned under the map lock, so none can appear during the sweep.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, state| {
            Arc::strong_count(state) > 1 || !state.lock().is_expired(now_ms)
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "swept expired rate-limit windows");
        }
        removed
    }

    /// Start the periodic sweep on the current tokio runtime. A no-op if the
    /// sweep is already running.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let interval = Duration::from_millis(self.config.sweep_interval_ms.max(1));
        let limiter: Weak<Self> = Arc::downgrade(self);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.sweep_expired(now_ms());
            }
        }));
        info!(interval_ms = self.config.sweep_interval_ms, "rate-limit sweeper started");
    }

    /// Stop the periodic sweep, if running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            info!("rate-limit sweeper stopped");
        }
    }

    /// Whether the periodic sweep is running.
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
