//! Fixed-window request admission keyed by client fingerprint.
//!
//! Each [`RateLimiter`] tracks one window per client key. A window is anchored
//! at the first request seen for that key and counts every request until it
//! expires; bursts straddling a window boundary are not smoothed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;

use crate::config::{LimitPolicy, RateLimitConfig};

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

impl Window {
    fn starting(now: Instant) -> Self {
        Self {
            start: now,
            count: 1,
        }
    }

    fn is_expired(&self, now: Instant, length: Duration) -> bool {
        now.saturating_duration_since(self.start) > length
    }

    fn hit(&mut self, now: Instant, length: Duration, max_requests: u32) -> bool {
        if self.is_expired(now, length) {
            *self = Window::starting(now);
            return true;
        }
        self.count = self.count.saturating_add(1);
        self.count <= max_requests
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    policy: LimitPolicy,
    max_keys: usize,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: LimitPolicy, max_keys: usize) -> Self {
        Self {
            name,
            policy,
            max_keys,
            windows: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> LimitPolicy {
        self.policy
    }

    fn window_length(&self) -> Duration {
        Duration::from_millis(self.policy.window_ms)
    }

    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now` and reports whether it fits the budget.
    ///
    /// The check and the increment happen under the shard lock for `key`, so
    /// concurrent callers never lose a count.
    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        let length = self.window_length();
        let max_requests = self.policy.max_requests;

        if let Some(mut window) = self.windows.get_mut(key) {
            return window.hit(now, length, max_requests);
        }

        if self.windows.len() >= self.max_keys {
            self.sweep_at(now);
            if self.windows.len() >= self.max_keys {
                tracing::warn!(limiter = self.name, "rate limiter key table full");
                return false;
            }
        }

        match self.windows.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => entry.get_mut().hit(now, length, max_requests),
            Entry::Vacant(entry) => {
                entry.insert(Window::starting(now));
                true
            }
        }
    }

    /// Drops every window that has expired at `now`. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let length = self.window_length();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now, length));
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    Login,
    Checkout,
    General,
}

impl LimiterKind {
    /// Picks the limiter guarding a request, if any.
    pub fn classify(method: &Method, path: &str) -> Option<Self> {
        if path == "/api/auth/login" {
            Some(LimiterKind::Login)
        } else if path == "/api/orders" && *method == Method::POST {
            Some(LimiterKind::Checkout)
        } else if path.starts_with("/api/") {
            Some(LimiterKind::General)
        } else {
            None
        }
    }
}

/// The three route-class limiters shared by every request handler.
#[derive(Debug)]
pub struct RateLimiters {
    login: RateLimiter,
    checkout: RateLimiter,
    general: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            login: RateLimiter::new("login", config.login, config.max_keys),
            checkout: RateLimiter::new("checkout", config.checkout, config.max_keys),
            general: RateLimiter::new("general", config.general, config.max_keys),
        }
    }

    pub fn get(&self, kind: LimiterKind) -> &RateLimiter {
        match kind {
            LimiterKind::Login => &self.login,
            LimiterKind::Checkout => &self.checkout,
            LimiterKind::General => &self.general,
        }
    }

    pub fn admit(&self, kind: LimiterKind, key: &str) -> bool {
        self.get(kind).admit(key)
    }

    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        self.login.sweep_at(now) + self.checkout.sweep_at(now) + self.general.sweep_at(now)
    }
}

/// Periodically evicts expired windows so idle clients do not accumulate.
pub fn spawn_sweeper(limiters: Arc<RateLimiters>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = limiters.sweep();
            if removed > 0 {
                tracing::debug!(removed, "swept expired rate-limit windows");
            }
        }
    })
}
