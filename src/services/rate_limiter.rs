//! Rate limiter for authentication-sensitive endpoints
//!
//! Fixed-window request counters keyed by client identity (`ip`, or
//! `ip:email` for sign-in so credential-stuffing against one account is
//! slowed without penalizing a whole NAT'd IP). Each endpoint class has its
//! own window and threshold. Counters are mutated under a single write lock,
//! so two concurrent requests cannot both consume the last slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::{RateLimitConfig, RateWindow};

/// Endpoint classes with independently configured windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Sign-in / sign-up / refresh
    Auth,
    /// General API traffic
    Api,
    /// Payment initiation
    Payment,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When denied, how long until the window resets
    pub retry_after_ms: u64,
}

/// One window's counter state
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<(EndpointClass, String), WindowState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter from per-class window configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn window_for(&self, class: EndpointClass) -> RateWindow {
        match class {
            EndpointClass::Auth => self.config.auth,
            EndpointClass::Api => self.config.api,
            EndpointClass::Payment => self.config.payment,
        }
    }

    /// Check the counter for `key` and consume one slot if allowed.
    ///
    /// The read-check-write sequence happens under one write lock; a burst
    /// of concurrent requests cannot race past the threshold.
    pub async fn check_and_consume(&self, class: EndpointClass, key: &str) -> RateDecision {
        let window = self.window_for(class);
        let window_len = std::time::Duration::from_secs(window.window_secs);
        let now = Instant::now();

        let mut windows = self.windows.write().await;
        let state = windows
            .entry((class, key.to_string()))
            .or_insert(WindowState {
                window_start: now,
                count: 0,
            });

        // Fixed window: reset at bucket boundary
        if now.duration_since(state.window_start) >= window_len {
            state.window_start = now;
            state.count = 0;
        }

        if state.count < window.max_requests {
            state.count += 1;
            RateDecision {
                allowed: true,
                remaining: window.max_requests - state.count,
                retry_after_ms: 0,
            }
        } else {
            let elapsed = now.duration_since(state.window_start);
            let retry_after = window_len.saturating_sub(elapsed);
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_ms: retry_after.as_millis() as u64,
            }
        }
    }

    /// Drop counters whose window has fully elapsed (called periodically)
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let config = self.config.clone();
        windows.retain(|(class, _), state| {
            let window = match class {
                EndpointClass::Auth => config.auth,
                EndpointClass::Api => config.api,
                EndpointClass::Payment => config.payment,
            };
            now.duration_since(state.window_start)
                < std::time::Duration::from_secs(window.window_secs)
        });
    }
}

/// Build the sign-in limiter key from ip and email
pub fn signin_key(ip: &str, email: &str) -> String {
    format!("{}:{}", ip, email.to_lowercase())
}
