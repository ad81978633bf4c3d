//! Sliding-window rate limiting for upstream API calls.
//!
//! Each adapter owns a [`RateLimiter`] keyed by source name. The limiter
//! tracks request timestamps inside a rolling window; when the window is
//! full, [`RateLimiter::acquire`] sleeps until the oldest timestamp ages out
//! instead of failing the call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::etl::retry::RetryPolicy;

/// Rate limit and retry settings for one upstream API.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests inside a single window.
    pub requests_per_period: u32,
    /// Window length.
    pub period: Duration,
    /// Maximum retries on retryable failures (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Apply +/-50% random jitter to backoff delays.
    pub jitter: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_period: 100,
            period: Duration::from_secs(60),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RateLimitConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

/// Per-key sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take a request slot. Records the request on success.
    pub fn allowed(&self, key: &str) -> bool {
        let mut windows = self.lock();
        let window = windows.entry(key.to_string()).or_default();
        Self::prune(window, self.config.period);

        if (window.len() as u32) < self.config.requests_per_period {
            window.push_back(Instant::now());
            true
        } else {
            false
        }
    }

    /// Time until the oldest tracked request leaves the window. Zero when a
    /// slot is free right now.
    pub fn wait_time(&self, key: &str) -> Duration {
        let mut windows = self.lock();
        let Some(window) = windows.get_mut(key) else {
            return Duration::ZERO;
        };
        Self::prune(window, self.config.period);

        if (window.len() as u32) < self.config.requests_per_period {
            return Duration::ZERO;
        }
        window
            .front()
            .map(|oldest| self.config.period.saturating_sub(oldest.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Acquire a request slot, sleeping while the window is full.
    pub async fn acquire(&self, key: &str) {
        loop {
            if self.allowed(key) {
                return;
            }
            let wait = self.wait_time(key);
            if wait.is_zero() {
                continue;
            }
            debug!(
                key,
                wait_ms = wait.as_millis() as u64,
                "rate limit window full, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    fn prune(window: &mut VecDeque<Instant>, period: Duration) {
        while let Some(front) = window.front() {
            if front.elapsed() >= period {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        // A poisoned window map only means a thread panicked mid-insert; the
        // timestamps themselves are still usable.
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
