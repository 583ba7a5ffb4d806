#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_mut,
    missing_docs,
    missing_debug_implementations
)]

//! Local sliding windows rate limiting algorithm implementation.
//!
//! A [`RateLimiter`] is meant to live for the whole process and be shared
//! between requests, usually behind an [`std::sync::Arc`].

/// Plug the rate-limiter on `axum` routers.
#[cfg(feature = "axum")]
pub mod axum;

use dashmap::DashMap;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Sliding window limiter keyed by an arbitrary string (usually an address).
#[derive(Debug)]
pub struct RateLimiter {
    /// Number of hits allowed inside one window.
    limit: usize,
    /// Window duration.
    window: Duration,
    /// Hits per key, oldest first.
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Example
    /// ```rust
    /// use tasklane_limits::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(10, Duration::from_secs(1)); // 10 requests per second.
    /// assert!(limiter.check("127.0.0.1"));
    /// ```
    pub fn new(limit: usize, window: Duration) -> Self {
        RateLimiter {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    /// Records a hit for `key` and tells whether it fits inside the window.
    /// Rejected hits are not recorded.
    pub fn check(&self, key: impl AsRef<str>) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.entry(key.as_ref().to_owned()).or_default();

        while hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.limit {
            false
        } else {
            hits.push_back(now);
            true
        }
    }

    /// Drops keys whose every hit fell out of the window.
    /// Returns how many keys were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|hit| now.duration_since(*hit) < self.window)
        });
        before.saturating_sub(self.hits.len())
    }

    /// Forget every recorded hit.
    pub fn reset(&self) {
        self.hits.clear();
    }
}
