//! Per-key sliding-window admission control.
//!
//! Each rate-limit key owns the timestamps of its recent admissions. A call to
//! [`RateLimiter::allow`] prunes timestamps that left the window, then admits
//! the request only if fewer than the key's ceiling remain. The check is exact
//! per request and costs O(ceiling), which is bounded.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::RateLimitConfig;

/// Thread-safe sliding-window rate limiter keyed by caller-chosen strings.
///
/// The window map is a concurrent hash map; the entry guard held during
/// [`allow`](Self::allow) makes prune, count and append one critical section
/// for that key, so two callers can never both take the last slot.
pub struct RateLimiter {
    /// Admission timestamps per key, oldest first.
    windows: DashMap<String, VecDeque<Instant>>,
    /// Explicit ceilings set through configuration or [`set_limit`](Self::set_limit).
    limits: DashMap<String, usize>,
    /// Ceiling for keys without an explicit one.
    default_limit: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter with the given default ceiling and window length.
    #[must_use]
    pub fn new(default_limit: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limits: DashMap::new(),
            default_limit,
            window,
        }
    }

    /// Create a limiter from configuration, including the per-key ceilings.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiter = Self::new(config.default_limit, config.window());
        for (key, limit) in &config.limits {
            limiter.set_limit(key.clone(), *limit);
        }
        limiter
    }

    /// Try to admit one request for `key`.
    ///
    /// Returns `true` and records the admission when the key has room in the
    /// current window, `false` (without recording anything) otherwise.
    pub fn allow(&self, key: &str) -> bool {
        let limit = self.limit(key);
        let now = Instant::now();

        let mut window = self.windows.entry(key.to_string()).or_default();
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            window.pop_front();
        }

        if window.len() >= limit {
            debug!(key, limit, "Rate limit reached");
            return false;
        }

        window.push_back(now);
        trace!(key, used = window.len(), limit, "Request admitted");
        true
    }

    /// Set (or replace) the ceiling for `key`.
    pub fn set_limit(&self, key: impl Into<String>, limit: usize) {
        self.limits.insert(key.into(), limit);
    }

    /// The ceiling in effect for `key`.
    #[must_use]
    pub fn limit(&self, key: &str) -> usize {
        self.limits.get(key).map_or(self.default_limit, |l| *l)
    }

    /// Admissions currently counted against `key` (not pruned).
    #[must_use]
    pub fn in_window(&self, key: &str) -> usize {
        let now = Instant::now();
        self.windows.get(key).map_or(0, |w| {
            w.iter()
                .filter(|t| now.duration_since(**t) < self.window)
                .count()
        })
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_admits_up_to_ceiling() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        limiter.set_limit("k", 3);

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        assert_eq!(limiter.in_window("k"), 3);
    }

    #[test]
    fn test_rejection_records_nothing() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("k"));
        for _ in 0..5 {
            assert!(!limiter.allow("k"));
        }
        assert_eq!(limiter.in_window("k"), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_default_limit_applies_to_unknown_keys() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.limit("anything"), 100);
        assert_eq!(limiter.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_config_applies_explicit_limits() {
        let mut config = RateLimitConfig::default();
        config.limits.insert("binance".into(), 2);
        let limiter = RateLimiter::from_config(&config);

        assert_eq!(limiter.limit("binance"), 2);
        assert_eq!(limiter.limit("gate"), 100);
    }

    #[test]
    fn test_set_limit_seen_by_next_allow() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        limiter.set_limit("k", 2);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        limiter.set_limit("k", 1);
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_zero_ceiling_denies_everything() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.allow("k"));
        assert_eq!(limiter.in_window("k"), 0);
    }

    #[tokio::test]
    async fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        tokio::time::sleep(Duration::from_millis(70)).await;

        assert_eq!(limiter.in_window("k"), 0);
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_concurrent_allow_never_exceeds_ceiling() {
        let limiter = Arc::new(RateLimiter::new(25, Duration::from_secs(60)));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if limiter.allow("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
        assert_eq!(limiter.in_window("shared"), 25);
    }
}
