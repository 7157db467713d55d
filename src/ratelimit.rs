//! Fixed-window rate limiting keyed by caller identity.
//!
//! Each key gets an independent window of `max_requests` requests. A denied
//! check does not consume capacity. Two consecutive windows can admit up to
//! twice the capacity across a window boundary; that burst is accepted
//! behavior for this limiter, not a bug.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window per key
    pub max_requests: u32,
    /// Window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window resets
    pub reset_at: Instant,
}

impl RateDecision {
    /// Time until the window resets; zero once it has passed.
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window rate limiter.
///
/// The check is synchronous and O(1); same-key checks serialize on the map
/// entry, different keys do not contend.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, WindowEntry>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check whether a request under `key` is admitted, consuming one slot
    /// when it is.
    ///
    /// A window is stale only strictly after its reset instant; a check
    /// landing exactly on `reset_at` still belongs to the old window.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                reset_at: now + self.config.window,
            });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.config.window;
        }

        if entry.count >= self.config.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: entry.reset_at,
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.config.max_requests - entry.count,
            reset_at: entry.reset_at,
        }
    }

    /// Drop entries whose window has lapsed. Memory hygiene for long-running
    /// processes; never required for correctness.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, entry| now <= entry.reset_at);
    }

    /// Get the current count for a key (for testing)
    #[cfg(test)]
    fn get_count(&self, key: &str) -> Option<u32> {
        self.windows.get(key).map(|entry| entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window,
        })
    }

    #[test]
    fn test_first_requests_up_to_capacity_are_allowed() {
        let limiter = limiter(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("client1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.check("client1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn test_denied_checks_do_not_consume_capacity() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.check("client1").allowed);
        assert!(!limiter.check("client1").allowed);
        assert!(!limiter.check("client1").allowed);
        assert_eq!(limiter.get_count("client1"), Some(1));
    }

    #[test]
    fn test_keys_get_independent_windows() {
        let limiter = limiter(2, Duration::from_secs(60));

        limiter.check("client1");
        limiter.check("client1");
        assert!(!limiter.check("client1").allowed);
        assert!(limiter.check("client2").allowed);
    }

    #[test]
    fn test_zero_capacity_denies_everything() {
        let limiter = limiter(0, Duration::from_secs(60));
        assert!(!limiter.check("client1").allowed);
        assert!(!limiter.check("client1").allowed);
    }

    #[test]
    fn test_retry_after_is_bounded_by_window() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.check("client1");

        let denied = limiter.check("client1");
        assert!(!denied.allowed);
        let retry = denied.retry_after();
        assert!(retry > Duration::ZERO);
        assert!(retry <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_window_reset_restores_capacity() {
        let limiter = limiter(2, Duration::from_millis(100));

        limiter.check("client1");
        limiter.check("client1");
        assert!(!limiter.check("client1").allowed);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let decision = limiter.check("client1");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(limiter.get_count("client1"), Some(1));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_lapsed_windows() {
        let limiter = limiter(10, Duration::from_millis(50));

        limiter.check("stale");
        tokio::time::sleep(Duration::from_millis(100)).await;
        limiter.check("live");

        limiter.sweep_expired();
        assert!(limiter.get_count("stale").is_none());
        assert_eq!(limiter.get_count("live"), Some(1));
    }
}
