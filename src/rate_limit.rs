//! Rate Limiting
//!
//! Global rolling-window limiter for provider calls: one log of call
//! timestamps per window (60 s and 3600 s), pruned lazily on every check.
//!
//! ## Usage
//!
//! ```no_run
//! use llm_call_dispatcher::RateLimiter;
//!
//! let limiter = RateLimiter::new(60, 1000); // 60/minute, 1000/hour
//!
//! if limiter.can_make_call() {
//!     limiter.record_call();
//!     // invoke the provider
//! }
//! ```
//!
//! `can_make_call` followed by `record_call` is a check-then-commit pair.
//! The dispatcher's single scheduling loop is the only consumer of quota,
//! so no second caller can slip in between. Use [`RateLimiter::try_acquire`]
//! when several tasks share a limiter.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

struct Windows {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    /// Set while quota is spent, so exhaustion is warned about once.
    limited: bool,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune_log(&mut self.minute, now, MINUTE);
        prune_log(&mut self.hour, now, HOUR);
    }
}

fn prune_log(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.saturating_duration_since(oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

/// Rolling per-minute and per-hour call limiter.
pub struct RateLimiter {
    calls_per_minute: usize,
    calls_per_hour: usize,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    /// Create a limiter with the given quotas.
    pub fn new(calls_per_minute: usize, calls_per_hour: usize) -> Self {
        Self {
            calls_per_minute,
            calls_per_hour,
            windows: Mutex::new(Windows {
                minute: VecDeque::new(),
                hour: VecDeque::new(),
                limited: false,
            }),
        }
    }

    /// Returns `true` if both windows are below their quota.
    pub fn can_make_call(&self) -> bool {
        let mut windows = self.windows.lock();
        windows.prune(Instant::now());
        self.has_capacity(&mut windows)
    }

    /// Count a call against both windows.
    pub fn record_call(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.minute.push_back(now);
        windows.hour.push_back(now);
        debug!(
            minute_used = windows.minute.len(),
            hour_used = windows.hour.len(),
            "rate limit usage recorded"
        );
    }

    /// Check and record in one critical section.
    ///
    /// Returns `false` without recording anything if either quota is spent.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.prune(now);
        if !self.has_capacity(&mut windows) {
            return false;
        }
        windows.minute.push_back(now);
        windows.hour.push_back(now);
        true
    }

    /// Current usage of both windows.
    pub fn usage(&self) -> RateLimitUsage {
        let mut windows = self.windows.lock();
        windows.prune(Instant::now());
        RateLimitUsage {
            minute_used: windows.minute.len(),
            minute_remaining: self.calls_per_minute.saturating_sub(windows.minute.len()),
            hour_used: windows.hour.len(),
            hour_remaining: self.calls_per_hour.saturating_sub(windows.hour.len()),
        }
    }

    fn has_capacity(&self, windows: &mut Windows) -> bool {
        let ok = windows.minute.len() < self.calls_per_minute
            && windows.hour.len() < self.calls_per_hour;
        match (ok, windows.limited) {
            (false, false) => {
                windows.limited = true;
                warn!(
                    minute_used = windows.minute.len(),
                    minute_limit = self.calls_per_minute,
                    hour_used = windows.hour.len(),
                    hour_limit = self.calls_per_hour,
                    "rate limit reached, deferring calls"
                );
            }
            (false, true) => debug!("rate limit still exhausted"),
            (true, true) => {
                windows.limited = false;
                info!("rate limit capacity restored");
            }
            (true, false) => {}
        }
        ok
    }
}

/// Rate limit usage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    /// Calls recorded in the last 60 seconds.
    pub minute_used: usize,
    /// Calls still allowed in the current minute window.
    pub minute_remaining: usize,
    /// Calls recorded in the last hour.
    pub hour_used: usize,
    /// Calls still allowed in the current hour window.
    pub hour_remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_flag_flips_once_per_episode() {
        let limiter = RateLimiter::new(1, 1000);
        assert!(limiter.try_acquire());
        assert!(!limiter.windows.lock().limited);

        for _ in 0..3 {
            assert!(!limiter.can_make_call());
            assert!(limiter.windows.lock().limited);
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.can_make_call());
        assert!(!limiter.windows.lock().limited, "cleared once capacity returns");

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(limiter.windows.lock().limited, "a new episode sets it again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_quota_blocks_until_oldest_ages_out() {
        let limiter = RateLimiter::new(5, 1000);

        for i in 0..5 {
            assert!(limiter.can_make_call(), "call {i} should pass");
            limiter.record_call();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(!limiter.can_make_call(), "6th call within a minute must be denied");

        // Oldest entry is 5 s old; it leaves the window after 55 s more.
        tokio::time::advance(Duration::from_secs(54)).await;
        assert!(!limiter.can_make_call());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.can_make_call(), "oldest entry aged out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_quota_applies_independently() {
        let limiter = RateLimiter::new(100, 3);

        for _ in 0..3 {
            assert!(limiter.try_acquire());
            tokio::time::advance(Duration::from_secs(61)).await;
        }
        // Minute window is clear, hour window is full.
        assert!(!limiter.can_make_call());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.can_make_call());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_does_not_record_when_denied() {
        let limiter = RateLimiter::new(2, 1000);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let usage = limiter.usage();
        assert_eq!(usage.minute_used, 2);
        assert_eq!(usage.minute_remaining, 0);
    }

    #[test]
    fn test_zero_quota_blocks_all() {
        let limiter = RateLimiter::new(0, 1000);
        assert!(!limiter.can_make_call());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_reports_both_windows() {
        let limiter = RateLimiter::new(10, 20);
        limiter.record_call();
        limiter.record_call();
        tokio::time::advance(Duration::from_secs(90)).await;
        limiter.record_call();

        let usage = limiter.usage();
        assert_eq!(
            usage,
            RateLimitUsage {
                minute_used: 1,
                minute_remaining: 9,
                hour_used: 3,
                hour_remaining: 17,
            }
        );
    }

    #[test]
    fn test_check_alone_does_not_consume_quota() {
        let limiter = RateLimiter::new(1, 1);
        for _ in 0..10 {
            assert!(limiter.can_make_call());
        }
        limiter.record_call();
        assert!(!limiter.can_make_call());
    }
}
