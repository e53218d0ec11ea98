//! Fixed-window request counter keyed by client identifier.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Reject {
        limit: u32,
        retry_after: Duration,
    },
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Counts one request for `client`. Rejected requests still count, so a
    /// client hammering the route stays rejected until its window elapses.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock();
        let entry = windows.entry(client.to_owned()).or_insert(RateWindow {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count = entry.count.saturating_add(1);

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(entry.window_start));

        if entry.count > self.max_requests {
            RateDecision::Reject {
                limit: self.max_requests,
                retry_after: reset_after,
            }
        } else {
            RateDecision::Allow {
                limit: self.max_requests,
                remaining: self.max_requests - entry.count,
                reset_after,
            }
        }
    }

    /// Forgets clients whose window has fully elapsed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
        before - windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Rounds up to whole seconds for `Retry-After` style headers.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(900);

    fn is_allowed(decision: RateDecision) -> bool {
        matches!(decision, RateDecision::Allow { .. })
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(WINDOW, 3);
        let now = Instant::now();
        for expected_remaining in [2, 1, 0] {
            match limiter.check_at("1.2.3.4", now) {
                RateDecision::Allow { remaining, .. } => assert_eq!(remaining, expected_remaining),
                other => panic!("unexpected decision: {other:?}"),
            }
        }
        assert!(!is_allowed(limiter.check_at("1.2.3.4", now)));
    }

    #[test]
    fn new_window_resets_counter() {
        let limiter = RateLimiter::new(WINDOW, 1);
        let now = Instant::now();
        assert!(is_allowed(limiter.check_at("c", now)));
        assert!(!is_allowed(limiter.check_at("c", now + Duration::from_secs(1))));
        assert!(is_allowed(limiter.check_at("c", now + WINDOW)));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(WINDOW, 1);
        let now = Instant::now();
        assert!(is_allowed(limiter.check_at("a", now)));
        assert!(is_allowed(limiter.check_at("b", now)));
        assert!(!is_allowed(limiter.check_at("a", now)));
    }

    #[test]
    fn retry_after_counts_down_to_window_end() {
        let limiter = RateLimiter::new(WINDOW, 1);
        let now = Instant::now();
        limiter.check_at("c", now);
        match limiter.check_at("c", now + Duration::from_secs(100)) {
            RateDecision::Reject { retry_after, limit } => {
                assert_eq!(limit, 1);
                assert_eq!(retry_after, Duration::from_secs(800));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn sweep_drops_elapsed_windows() {
        let limiter = RateLimiter::new(WINDOW, 5);
        let now = Instant::now();
        limiter.check_at("old", now);
        limiter.check_at("recent", now + Duration::from_secs(600));
        assert_eq!(limiter.sweep(now + WINDOW), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
