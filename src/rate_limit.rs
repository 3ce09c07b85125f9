//! Outbound request pacing.
//!
//! The harvester talks to exactly one host, so a single shared
//! minimum-interval limiter is enough: every request waits out the interval,
//! and the interval grows multiplicatively while the server is pushing back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const MAX_PENALTY: u32 = 6;

/// Shared, clonable limiter. Clones observe the same pacing state, so worker
/// count never changes the outbound request rate.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<State>>,
}

struct State {
    base_interval: Duration,
    /// Exponent applied to the base interval while backing off.
    penalty: u32,
    next_allowed: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                base_interval: min_interval,
                penalty: 0,
                next_allowed: None,
            })),
        }
    }

    /// Wait until the next request is allowed, then reserve the slot.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.inner.lock().await;
            let now = Instant::now();
            let start = match state.next_allowed {
                Some(t) if t > now => t,
                _ => now,
            };
            let interval = state.current_interval();
            state.next_allowed = Some(start + interval);
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Server signalled rate limiting (429/503); widen the interval.
    pub async fn report_rate_limit(&self, status: u16) {
        let mut state = self.inner.lock().await;
        if state.penalty < MAX_PENALTY {
            state.penalty += 1;
        }
        debug!(
            "Rate limited (HTTP {}), interval now {:?}",
            status,
            state.current_interval()
        );
    }

    /// Successful response; decay the penalty one step.
    pub async fn report_success(&self) {
        let mut state = self.inner.lock().await;
        state.penalty = state.penalty.saturating_sub(1);
    }
}

impl State {
    fn current_interval(&self) -> Duration {
        self.base_interval * 2u32.saturating_pow(self.penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = std::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_penalty_widens_and_decays() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        limiter.report_rate_limit(429).await;
        limiter.report_rate_limit(503).await;
        {
            let state = limiter.inner.lock().await;
            assert_eq!(state.current_interval(), Duration::from_millis(40));
        }
        limiter.report_success().await;
        {
            let state = limiter.inner.lock().await;
            assert_eq!(state.current_interval(), Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn test_penalty_capped() {
        let limiter = RateLimiter::new(Duration::from_millis(1));
        for _ in 0..20 {
            limiter.report_rate_limit(429).await;
        }
        let state = limiter.inner.lock().await;
        assert_eq!(state.penalty, MAX_PENALTY);
    }
}
