use crate::config::invalid;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests == 0 {
            return Err(invalid("rateLimit.requests", "request budget must be at least 1"));
        }
        if self.window_ms == 0 {
            return Err(invalid("rateLimit.windowMs", "window must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub requests: u32,
    pub window_ms: u64,
    pub consumed: u32,
    pub remaining: u32,
    /// Time until the current window resets, if the budget is exhausted.
    pub estimated_wait_ms: Option<u64>,
}

/// Outcome of [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Immediate,
    /// The caller was suspended until the window reset.
    Waited(Duration),
}

#[derive(Debug)]
struct Window {
    start: Instant,
    consumed: u32,
}

/// Fixed-window admission control.
///
/// - At most `requests` admissions per `window_ms`.
/// - When the budget is spent the caller sleeps until the window ends, then
///   the window restarts with the caller consuming its first unit.
/// - Waiters hold the (FIFO) lock while sleeping, so admission order within a
///   window follows arrival order.
pub struct RateLimiter {
    cfg: RateLimitConfig,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(Window {
                start: Instant::now(),
                consumed: 0,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    fn roll_locked(&self, w: &mut Window, now: Instant) {
        if now.duration_since(w.start) >= self.cfg.window() {
            w.start = now;
            w.consumed = 0;
        }
    }

    /// Acquire one unit of budget (may sleep).
    pub async fn acquire(&self) -> Admission {
        self.acquire_with(|_| {}).await
    }

    /// Like [`acquire`](Self::acquire); `on_wait` runs once, before sleeping, with the wait length.
    pub async fn acquire_with<F: FnOnce(Duration)>(&self, on_wait: F) -> Admission {
        let mut w = self.state.lock().await;
        let now = Instant::now();
        self.roll_locked(&mut w, now);
        if w.consumed < self.cfg.requests {
            w.consumed += 1;
            return Admission::Immediate;
        }

        let reset_at = w.start + self.cfg.window();
        let wait = reset_at.saturating_duration_since(now);
        on_wait(wait);
        tokio::time::sleep_until(reset_at).await;

        w.start = Instant::now();
        w.consumed = 1;
        Admission::Waited(wait)
    }

    /// Take a unit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut w) = self.state.try_lock() else {
            return false;
        };
        self.roll_locked(&mut w, Instant::now());
        if w.consumed < self.cfg.requests {
            w.consumed += 1;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut w = self.state.lock().await;
        let now = Instant::now();
        self.roll_locked(&mut w, now);
        let remaining = self.cfg.requests.saturating_sub(w.consumed);
        let estimated_wait_ms = if remaining == 0 {
            Some(
                (w.start + self.cfg.window())
                    .saturating_duration_since(now)
                    .as_millis() as u64,
            )
        } else {
            None
        };
        RateLimiterSnapshot {
            requests: self.cfg.requests,
            window_ms: self.cfg.window_ms,
            consumed: w.consumed,
            remaining,
            estimated_wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_limit_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());
        assert!(RateLimitConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(RateLimitConfig::new(1, Duration::ZERO).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_then_wait_for_reset() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_millis(1000)));
        let start = Instant::now();
        assert_eq!(limiter.acquire().await, Admission::Immediate);
        assert_eq!(limiter.acquire().await, Admission::Immediate);

        let mut waited = None;
        let third = limiter.acquire_with(|d| waited = Some(d)).await;
        assert!(matches!(third, Admission::Waited(_)));
        assert_eq!(waited, Some(Duration::from_millis(1000)));
        assert!(start.elapsed() >= Duration::from_millis(1000));

        // The reset window has one unit consumed by the waiter.
        let snap = limiter.snapshot().await;
        assert_eq!(snap.consumed, 1);
        assert_eq!(snap.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_does_not_wait() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_millis(500)));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let snap = limiter.snapshot().await;
        assert_eq!(snap.estimated_wait_ms, Some(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_admitted_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
            1,
            Duration::from_millis(100),
        )));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        limiter.acquire().await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let each task reach the lock queue before spawning the next.
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
