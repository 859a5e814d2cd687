//! 弹性模式模块：固定窗口限流、指数退避重试与失败分类。
//!
//! # Resilience Primitives Module
//!
//! Building blocks the dispatcher composes around every outbound call.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Fixed-window admission control with FIFO waiters |
//! | [`retry`] | Exponential backoff with up to 10% jitter, capped |
//! | [`classify`] | Maps transport failures and HTTP statuses to [`Error`](crate::Error) variants |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use voicegate::resilience::rate_limiter::{RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(1)));
//! assert!(limiter.try_acquire());
//! assert!(limiter.try_acquire());
//! assert!(!limiter.try_acquire());
//! ```
//!
//! ## Retry Policy
//!
//! ```rust
//! use voicegate::resilience::retry::{RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     RetryConfig::new()
//!         .with_delay(Duration::from_millis(100))
//!         .with_multiplier(2.0),
//! )
//! .without_jitter();
//! assert_eq!(policy.delay(2), Duration::from_millis(400));
//! ```

pub mod classify;
pub mod rate_limiter;
pub mod retry;
