//! Retry policy: exponential backoff with bounded jitter.

use crate::config::invalid;
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const MAX_RETRIES_LIMIT: u32 = 10;
const JITTER_FRACTION: f64 = 0.1;

/// Configuration for retry logic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_delay_ms: u64,
    pub retry_multiplier: f64,
    pub max_retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_multiplier: 2.0,
            max_retry_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_delay(mut self, base: Duration) -> Self {
        self.retry_delay_ms = base.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.retry_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(
                "maxRetries",
                format!("at most {} retries are allowed", MAX_RETRIES_LIMIT),
            ));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(invalid("retryMultiplier", "multiplier must be a finite value >= 1.0"));
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(invalid(
                "retryDelayMs",
                "base retry delay must not exceed maxRetryDelayMs",
            ));
        }
        Ok(())
    }
}

/// How to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

pub struct RetryPolicy {
    config: RetryConfig,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            jitter: true,
        }
    }

    /// Deterministic delays; used where exact timings matter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// `base * multiplier^retry_count`, before jitter and capping.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let ms = self.config.retry_delay_ms as f64
            * self.config.retry_multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        Duration::from_millis(clamp_ms(ms))
    }

    /// `min(max_delay, base * multiplier^retry_count + jitter)`, jitter up to 10% of the computed delay.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let computed = self.base_delay(retry_count).as_millis() as f64;
        let jitter = if self.jitter && computed > 0.0 {
            rand::thread_rng().gen_range(0.0..=computed * JITTER_FRACTION)
        } else {
            0.0
        };
        let capped = (computed + jitter).min(self.config.max_retry_delay_ms as f64);
        Duration::from_millis(clamp_ms(capped))
    }

    /// Decide what to do after an attempt failed.
    ///
    /// `retry_count` is the number of retries already performed (0 after the
    /// first failure). A server-supplied `Retry-After` lengthens the delay but
    /// never beyond `max_retry_delay_ms`.
    pub fn decide(&self, err: &Error, retry_count: u32) -> Decision {
        if !err.is_retryable() || retry_count >= self.config.max_retries {
            return Decision::Fail;
        }
        let mut delay = self.delay(retry_count);
        if let Error::RateLimited {
            retry_after_ms: Some(after),
            ..
        } = err
        {
            let floor = Duration::from_millis((*after).min(self.config.max_retry_delay_ms));
            delay = delay.max(floor);
        }
        Decision::Retry { delay }
    }
}

fn clamp_ms(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.min(u64::MAX as f64) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorContext;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_retries(max_retries)
                .with_delay(Duration::from_millis(100))
                .with_multiplier(2.0)
                .with_max_delay(Duration::from_millis(1_000)),
        )
    }

    #[test]
    fn test_exponential_without_jitter() {
        let p = policy(5).without_jitter();
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(400));
        assert_eq!(p.delay(3), Duration::from_millis(800));
        assert_eq!(p.delay(4), Duration::from_millis(1_000));
        assert_eq!(p.delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let p = policy(5);
        for _ in 0..200 {
            let d = p.delay(1).as_millis();
            assert!((200..=220).contains(&d), "delay {} out of range", d);
        }
        // Cap still applies after jitter.
        for _ in 0..200 {
            assert!(p.delay(3).as_millis() <= 1_000);
        }
    }

    #[test]
    fn test_decide_respects_budget_and_class() {
        let p = policy(2).without_jitter();
        let net = Error::network("reset");
        assert_eq!(
            p.decide(&net, 0),
            Decision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert!(matches!(p.decide(&net, 1), Decision::Retry { .. }));
        assert_eq!(p.decide(&net, 2), Decision::Fail);

        let fatal = Error::HttpClient {
            status: 400,
            message: "bad".into(),
            context: ErrorContext::new(),
        };
        assert_eq!(p.decide(&fatal, 0), Decision::Fail);
    }

    #[test]
    fn test_retry_after_lengthens_delay() {
        let p = policy(3).without_jitter();
        let err = Error::RateLimited {
            status: 429,
            message: String::new(),
            retry_after_ms: Some(700),
            context: ErrorContext::new(),
        };
        assert_eq!(
            p.decide(&err, 0),
            Decision::Retry {
                delay: Duration::from_millis(700)
            }
        );
        let huge = Error::RateLimited {
            status: 429,
            message: String::new(),
            retry_after_ms: Some(60_000),
            context: ErrorContext::new(),
        };
        assert_eq!(
            p.decide(&huge, 0),
            Decision::Retry {
                delay: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::new().with_max_retries(11).validate().is_err());
        assert!(RetryConfig::new().with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::new().with_multiplier(f64::NAN).validate().is_err());
        assert!(RetryConfig::new()
            .with_delay(Duration::from_secs(20))
            .validate()
            .is_err());
    }
}
