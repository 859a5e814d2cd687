//! Per-request bookkeeping. A context lives for exactly one call.

use reqwest::Method;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Lifecycle of a single logical request.
///
/// ```text
/// Created -> CacheCheck -> CacheHit -> Done
///                       -> CacheMiss -> RateLimitWait? -> InFlight
/// InFlight -> Success -> CacheWrite? -> Done
///          -> Failure -> RetryDecision -> Retry -> InFlight
///                                      -> Fatal -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    CacheCheck,
    CacheHit,
    CacheMiss,
    RateLimitWait,
    InFlight,
    Success,
    CacheWrite,
    Failure,
    RetryDecision,
    Retry,
    Fatal,
    Done,
}

impl RequestState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, CacheCheck)
                | (Created, RateLimitWait)
                | (Created, InFlight)
                | (CacheCheck, CacheHit)
                | (CacheCheck, CacheMiss)
                | (CacheHit, Done)
                | (CacheMiss, RateLimitWait)
                | (CacheMiss, InFlight)
                | (RateLimitWait, InFlight)
                | (RateLimitWait, Fatal)
                | (InFlight, Success)
                | (InFlight, Failure)
                | (Success, CacheWrite)
                | (Success, Done)
                | (CacheWrite, Done)
                | (Failure, RetryDecision)
                | (RetryDecision, Retry)
                | (RetryDecision, Fatal)
                | (Retry, InFlight)
                | (Retry, Fatal)
                | (Fatal, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RequestState::Done
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity and progress of one dispatcher call.
#[derive(Debug)]
pub struct RequestContext {
    pub id: String,
    pub method: Method,
    pub url: String,
    pub retry_count: u32,
    pub started: Instant,
    pub cacheable: bool,
    state: RequestState,
}

impl RequestContext {
    pub fn new(method: Method, url: impl Into<String>, cacheable: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            url: url.into(),
            retry_count: 0,
            started: Instant::now(),
            cacheable,
            state: RequestState::Created,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `next`. Illegal transitions are logged and still applied.
    pub fn advance(&mut self, next: RequestState) {
        if !self.state.can_advance_to(next) {
            tracing::debug!(
                request_id = %self.id,
                from = %self.state,
                to = %next,
                "unexpected request state transition"
            );
        }
        trace!(request_id = %self.id, from = %self.state, to = %next, "request state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_path() {
        let mut ctx = RequestContext::new(Method::GET, "https://api.example.com/voices", true);
        assert_eq!(ctx.state(), RequestState::Created);
        for next in [
            RequestState::CacheCheck,
            RequestState::CacheHit,
            RequestState::Done,
        ] {
            assert!(ctx.state().can_advance_to(next));
            ctx.advance(next);
        }
        assert!(ctx.state().is_terminal());
    }

    #[test]
    fn test_retry_loops_back_to_in_flight() {
        use RequestState::*;
        assert!(Failure.can_advance_to(RetryDecision));
        assert!(RetryDecision.can_advance_to(Retry));
        assert!(Retry.can_advance_to(InFlight));
        assert!(!Retry.can_advance_to(CacheCheck));
        assert!(!Done.can_advance_to(InFlight));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = RequestContext::new(Method::GET, "u", false);
        let b = RequestContext::new(Method::GET, "u", false);
        assert_ne!(a.id, b.id);
    }
}
