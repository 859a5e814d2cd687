//! Failure classification: map transport failures and HTTP statuses onto the error taxonomy.

use crate::{Error, ErrorContext};
use reqwest::header::HeaderMap;
use std::time::Duration;

const MAX_MESSAGE_CHARS: usize = 512;

/// Statuses worth reissuing: request timeout, rate limiting and the 5xx range
/// (which includes bad gateway, unavailable and gateway timeout).
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Classify a completed response. Returns `None` for 2xx.
pub fn classify_status(status: u16, headers: &HeaderMap, body: &[u8]) -> Option<Error> {
    if (200..300).contains(&status) {
        return None;
    }
    let message = summarize_body(body);
    let context = ErrorContext::new()
        .with_status_code(status)
        .with_source("classifier");
    let err = match status {
        408 => Error::Timeout {
            message: format!("server reported request timeout: {}", message),
            context,
        },
        429 => Error::RateLimited {
            status,
            message,
            retry_after_ms: retry_after_ms(headers),
            context,
        },
        500..=599 => Error::HttpServer {
            status,
            message,
            context,
        },
        _ => Error::HttpClient {
            status,
            message,
            context,
        },
    };
    Some(err)
}

/// Classify a failure where no response was received.
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        return timeout_error(timeout);
    }
    let kind = if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "body"
    } else {
        "request"
    };
    Error::Network {
        message: err.to_string(),
        context: ErrorContext::new()
            .with_details(format!("phase: {}", kind))
            .with_source("transport"),
    }
}

pub fn timeout_error(timeout: Duration) -> Error {
    Error::timeout(format!("no response within {}ms", timeout.as_millis()))
        .with_context(ErrorContext::new().with_source("transport"))
}

/// Best-effort parsing of `Retry-After`.
///
/// Only the common `Retry-After: <seconds>` form is supported.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    let secs: u64 = raw.parse().ok()?;
    Some(secs.saturating_mul(1000))
}

fn summarize_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let mut s: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        s.push('…');
        s
    } else {
        text.to_string()
    }
}
