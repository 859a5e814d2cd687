//! Endpoint-specific TTLs for write-through entries.

use crate::{Error, Result};
use regex::Regex;
use std::time::Duration;

const LISTING_TTL: Duration = Duration::from_secs(60 * 60);
const GENERATIVE_TTL: Duration = Duration::from_secs(5 * 60);

/// Ordered path rules; first match wins, otherwise the fallback applies.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    rules: Vec<(Regex, Duration)>,
    fallback: Duration,
}

impl TtlPolicy {
    /// No rules; every path gets `fallback`.
    pub fn new(fallback: Duration) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Listing endpoints are kept for an hour, generative and streaming
    /// endpoints for five minutes.
    ///
    /// Paths are matched relative to the dispatcher's base URL, so a base of
    /// `https://host/api/v1` still maps `/voices` to the listing TTL.
    pub fn with_defaults(fallback: Duration) -> Self {
        let mut policy = Self::new(fallback);
        let builtin = [
            (r"^/(v\d+/)?(voices|models|user|history)(/|$)", LISTING_TTL),
            (
                r"^/(v\d+/)?(text-to-speech|speech-to-speech|sound-generation)(/|$)",
                GENERATIVE_TTL,
            ),
            (r"/stream(/|$)", GENERATIVE_TTL),
        ];
        for (pattern, ttl) in builtin {
            // Built-in patterns are constant and known to compile.
            if let Ok(re) = Regex::new(pattern) {
                policy.rules.push((re, ttl));
            }
        }
        policy
    }

    /// Append a rule. Rules are checked in insertion order.
    pub fn with_rule(mut self, pattern: &str, ttl: Duration) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::configuration(format!("invalid TTL rule '{}': {}", pattern, e)))?;
        self.rules.push((re, ttl));
        Ok(self)
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    pub fn ttl_for(&self, path: &str) -> Duration {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(path))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.fallback)
    }
}
