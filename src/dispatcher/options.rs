use crate::cache::Priority;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub use reqwest::Method;

/// Per-call options for [`Dispatcher::request`](super::Dispatcher::request).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameters. Ordered, so they feed the cache key canonically.
    pub query: BTreeMap<String, String>,
    /// JSON request body.
    pub json: Option<serde_json::Value>,
    /// Extra headers, sent after the defaults.
    pub headers: Vec<(String, String)>,
    /// `Some(false)` skips both cache lookup and write-through.
    pub cache: Option<bool>,
    /// Overrides the endpoint TTL policy for the write-through entry.
    pub ttl: Option<Duration>,
    /// Persist the write-through entry to disk. `None` follows `cache.persistent`.
    pub persist: Option<bool>,
    pub priority: Priority,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> crate::Result<Self> {
        self.json = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = Some(false);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Cache eligibility: only GETs, unless explicitly disabled.
    pub(crate) fn is_cacheable(&self, method: &Method) -> bool {
        *method == Method::GET && self.cache != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_gets_are_cacheable() {
        let opts = RequestOptions::new();
        assert!(opts.is_cacheable(&Method::GET));
        assert!(!opts.is_cacheable(&Method::POST));
        assert!(!RequestOptions::new().no_cache().is_cacheable(&Method::GET));
    }

    #[test]
    fn test_builder_collects_fields() {
        let opts = RequestOptions::new()
            .query("page_size", "10")
            .header("accept", "audio/mpeg")
            .json(&json!({"text": "hello"}))
            .unwrap()
            .with_ttl(Duration::from_secs(5))
            .persist(true)
            .with_priority(Priority::High);
        assert_eq!(opts.query.get("page_size").map(String::as_str), Some("10"));
        assert_eq!(opts.headers.len(), 1);
        assert_eq!(opts.json, Some(json!({"text": "hello"})));
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
        assert_eq!(opts.persist, Some(true));
        assert_eq!(RequestOptions::new().persist, None);
        assert_eq!(opts.priority, Priority::High);
    }
}
