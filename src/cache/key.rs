//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic key for a request: SHA-256 over method, URL, query and body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a namespace into every key (e.g. per credential), so caches can be shared safely.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(
        &self,
        method: &str,
        url: &str,
        query: &BTreeMap<String, String>,
        body: Option<&serde_json::Value>,
    ) -> CacheKey {
        // serde_json's default map is ordered, so nested object keys serialize canonically.
        let mut parts: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        parts.insert("method", method.to_uppercase().into());
        parts.insert("url", url.into());
        parts.insert(
            "query",
            serde_json::to_value(query).unwrap_or(serde_json::Value::Null),
        );
        parts.insert("body", body.cloned().unwrap_or(serde_json::Value::Null));
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.as_str().into());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_same_request_same_key() {
        let g = CacheKeyGenerator::new();
        let a = g.generate("get", "/v1/voices", &query(&[("page", "1")]), None);
        let b = g.generate("GET", "/v1/voices", &query(&[("page", "1")]), None);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_every_component_changes_key() {
        let g = CacheKeyGenerator::new();
        let base = g.generate("GET", "/v1/voices", &query(&[("page", "1")]), None);
        assert_ne!(base, g.generate("POST", "/v1/voices", &query(&[("page", "1")]), None));
        assert_ne!(base, g.generate("GET", "/v1/models", &query(&[("page", "1")]), None));
        assert_ne!(base, g.generate("GET", "/v1/voices", &query(&[("page", "2")]), None));
        assert_ne!(
            base,
            g.generate(
                "GET",
                "/v1/voices",
                &query(&[("page", "1")]),
                Some(&json!({"text": "hi"}))
            )
        );
        let salted = CacheKeyGenerator::new().with_salt("tenant-a");
        assert_ne!(
            base,
            salted.generate("GET", "/v1/voices", &query(&[("page", "1")]), None)
        );
    }

    #[test]
    fn test_body_field_order_does_not_matter() {
        let g = CacheKeyGenerator::new();
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        let empty = BTreeMap::new();
        assert_eq!(
            g.generate("POST", "/x", &empty, Some(&a)),
            g.generate("POST", "/x", &empty, Some(&b))
        );
    }
}
