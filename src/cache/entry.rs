//! Cache entry metadata.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Caller-assigned importance tag. Stored and persisted; eviction stays strictly LRU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-call options for [`CacheEngine::set`](super::CacheEngine::set).
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the engine's default TTL.
    pub ttl: Option<Duration>,
    /// Also write the payload to the backing directory.
    pub persistent: bool,
    pub priority: Priority,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    /// `None` while registered from the manifest but not yet read from disk.
    pub value: Option<Bytes>,
    pub size: u64,
    pub created: u64,
    pub accessed: u64,
    pub expires: u64,
    pub persistent: bool,
    pub priority: Priority,
}

impl CacheEntry {
    pub fn new(value: Bytes, ttl: Duration, persistent: bool, priority: Priority) -> Self {
        let now = now_ms();
        Self {
            size: value.len() as u64,
            value: Some(value),
            created: now,
            accessed: now,
            expires: now.saturating_add(ttl.as_millis() as u64),
            persistent,
            priority,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires
    }
}

/// Wall-clock milliseconds since the Unix epoch; persisted timestamps use this unit.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
