//! 事件通道：调度器与缓存向外部协作者广播可观测事件（只读订阅）。
//!
//! Observability events shared by the dispatcher and the cache engine.
//!
//! Collaborators (status displays, dashboards) call [`EventBus::subscribe`]
//! and receive a [`broadcast::Receiver`]. Events are copies; receiving them
//! gives no handle on dispatcher or cache state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Events emitted along the request and cache lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    RequestStart {
        request_id: String,
        method: String,
        url: String,
    },
    Response {
        request_id: String,
        status: u16,
        retry_count: u32,
        duration_ms: u64,
        from_cache: bool,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    RetryAttempted {
        request_id: String,
        retry_count: u32,
        delay_ms: u64,
        error: String,
    },
    RateLimited {
        request_id: String,
        wait_ms: u64,
    },
    Error {
        request_id: String,
        kind: String,
        status: Option<u16>,
        retry_count: u32,
        message: String,
    },
    CacheEvicted {
        key: String,
        size: u64,
    },
    CacheExpired {
        key: String,
    },
    CacheCleared {
        entries: usize,
    },
    CachePersistFailed {
        key: String,
        message: String,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::RequestStart { .. } => "request_start",
            DispatchEvent::Response { .. } => "response",
            DispatchEvent::CacheHit { .. } => "cache_hit",
            DispatchEvent::CacheMiss { .. } => "cache_miss",
            DispatchEvent::RetryAttempted { .. } => "retry_attempted",
            DispatchEvent::RateLimited { .. } => "rate_limited",
            DispatchEvent::Error { .. } => "error",
            DispatchEvent::CacheEvicted { .. } => "cache_evicted",
            DispatchEvent::CacheExpired { .. } => "cache_expired",
            DispatchEvent::CacheCleared { .. } => "cache_cleared",
            DispatchEvent::CachePersistFailed { .. } => "cache_persist_failed",
        }
    }
}

/// Publish/subscribe fan-out for [`DispatchEvent`]s.
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; dropped when nobody is subscribed.
    pub fn emit(&self, event: DispatchEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(DispatchEvent::CacheCleared { entries: 3 });
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(DispatchEvent::CacheMiss { key: "a".into() });
        bus.emit(DispatchEvent::CacheHit { key: "a".into() });
        assert_eq!(rx.recv().await.unwrap().name(), "cache_miss");
        assert_eq!(rx.recv().await.unwrap().name(), "cache_hit");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(DispatchEvent::RateLimited {
            request_id: "r1".into(),
            wait_ms: 250,
        })
        .unwrap();
        assert_eq!(json["event"], "rate_limited");
        assert_eq!(json["wait_ms"], 250);
    }
}
