//! Shared fixtures for integration tests.
#![allow(dead_code)]

use mockito::{Mock, Server, ServerGuard};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use voicegate::cache::CacheConfig;
use voicegate::resilience::retry::RetryConfig;
use voicegate::{DispatchEvent, DispatcherConfig};

pub const API_KEY: &str = "test-key";

/// Install a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        init_tracing();
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Config pointing at the mock server with millisecond-scale backoff.
    pub fn config(&self) -> DispatcherConfig {
        DispatcherConfig::new(&self.base_url)
            .with_api_key(API_KEY)
            .with_timeout(Duration::from_secs(5))
            .with_retry(
                RetryConfig::new()
                    .with_max_retries(3)
                    .with_delay(Duration::from_millis(10))
                    .with_multiplier(2.0)
                    .with_max_delay(Duration::from_millis(50)),
            )
            .with_cache(CacheConfig::new().with_max_size_bytes(1024 * 1024))
    }

    /// JSON response expected exactly `hits` times.
    pub async fn mock_json(&mut self, method: &str, path: &str, status: usize, body: &str, hits: usize) -> Mock {
        self.server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }
}

/// Drain everything currently buffered on an event receiver.
pub fn drain(rx: &mut Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn names(events: &[DispatchEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}
