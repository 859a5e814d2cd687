//! # voicegate
//!
//! 面向远程语音合成 API 的弹性请求层：连接池、限流、分级重试与 LRU+TTL 响应缓存。
//!
//! Resilient request layer for remote speech synthesis APIs.
//!
//! ## Overview
//!
//! A [`Dispatcher`] turns a logical request into a resilient network call.
//! It owns exactly one [`cache::CacheEngine`] and threads every call through
//! the same pipeline:
//!
//! ```text
//! request() -> cache lookup (cacheable GETs) -> rate-limit admission
//!           -> pooled connection -> classification -> retry with backoff
//!           -> cache write-through -> caller
//! ```
//!
//! ## Key Features
//!
//! - **Response cache**: byte-bounded LRU with TTL expiry, a periodic sweep and
//!   optional on-disk persistence with lazy payload loading
//! - **Rate limiting**: fixed-window admission; callers suspend until the window resets
//! - **Connection pooling**: bounded concurrent attempts over keep-alive connections
//! - **Classified retries**: network failures, timeouts, 429 and 5xx back off
//!   exponentially with jitter; other 4xx fail immediately
//! - **Streaming**: large bodies (audio) are streamed instead of buffered
//! - **Observability**: [`DispatchEvent`]s over a broadcast channel, plus counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voicegate::{Dispatcher, DispatcherConfig, RequestOptions, Method};
//!
//! #[tokio::main]
//! async fn main() -> voicegate::Result<()> {
//!     let config = DispatcherConfig::new("https://api.example.com/v1")
//!         .with_api_key("sk-...")
//!         .with_env_overrides();
//!     let dispatcher = Dispatcher::new(config).await?;
//!
//!     let mut events = dispatcher.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}", event.name());
//!         }
//!     });
//!
//!     let voices = dispatcher.get("/voices").await?;
//!     println!("{} bytes, cached: {}", voices.body.len(), voices.from_cache);
//!
//!     let audio = dispatcher
//!         .request_stream(
//!             Method::POST,
//!             "/text-to-speech/voice-id/stream",
//!             RequestOptions::new().json_value(serde_json::json!({"text": "Hello"})),
//!         )
//!         .await?
//!         .collect()
//!         .await?;
//!     println!("{} audio bytes", audio.len());
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dispatcher`] | Request pipeline, options, responses and TTL policy |
//! | [`cache`] | LRU + TTL cache engine with disk persistence |
//! | [`resilience`] | Rate limiter, retry policy and failure classification |
//! | [`transport`] | Pooled HTTP client with per-attempt timeouts |
//! | [`config`] | Typed configuration, file loading and validation |
//! | [`events`] | Observability events and the broadcast bus |
//! | [`metrics`] | Counter snapshots |

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod metrics;
pub mod resilience;
pub mod transport;

// Re-export main types for convenience
pub use config::DispatcherConfig;
pub use dispatcher::{
    ByteStream, Dispatcher, Method, RequestOptions, Response, StreamResponse, TtlPolicy,
};
pub use events::{DispatchEvent, EventBus};
pub use metrics::MetricsSnapshot;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
