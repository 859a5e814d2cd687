//! 响应缓存模块：按字节限额的 LRU + TTL 缓存，可选磁盘持久化。
//!
//! # Response Cache Module
//!
//! A size-bounded, TTL-aware response store used by the dispatcher for
//! write-through caching of idempotent reads.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheEngine`] | LRU + TTL store with byte budget, expiry sweep and persistence |
//! | [`CacheConfig`] | Sizing, default TTL and persistence settings |
//! | [`CacheStats`] | Hit rate, resident size, evictions and I/O error counts |
//! | [`CacheKeyGenerator`] | Deterministic request keys (method, URL, query, body) |
//! | [`SetOptions`] | Per-entry TTL, persistence flag and priority tag |
//!
//! ## Example
//!
//! ```rust,no_run
//! use voicegate::cache::{CacheConfig, CacheEngine, SetOptions};
//! use voicegate::events::EventBus;
//! use std::time::Duration;
//!
//! # async fn run() -> voicegate::Result<()> {
//! let cache = CacheEngine::open(
//!     CacheConfig::new().with_max_size_bytes(10 * 1024 * 1024),
//!     EventBus::new(),
//! )
//! .await?;
//! cache.set("voices", "[]".into(), SetOptions::new().with_ttl(Duration::from_secs(60)));
//! assert!(cache.get("voices").await.is_some());
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence layout
//!
//! With `persistent` enabled, each persisted entry is stored as
//! `<directory>/<key>.bin` and described in `<directory>/manifest.json`
//! (`size`, `expires`, `created`, `accessed`, `priority`). On open only the
//! manifest is read; payloads are loaded on first access.

mod disk;
mod engine;
mod entry;
mod key;
mod stats;

pub use engine::{CacheConfig, CacheEngine};
pub use entry::{Priority, SetOptions};
pub use key::{CacheKey, CacheKeyGenerator};
pub use stats::CacheStats;
