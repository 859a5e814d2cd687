//! Size-bounded LRU + TTL cache engine with optional disk persistence.

use super::disk::{DiskOp, DiskReporter, DiskStore, ManifestEntry};
use super::entry::{now_ms, CacheEntry, SetOptions};
use super::stats::{AtomicStats, CacheStats};
use crate::config::invalid;
use crate::events::{DispatchEvent, EventBus};
use crate::Result;
use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// When false, lookups always miss and writes are dropped.
    pub enabled: bool,
    /// Upper bound on resident payload bytes.
    pub max_size_bytes: u64,
    /// Default time-to-live for entries stored without an explicit TTL.
    pub ttl_ms: u64,
    /// Enable the on-disk backing store.
    pub persistent: bool,
    pub directory: PathBuf,
    /// Interval of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 100 * 1024 * 1024,
            ttl_ms: 3_600_000,
            persistent: false,
            directory: PathBuf::from(".voicegate-cache"),
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_persistence(mut self, directory: impl Into<PathBuf>) -> Self {
        self.persistent = true;
        self.directory = directory.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(invalid("cache.maxSizeBytes", "cache size must be positive"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid(
                "cache.sweepIntervalMs",
                "sweep interval must be positive",
            ));
        }
        if self.persistent && self.directory.as_os_str().is_empty() {
            return Err(invalid(
                "cache.directory",
                "persistent cache requires a directory",
            ));
        }
        Ok(())
    }
}

struct CacheState {
    /// Most recently used at the front; `pop_lru` yields the eviction victim.
    entries: LruCache<String, CacheEntry>,
    resident: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.resident -= entry.size;
        Some(entry)
    }

    /// Evict least-recently-used entries until `incoming` more bytes fit.
    fn make_room(&mut self, incoming: u64, max: u64) -> Vec<(String, CacheEntry)> {
        let mut evicted = Vec::new();
        while self.resident + incoming > max {
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.resident -= entry.size;
                    evicted.push((key, entry));
                }
                None => break,
            }
        }
        evicted
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.resident += entry.size;
        self.entries.put(key, entry);
    }
}

enum Lookup {
    Absent,
    Expired(CacheEntry),
    Hit(Bytes),
    Unloaded { created: u64 },
}

struct Inner {
    config: CacheConfig,
    state: Mutex<CacheState>,
    disk: Option<DiskStore>,
    stats: Arc<AtomicStats>,
    events: EventBus,
}

/// Bounded, TTL-aware key/value store.
///
/// - Resident payload bytes never exceed `max_size_bytes`.
/// - Expired entries are never returned; they are dropped on access or by the
///   periodic sweep.
/// - Eviction removes entries in least-recently-accessed order.
/// - With persistence, payloads live in one file per key and metadata in a
///   manifest; on open, metadata is registered and payloads load on first access.
///
/// Disk failures never surface from public operations: they are logged,
/// counted in [`CacheStats::io_errors`] and degrade to a miss.
pub struct CacheEngine {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEngine {
    /// Validate `config`, warm-register persisted metadata and start the expiry sweep.
    pub async fn open(config: CacheConfig, events: EventBus) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(AtomicStats::default());

        let mut disk = None;
        let mut persisted = Vec::new();
        if config.enabled && config.persistent {
            let reporter = DiskReporter {
                stats: stats.clone(),
                events: events.clone(),
            };
            match DiskStore::open(&config.directory, reporter).await {
                Ok((store, entries)) => {
                    disk = Some(store);
                    persisted = entries;
                }
                Err(e) => {
                    AtomicStats::bump(&stats.io_errors);
                    warn!(error = %e, "cache persistence unavailable; continuing in memory");
                }
            }
        }

        let inner = Arc::new(Inner {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                resident: 0,
            }),
            disk,
            stats,
            events,
            config,
        });
        inner.register_persisted(persisted);

        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(inner.clone(), cancel.clone());

        Ok(Self {
            inner,
            cancel,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.disk.is_some()
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// Expired entries are removed and reported as a miss. Entries registered
    /// from the manifest load their payload from disk here; a failed load
    /// drops the entry and reports a miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if !self.inner.config.enabled {
            return None;
        }
        let now = now_ms();
        let lookup = {
            let mut state = self.inner.state();
            let status = state.entries.get_mut(key).map(|entry| {
                if entry.is_expired(now) {
                    return None;
                }
                entry.accessed = now;
                Some(match &entry.value {
                    Some(v) => Lookup::Hit(v.clone()),
                    None => Lookup::Unloaded {
                        created: entry.created,
                    },
                })
            });
            match status {
                None => Lookup::Absent,
                Some(Some(found)) => found,
                Some(None) => state
                    .remove(key)
                    .map(Lookup::Expired)
                    .unwrap_or(Lookup::Absent),
            }
        };

        match lookup {
            Lookup::Hit(value) => Some(self.inner.record_hit(key, value)),
            Lookup::Absent => {
                self.inner.record_miss(key);
                None
            }
            Lookup::Expired(entry) => {
                self.inner.on_expired(key, &entry);
                self.inner.record_miss(key);
                None
            }
            Lookup::Unloaded { created } => match self.inner.load(key, created).await {
                Some(value) => Some(self.inner.record_hit(key, value)),
                None => {
                    self.inner.record_miss(key);
                    None
                }
            },
        }
    }

    /// Store `value` under `key`, evicting least-recently-used entries as needed.
    ///
    /// Returns false when the cache is disabled or the value alone exceeds the
    /// size budget. A replaced entry's bytes are released before eviction runs.
    pub fn set(&self, key: &str, value: Bytes, opts: SetOptions) -> bool {
        let inner = &self.inner;
        if !inner.config.enabled {
            return false;
        }
        let size = value.len() as u64;
        if size > inner.config.max_size_bytes {
            warn!(
                key,
                bytes = size,
                max = inner.config.max_size_bytes,
                "value larger than cache budget; not cached"
            );
            return false;
        }

        let ttl = opts.ttl.unwrap_or_else(|| inner.config.ttl());
        let persistent = opts.persistent && inner.disk.is_some();
        if opts.persistent && inner.disk.is_none() {
            debug!(key, "persistence requested but disabled; caching in memory only");
        }
        let entry = CacheEntry::new(value.clone(), ttl, persistent, opts.priority);
        let meta = manifest_entry(&entry);

        let (replaced, evicted) = {
            let mut state = inner.state();
            let replaced = state.remove(key);
            let evicted = state.make_room(size, inner.config.max_size_bytes);
            state.insert(key.to_string(), entry);
            (replaced, evicted)
        };
        AtomicStats::bump(&inner.stats.sets);

        inner.on_evicted(evicted);
        if let Some(disk) = &inner.disk {
            if persistent {
                disk.submit(DiskOp::Write {
                    key: key.to_string(),
                    payload: value,
                    meta,
                });
            } else if replaced.map(|e| e.persistent).unwrap_or(false) {
                disk.submit(DiskOp::Remove {
                    key: key.to_string(),
                });
            }
        }
        debug!(key, bytes = size, ttl_ms = ttl.as_millis() as u64, persistent, "cache set");
        true
    }

    /// Existence check that leaves recency untouched. Expired entries report
    /// false and are purged.
    pub fn has(&self, key: &str) -> bool {
        if !self.inner.config.enabled {
            return false;
        }
        let now = now_ms();
        let expired = {
            let mut state = self.inner.state();
            match state.entries.peek(key).map(|e| e.is_expired(now)) {
                None => return false,
                Some(false) => return true,
                Some(true) => state.remove(key),
            }
        };
        if let Some(entry) = expired {
            self.inner.on_expired(key, &entry);
        }
        false
    }

    /// Remove `key` from memory and, if it was persisted, from disk.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.state().remove(key);
        match removed {
            Some(entry) => {
                if entry.persistent {
                    self.inner.submit(DiskOp::Remove {
                        key: key.to_string(),
                    });
                }
                debug!(key, "cache delete");
                true
            }
            None => false,
        }
    }

    /// Drop every entry; with persistence, also empty the backing directory.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut state = self.inner.state();
            let n = state.entries.len();
            state.entries.clear();
            state.resident = 0;
            n
        };
        self.inner.submit(DiskOp::Clear);
        self.inner
            .events
            .emit(DispatchEvent::CacheCleared { entries: cleared });
        info!(entries = cleared, "cache cleared");
        cleared
    }

    /// Remove every expired entry now. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.state().resident
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .state()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, resident) = {
            let state = self.inner.state();
            (state.entries.len(), state.resident)
        };
        self.inner
            .stats
            .to_stats(entries, resident, self.inner.config.max_size_bytes)
    }

    /// Wait for queued disk writes to complete.
    pub async fn flush(&self) {
        if let Some(disk) = &self.inner.disk {
            disk.flush().await;
        }
    }

    /// Stop the sweep, record access times, drain pending writes and stop the
    /// disk writer. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        if let Some(disk) = &self.inner.disk {
            let updates: Vec<(String, u64)> = self
                .inner
                .state()
                .entries
                .iter()
                .filter(|(_, e)| e.persistent)
                .map(|(k, e)| (k.clone(), e.accessed))
                .collect();
            if !updates.is_empty() {
                disk.submit(DiskOp::Touch { updates });
            }
            disk.close().await;
        }
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn submit(&self, op: DiskOp) {
        if let Some(disk) = &self.disk {
            disk.submit(op);
        }
    }

    fn record_hit(&self, key: &str, value: Bytes) -> Bytes {
        AtomicStats::bump(&self.stats.hits);
        debug!(key, bytes = value.len(), "cache hit");
        self.events.emit(DispatchEvent::CacheHit {
            key: key.to_string(),
        });
        value
    }

    fn record_miss(&self, key: &str) {
        AtomicStats::bump(&self.stats.misses);
        debug!(key, "cache miss");
        self.events.emit(DispatchEvent::CacheMiss {
            key: key.to_string(),
        });
    }

    fn on_expired(&self, key: &str, entry: &CacheEntry) {
        AtomicStats::bump(&self.stats.expirations);
        if entry.persistent {
            self.submit(DiskOp::Remove {
                key: key.to_string(),
            });
        }
        self.events.emit(DispatchEvent::CacheExpired {
            key: key.to_string(),
        });
    }

    fn on_evicted(&self, evicted: Vec<(String, CacheEntry)>) {
        AtomicStats::add(&self.stats.evictions, evicted.len() as u64);
        for (key, entry) in evicted {
            debug!(key = key.as_str(), bytes = entry.size, "cache evict");
            if entry.persistent {
                self.submit(DiskOp::Remove { key: key.clone() });
            }
            self.events.emit(DispatchEvent::CacheEvicted {
                key,
                size: entry.size,
            });
        }
    }

    /// Read a manifest-registered payload and attach it to the resident entry.
    async fn load(&self, key: &str, created: u64) -> Option<Bytes> {
        let disk = self.disk.as_ref()?;
        match disk.read(key).await {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                let evicted = {
                    let mut state = self.state();
                    let current = state.entries.peek(key).map(|e| (e.created, e.size));
                    match current {
                        // Replaced or removed while reading; the bytes still answer this call.
                        Some((c, _)) if c != created => return Some(bytes),
                        None => return Some(bytes),
                        Some((_, recorded)) if recorded == size => {
                            if let Some(entry) = state.entries.get_mut(key) {
                                entry.value = Some(bytes.clone());
                            }
                            Vec::new()
                        }
                        Some(_) => {
                            // Manifest size disagrees with the file; re-account.
                            let mut entry = match state.remove(key) {
                                Some(e) => e,
                                None => return Some(bytes),
                            };
                            if size > self.config.max_size_bytes {
                                drop(state);
                                self.submit(DiskOp::Remove {
                                    key: key.to_string(),
                                });
                                return Some(bytes);
                            }
                            entry.size = size;
                            entry.value = Some(bytes.clone());
                            let evicted = state.make_room(size, self.config.max_size_bytes);
                            state.insert(key.to_string(), entry);
                            evicted
                        }
                    }
                };
                self.on_evicted(evicted);
                debug!(key, bytes = size, "cache payload loaded from disk");
                Some(bytes)
            }
            Err(e) => {
                warn!(key, error = %e, "cached payload unreadable; treating as miss");
                AtomicStats::bump(&self.stats.io_errors);
                let removed = self.state().remove(key);
                if removed.is_some() {
                    self.submit(DiskOp::Remove {
                        key: key.to_string(),
                    });
                }
                None
            }
        }
    }

    /// Register manifest metadata without payloads, oldest access first so LRU
    /// order survives a restart. Expired or over-budget entries are dropped.
    fn register_persisted(&self, mut persisted: Vec<(String, ManifestEntry)>) {
        if persisted.is_empty() {
            return;
        }
        let now = now_ms();
        persisted.sort_by_key(|(_, m)| m.accessed);
        let mut stale = Vec::new();
        let registered = {
            let mut state = self.state();
            for (key, meta) in persisted {
                if now > meta.expires || meta.size > self.config.max_size_bytes {
                    stale.push(key);
                    continue;
                }
                let evicted = state.make_room(meta.size, self.config.max_size_bytes);
                stale.extend(evicted.into_iter().map(|(k, _)| k));
                state.insert(
                    key,
                    CacheEntry {
                        value: None,
                        size: meta.size,
                        created: meta.created,
                        accessed: meta.accessed,
                        expires: meta.expires,
                        persistent: true,
                        priority: meta.priority,
                    },
                );
            }
            state.entries.len()
        };
        for key in &stale {
            self.submit(DiskOp::Remove { key: key.clone() });
        }
        info!(
            registered,
            dropped = stale.len(),
            "cache metadata restored from manifest"
        );
    }

    fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let expired: Vec<(String, CacheEntry)> = {
            let mut state = self.state();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| state.remove(&k).map(|e| (k, e)))
                .collect()
        };
        for (key, entry) in &expired {
            self.on_expired(key, entry);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "cache expiry sweep");
        }
        expired.len()
    }
}

fn manifest_entry(entry: &CacheEntry) -> ManifestEntry {
    ManifestEntry {
        size: entry.size,
        expires: entry.expires,
        created: entry.created,
        accessed: entry.accessed,
        priority: entry.priority,
    }
}

fn spawn_sweeper(inner: Arc<Inner>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_millis(inner.config.sweep_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    inner.sweep_expired();
                }
            }
        }
    })
}
