//! On-disk persistence: one payload file per key plus a JSON manifest.
//!
//! All mutations go through a single writer task so that writes, removals and
//! clears land on disk in submission order. Reads bypass the writer.

use super::entry::Priority;
use super::stats::AtomicStats;
use crate::events::{DispatchEvent, EventBus};
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;
const PAYLOAD_EXT: &str = "bin";

/// Per-key metadata kept in the manifest, enough to warm-register an entry without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ManifestEntry {
    pub size: u64,
    pub expires: u64,
    pub created: u64,
    pub accessed: u64,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: HashMap<String, ManifestEntry>,
}

pub(crate) enum DiskOp {
    Write {
        key: String,
        payload: Bytes,
        meta: ManifestEntry,
    },
    Remove {
        key: String,
    },
    /// Refresh `accessed` timestamps so warm reload keeps LRU order.
    Touch {
        updates: Vec<(String, u64)>,
    },
    Clear,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Funnels I/O failures into cache stats, logs and events. Never returns an error.
#[derive(Clone)]
pub(crate) struct DiskReporter {
    pub stats: Arc<AtomicStats>,
    pub events: EventBus,
}

impl DiskReporter {
    fn failure(&self, key: Option<&str>, what: &str, err: &dyn std::fmt::Display) {
        AtomicStats::bump(&self.stats.io_errors);
        warn!(key = key.unwrap_or(""), error = %err, "cache {} failed", what);
        if let Some(key) = key {
            self.events.emit(DispatchEvent::CachePersistFailed {
                key: key.to_string(),
                message: format!("{}: {}", what, err),
            });
        }
    }
}

pub(crate) struct DiskStore {
    dir: PathBuf,
    tx: mpsc::UnboundedSender<DiskOp>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskStore {
    /// Create the directory if needed, read the manifest and start the writer.
    ///
    /// A missing manifest is an empty cache; a corrupt one is logged, counted and
    /// treated as empty.
    pub async fn open(
        dir: impl Into<PathBuf>,
        reporter: DiskReporter,
    ) -> Result<(Self, Vec<(String, ManifestEntry)>)> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::cache_io(format!("Failed to create cache directory: {}", e)).with_context(
                ErrorContext::new()
                    .with_details(dir.display().to_string())
                    .with_source("disk_store"),
            )
        })?;

        let manifest = load_manifest(&dir, &reporter).await;
        let entries = manifest
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Writer {
            dir: dir.clone(),
            manifest,
            reporter,
        };
        let handle = tokio::spawn(worker.run(rx));

        Ok((
            Self {
                dir,
                tx,
                worker: Mutex::new(Some(handle)),
            },
            entries,
        ))
    }

    pub fn submit(&self, op: DiskOp) {
        if self.tx.send(op).is_err() {
            debug!("cache disk writer stopped; dropping operation");
        }
    }

    pub async fn read(&self, key: &str) -> Result<Bytes> {
        let path = payload_path(&self.dir, key);
        tokio::fs::read(&path).await.map(Bytes::from).map_err(|e| {
            Error::cache_io(format!("Failed to read cached payload: {}", e)).with_context(
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("disk_store"),
            )
        })
    }

    /// Wait until every operation submitted so far has reached disk.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(DiskOp::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Drain pending writes and stop the writer task.
    pub async fn close(&self) {
        self.flush().await;
        let _ = self.tx.send(DiskOp::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct Writer {
    dir: PathBuf,
    manifest: Manifest,
    reporter: DiskReporter,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DiskOp>) {
        while let Some(first) = rx.recv().await {
            let mut acks = Vec::new();
            let mut dirty = false;
            let mut stop = false;
            let mut next = Some(first);

            // Drain whatever is queued, then write the manifest once for the batch.
            while let Some(op) = next {
                match op {
                    DiskOp::Flush(ack) => acks.push(ack),
                    DiskOp::Shutdown => {
                        stop = true;
                        break;
                    }
                    other => dirty |= self.apply(other).await,
                }
                next = rx.try_recv().ok();
            }

            if dirty {
                self.save_manifest().await;
            }
            for ack in acks {
                let _ = ack.send(());
            }
            if stop {
                break;
            }
        }
        debug!(dir = %self.dir.display(), "cache disk writer stopped");
    }

    async fn apply(&mut self, op: DiskOp) -> bool {
        match op {
            DiskOp::Write { key, payload, meta } => {
                let path = payload_path(&self.dir, &key);
                match write_atomic(&path, &payload).await {
                    Ok(()) => {
                        self.manifest.entries.insert(key, meta);
                        true
                    }
                    Err(e) => {
                        self.reporter.failure(Some(&key), "persist", &e);
                        self.manifest.entries.remove(&key).is_some()
                    }
                }
            }
            DiskOp::Remove { key } => {
                let existed = self.manifest.entries.remove(&key).is_some();
                match tokio::fs::remove_file(payload_path(&self.dir, &key)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => self.reporter.failure(Some(&key), "remove", &e),
                }
                existed
            }
            DiskOp::Touch { updates } => {
                let mut changed = false;
                for (key, accessed) in updates {
                    if let Some(meta) = self.manifest.entries.get_mut(&key) {
                        if meta.accessed != accessed {
                            meta.accessed = accessed;
                            changed = true;
                        }
                    }
                }
                changed
            }
            DiskOp::Clear => {
                self.manifest.entries.clear();
                if let Err(e) = empty_dir(&self.dir).await {
                    self.reporter.failure(None, "clear", &e);
                }
                true
            }
            DiskOp::Flush(_) | DiskOp::Shutdown => false,
        }
    }

    async fn save_manifest(&mut self) {
        self.manifest.version = MANIFEST_VERSION;
        let encoded = match serde_json::to_vec(&self.manifest) {
            Ok(v) => v,
            Err(e) => {
                self.reporter.failure(None, "manifest encode", &e);
                return;
            }
        };
        if let Err(e) = write_atomic(&self.dir.join(MANIFEST_FILE), &encoded).await {
            self.reporter.failure(None, "manifest write", &e);
        }
    }
}

async fn load_manifest(dir: &Path, reporter: &DiskReporter) -> Manifest {
    let path = dir.join(MANIFEST_FILE);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Manifest::default(),
        Err(e) => {
            reporter.failure(None, "manifest read", &e);
            return Manifest::default();
        }
    };
    match serde_json::from_slice::<Manifest>(&raw) {
        Ok(m) => m,
        Err(e) => {
            reporter.failure(None, "manifest parse", &e);
            Manifest::default()
        }
    }
}

/// Payload file for `key`. Keys that are not plain file-name material are hashed.
pub(crate) fn payload_path(dir: &Path, key: &str) -> PathBuf {
    let plain = !key.is_empty()
        && key.len() <= 128
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    let stem = if plain {
        key.to_string()
    } else {
        Sha256::digest(key.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    };
    dir.join(format!("{}.{}", stem, PAYLOAD_EXT))
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn empty_dir(dir: &Path) -> std::io::Result<()> {
    let mut rd = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
