// Document Store Queue
// Debounced, write-coalescing persistence for registry records. One local
// directory per record kind, one JSON document per id. Queueing is
// fire-and-forget and must never block a start/stop call; flushing happens
// on a timer or explicitly, with an awaitable drain at shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Debounce window for the background flusher
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document id '{0}'")]
    InvalidId(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Validate a document id before it becomes a filename.
/// Same rules the profile store applies to profile names.
fn validate_doc_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 100
        && !id.contains("..")
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

enum Pending {
    Write(Value),
    Delete,
}

/// A single on-disk collection of documents with a coalescing write queue
pub struct DocCollection {
    dir: PathBuf,
    pending: Mutex<HashMap<String, Pending>>,
}

impl DocCollection {
    /// Open (creating if needed) a collection directory
    pub fn new(dir: PathBuf) -> Self {
        std::fs::create_dir_all(&dir).ok();
        Self {
            dir,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        // Recover from poisoning; each pending entry is independently valid
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn doc_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load every document in the collection. Awaited once at
    /// initialization. Unparsable documents are skipped with a warning
    /// rather than failing the whole load.
    pub async fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StoreError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut docs = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let id = match path.file_stem().and_then(|n| n.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;

            match serde_json::from_str(&content) {
                Ok(doc) => docs.push((id, doc)),
                Err(e) => {
                    log::warn!("Skipping unparsable document {}: {e}", path.display());
                }
            }
        }

        Ok(docs)
    }

    /// Queue a document write. Rapid changes to the same id coalesce into
    /// a single write; the value is snapshotted now so later mutations of
    /// the source record don't leak into an already-queued change.
    pub fn queue_change<T: Serialize>(&self, id: &str, doc: &T) {
        if let Err(e) = validate_doc_id(id) {
            log::warn!("Refusing to queue change: {e}");
            return;
        }

        let value = match serde_json::to_value(doc) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize document {id}: {e}");
                return;
            }
        };

        self.pending_lock().insert(id.to_string(), Pending::Write(value));
    }

    /// Queue a document deletion. Cancels any pending write for the id.
    pub fn queue_deletion(&self, id: &str) {
        if let Err(e) = validate_doc_id(id) {
            log::warn!("Refusing to queue deletion: {e}");
            return;
        }

        self.pending_lock().insert(id.to_string(), Pending::Delete);
    }

    pub fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }

    /// Write out everything queued. Returns the number of documents
    /// touched. Writes go through a temp file and rename so a crash
    /// mid-flush never leaves a truncated document behind.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut *self.pending_lock());
        let count = pending.len();

        for (id, op) in pending {
            let path = self.doc_path(&id);

            match op {
                Pending::Write(value) => {
                    let content = serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| "{}".to_string());
                    let tmp = self.dir.join(format!("{id}.json.tmp"));

                    std::fs::write(&tmp, content).map_err(|source| StoreError::Write {
                        path: tmp.clone(),
                        source,
                    })?;

                    std::fs::rename(&tmp, &path).map_err(|source| StoreError::Write {
                        path: path.clone(),
                        source,
                    })?;
                }
                Pending::Delete => {
                    // Deleting a never-flushed document is fine
                    if path.exists() {
                        std::fs::remove_file(&path).map_err(|source| StoreError::Write {
                            path: path.clone(),
                            source,
                        })?;
                    }
                }
            }
        }

        Ok(count)
    }

    /// Awaitable flush-until-empty, used only at shutdown
    pub async fn drain(&self) -> Result<(), StoreError> {
        while self.pending_count() > 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Spawn the periodic debounce flusher
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if store.pending_count() == 0 {
                    continue;
                }

                if let Err(e) = store.flush() {
                    log::warn!("Document store flush failed for {}: {e}", store.dir.display());
                }
            }
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Display for DocCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir.display())
    }
}
