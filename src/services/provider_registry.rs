// Provider Registry
// Owns the native service provider handles (stream destinations) and
// their durable records. Structurally a thin sibling of the encoder
// registry; providers have no capability queries of their own.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::MediaEngine;
use crate::models::{merge_settings, ProviderContent, ProviderRecord, Settings};
use crate::services::{DocCollection, FLUSH_INTERVAL};

#[derive(Default)]
struct ProviderStore {
    records: HashMap<String, ProviderRecord>,
}

pub struct ProviderRegistry {
    engine: Arc<dyn MediaEngine>,
    store: Arc<DocCollection>,
    state: Mutex<ProviderStore>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl ProviderRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, data_dir: &Path) -> Self {
        Self {
            engine,
            store: Arc::new(DocCollection::new(data_dir.join("providers"))),
            state: Mutex::new(ProviderStore::default()),
            flusher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProviderStore> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load durable records and recreate their native handles. Idempotent.
    pub async fn initialize(&self) -> Result<(), String> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let docs: Vec<(String, ProviderContent)> =
            self.store.load_all().await.map_err(|e| e.to_string())?;

        for (id, content) in docs {
            if !self
                .engine
                .create_provider(&content.kind, &id, Some(&content.settings))
            {
                log::warn!("Failed to recreate provider {id} with type {}", content.kind);
                continue;
            }

            self.state()
                .records
                .insert(id, content.into_record(true));
        }

        let flusher = self.store.spawn_flusher(FLUSH_INTERVAL);
        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(flusher);

        log::info!(
            "Provider registry initialized: {} providers",
            self.state().records.len()
        );

        Ok(())
    }

    pub fn check_id(&self, id: &str) -> bool {
        if !self.state().records.contains_key(id) {
            log::warn!("{id} doesn't exist!");
            return false;
        }
        true
    }

    fn queue_change(&self, id: &str) {
        let state = self.state();
        let Some(record) = state.records.get(id) else { return };

        if !record.is_persistent {
            return;
        }

        self.store.queue_change(id, &record.content());
    }

    /// Create a native provider. Returns `false` with no state mutation
    /// if the factory rejects the type.
    pub fn add_provider(
        &self,
        kind: &str,
        id: &str,
        is_persistent: bool,
        settings: Option<Settings>,
    ) -> bool {
        if !self.engine.create_provider(kind, id, settings.as_ref()) {
            log::warn!("Failed to create provider with type {kind}");
            return false;
        }

        self.state().records.insert(
            id.to_string(),
            ProviderRecord {
                kind: kind.to_string(),
                settings: settings.unwrap_or_default(),
                is_persistent,
            },
        );
        self.queue_change(id);

        true
    }

    /// Release the handle and drop the record. Idempotent.
    pub fn remove_provider(&self, id: &str) {
        if !self.check_id(id) {
            return;
        }

        self.engine.release_provider(id);

        let is_persistent = self
            .state()
            .records
            .get(id)
            .map(|r| r.is_persistent)
            .unwrap_or(false);

        if is_persistent {
            self.store.queue_deletion(id);
        }

        self.state().records.remove(id);
    }

    /// Merge a patch into the provider's settings and push the result
    /// to the native handle
    pub fn update_settings(&self, id: &str, patch: &Settings) {
        if !self.check_id(id) {
            return;
        }

        {
            let mut state = self.state();
            let Some(record) = state.records.get_mut(id) else { return };
            merge_settings(&mut record.settings, patch);
            self.engine.update_provider(id, &record.settings);
        }

        self.queue_change(id);
    }

    pub fn provider_kind(&self, id: &str) -> Option<String> {
        self.state().records.get(id).map(|r| r.kind.clone())
    }

    pub fn snapshot(&self, id: &str) -> Option<ProviderRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn provider_count(&self) -> usize {
        self.state().records.len()
    }

    pub fn flush(&self) -> Result<usize, String> {
        self.store.flush().map_err(|e| e.to_string())
    }

    pub async fn drain(&self) -> Result<(), String> {
        self.store.drain().await.map_err(|e| e.to_string())
    }

    pub(crate) fn doc_store(&self) -> &Arc<DocCollection> {
        &self.store
    }

    /// Release every live handle and stop the background flusher.
    /// Durable records are left untouched.
    pub fn destroy(&self) {
        if let Some(flusher) = self.flusher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            flusher.abort();
        }

        let ids: Vec<String> = self.state().records.keys().cloned().collect();
        for id in ids {
            self.engine.release_provider(&id);
        }
    }
}
