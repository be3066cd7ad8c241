// Encoder Registry
// Owns the native audio/video encoder handles, their durable records and
// the capability-driven AAC bitrate lookup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{apply_form_data, form_data, FormField, MediaEngine, PropertyKind};
use crate::models::{merge_settings, EncoderContent, EncoderRecord, Settings};
use crate::services::{DocCollection, FLUSH_INTERVAL};

/// AAC implementations in priority order. The sampled bitrate map keeps the
/// first candidate whose schema accepts a given bitrate exactly.
pub const AAC_ENCODER_PRIORITY: [&str; 4] = ["ffmpeg_aac", "mf_aac", "libfdk_aac", "CoreAudio_AAC"];

/// Universally available software fallback when no candidate matches
pub const AAC_FALLBACK_ENCODER: &str = "ffmpeg_aac";

/// Media Foundation video encoders are hidden from the selectable list
const VIDEO_ENCODER_BLACKLIST: &[&str] = &["mf_h264_nvenc", "mf_h264_vce", "mf_h264_qsv"];

/// In-memory encoder state. Mutated only through named methods so every
/// change has a single, searchable call site.
#[derive(Default)]
struct EncoderStore {
    records: HashMap<String, EncoderRecord>,
}

impl EncoderStore {
    fn add_encoder(&mut self, id: &str, record: EncoderRecord) {
        self.records.insert(id.to_string(), record);
    }

    fn remove_encoder(&mut self, id: &str) {
        self.records.remove(id);
    }

    fn update_settings(&mut self, id: &str, settings: Settings) {
        if let Some(record) = self.records.get_mut(id) {
            record.settings = settings;
        }
    }

    fn get(&self, id: &str) -> Option<&EncoderRecord> {
        self.records.get(id)
    }
}

pub struct EncoderRegistry {
    engine: Arc<dyn MediaEngine>,
    store: Arc<DocCollection>,
    state: Mutex<EncoderStore>,
    /// bitrate -> offset into AAC_ENCODER_PRIORITY, sampled at initialize
    aac_bitrate_map: Mutex<BTreeMap<u32, usize>>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl EncoderRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, data_dir: &Path) -> Self {
        Self {
            engine,
            store: Arc::new(DocCollection::new(data_dir.join("encoders"))),
            state: Mutex::new(EncoderStore::default()),
            aac_bitrate_map: Mutex::new(BTreeMap::new()),
            flusher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EncoderStore> {
        // Recover from poisoning; every mutation leaves the store consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bitrate_map(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, usize>> {
        self.aac_bitrate_map.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load durable records, recreate their native handles and sample the
    /// AAC bitrate domains. Idempotent.
    pub async fn initialize(&self) -> Result<(), String> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let docs: Vec<(String, EncoderContent)> =
            self.store.load_all().await.map_err(|e| e.to_string())?;

        for (id, content) in docs {
            let created = if content.is_audio {
                self.engine
                    .create_audio_encoder(&content.kind, &id, Some(&content.settings), 0)
            } else {
                self.engine
                    .create_video_encoder(&content.kind, &id, Some(&content.settings))
            };

            if !created {
                // The document stays on disk; the type may exist again on
                // the next run (driver updates, hardware changes).
                log::warn!("Failed to recreate encoder {id} with type {}", content.kind);
                continue;
            }

            self.state().add_encoder(&id, content.into_record(true));
        }

        self.populate_aac_bitrate_map();

        let flusher = self.store.spawn_flusher(FLUSH_INTERVAL);
        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(flusher);

        log::info!(
            "Encoder registry initialized: {} encoders, {} supported AAC bitrates",
            self.state().records.len(),
            self.bitrate_map().len()
        );

        Ok(())
    }

    /// Sample each AAC candidate's bitrate property into a sorted
    /// bitrate -> candidate map. Candidates advertise either a stepped
    /// numeric range or an enumerated list; both are handled.
    fn populate_aac_bitrate_map(&self) {
        let mut map = BTreeMap::new();

        for (offset, kind) in AAC_ENCODER_PRIORITY.iter().enumerate() {
            // Existence check as much as a codec check
            match self.engine.encoder_codec(kind) {
                Some(codec) if codec.eq_ignore_ascii_case("aac") => {}
                _ => continue,
            }

            let Some(schema) = self.engine.encoder_properties(kind) else {
                continue;
            };

            let Some(prop) = schema.get("bitrate") else {
                log::warn!("{kind} has no bitrate property");
                continue;
            };

            match &prop.kind {
                PropertyKind::Number { min, max, step } => {
                    let step = (*step).max(1);
                    let mut bitrate = *min;
                    while bitrate <= *max {
                        if bitrate >= 0 {
                            map.entry(bitrate as u32).or_insert(offset);
                        }
                        bitrate += step;
                    }
                }
                PropertyKind::List { items } => {
                    for item in items.iter().filter(|i| !i.disabled) {
                        if let Some(bitrate) = item.value.as_u64() {
                            map.entry(bitrate as u32).or_insert(offset);
                        }
                    }
                }
                _ => {
                    log::warn!("{kind} uses unknown bitrate property type");
                }
            }
        }

        *self.bitrate_map() = map;
    }

    pub fn check_id(&self, id: &str) -> bool {
        if self.state().get(id).is_none() {
            log::warn!("{id} doesn't exist!");
            return false;
        }
        true
    }

    fn queue_change(&self, id: &str) {
        let state = self.state();
        let Some(record) = state.get(id) else { return };

        if !record.is_persistent {
            return;
        }

        self.store.queue_change(id, &record.content());
    }

    /// Create a native audio encoder. Returns `false` with no state
    /// mutation if the factory rejects the type.
    pub fn add_audio_encoder(
        &self,
        kind: &str,
        id: &str,
        is_persistent: bool,
        track: u32,
        settings: Option<Settings>,
    ) -> bool {
        if !self
            .engine
            .create_audio_encoder(kind, id, settings.as_ref(), track)
        {
            log::warn!("Failed to create audio encoder with type {kind}");
            return false;
        }

        // Read back the effective settings so schema defaults for keys the
        // caller omitted end up in the record.
        let effective = self.engine.encoder_settings(id);

        self.state().add_encoder(
            id,
            EncoderRecord {
                kind: kind.to_string(),
                settings: effective,
                is_audio: true,
                is_persistent,
            },
        );
        self.queue_change(id);

        true
    }

    /// Create a native video encoder, symmetric to `add_audio_encoder`
    pub fn add_video_encoder(
        &self,
        kind: &str,
        id: &str,
        is_persistent: bool,
        settings: Option<Settings>,
    ) -> bool {
        if !self.engine.create_video_encoder(kind, id, settings.as_ref()) {
            log::warn!("Failed to create video encoder with type {kind}");
            return false;
        }

        let effective = self.engine.encoder_settings(id);

        self.state().add_encoder(
            id,
            EncoderRecord {
                kind: kind.to_string(),
                settings: effective,
                is_audio: false,
                is_persistent,
            },
        );
        self.queue_change(id);

        true
    }

    fn remove_encoder(&self, id: &str) {
        // Idempotent: unknown ids are a logged no-op
        if !self.check_id(id) {
            return;
        }

        self.engine.release_encoder(id);

        let is_persistent = self
            .state()
            .get(id)
            .map(|r| r.is_persistent)
            .unwrap_or(false);

        if is_persistent {
            self.store.queue_deletion(id);
        }

        self.state().remove_encoder(id);
    }

    pub fn remove_audio_encoder(&self, id: &str) {
        self.remove_encoder(id);
    }

    pub fn remove_video_encoder(&self, id: &str) {
        self.remove_encoder(id);
    }

    /// Merge a patch into the encoder's current settings and push the
    /// result to the native handle
    pub fn update_settings(&self, id: &str, patch: &Settings) {
        if !self.check_id(id) {
            return;
        }

        let mut settings = self.engine.encoder_settings(id);
        merge_settings(&mut settings, patch);

        self.engine.update_encoder(id, &settings);
        self.state().update_settings(id, settings);
        self.queue_change(id);
    }

    /// Replace the encoder's settings wholesale. Used when a preset fully
    /// re-derives settings (e.g. recording quality changes).
    pub fn update_settings_direct(&self, id: &str, settings: &Settings) {
        if !self.check_id(id) {
            return;
        }

        self.engine.update_encoder(id, settings);
        self.state().update_settings(id, settings.clone());
        self.queue_change(id);
    }

    /// The first AAC implementation whose sampled bitrate domain contains
    /// `bitrate` exactly, falling back to the software encoder
    pub fn get_best_aac_encoder_for_bitrate(&self, bitrate: u32) -> String {
        self.bitrate_map()
            .get(&bitrate)
            .map(|&offset| AAC_ENCODER_PRIORITY[offset].to_string())
            .unwrap_or_else(|| AAC_FALLBACK_ENCODER.to_string())
    }

    /// Every bitrate some AAC implementation accepts, ascending
    pub fn supported_audio_bitrates(&self) -> Vec<u32> {
        self.bitrate_map().keys().copied().collect()
    }

    pub fn available_video_encoders(&self) -> Vec<String> {
        self.engine
            .video_encoder_types()
            .into_iter()
            .filter(|kind| !VIDEO_ENCODER_BLACKLIST.contains(&kind.as_str()))
            .collect()
    }

    pub fn available_audio_encoders(&self) -> Vec<String> {
        self.engine.audio_encoder_types()
    }

    /// Property form for the settings UI
    pub fn get_property_form_data(&self, id: &str) -> Option<Vec<FormField>> {
        let kind = self.state().get(id)?.kind.clone();
        let schema = self.engine.encoder_properties(&kind)?;
        let settings = self.engine.encoder_settings(id);

        Some(form_data(&schema, &settings))
    }

    /// Apply a submitted property form back to the native handle
    pub fn set_property_form_data(&self, id: &str, fields: &[FormField]) {
        if !self.check_id(id) {
            return;
        }

        let mut settings = self.engine.encoder_settings(id);
        apply_form_data(fields, &mut settings);

        self.engine.update_encoder(id, &settings);
        self.state().update_settings(id, settings);
        self.queue_change(id);
    }

    pub fn is_audio(&self, id: &str) -> Option<bool> {
        self.state().get(id).map(|r| r.is_audio)
    }

    pub fn encoder_kind(&self, id: &str) -> Option<String> {
        self.state().get(id).map(|r| r.kind.clone())
    }

    pub fn snapshot(&self, id: &str) -> Option<EncoderRecord> {
        self.state().get(id).cloned()
    }

    pub fn encoder_count(&self) -> usize {
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
            self.engine.release_encoder(&id);
        }
    }
}
