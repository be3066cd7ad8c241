// Output Registry
// Owns the native output handles, their encoder/provider wiring, track
// enablement, delay shadowing and the active-state lifecycle driven by
// engine signals.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{EngineSignal, MediaEngine};
use crate::models::{merge_settings, OutputContent, OutputRecord, Settings, AUDIO_TRACKS};
use crate::services::{DocCollection, EncoderRegistry, ProviderRegistry, FLUSH_INTERVAL};

/// Output types that consume the raw global feeds directly instead of
/// being fed through their bound encoders
const RAW_OUTPUT_KINDS: &[&str] = &["ffmpeg_output"];

#[derive(Debug, Clone, Copy, Default)]
pub struct AddOutputOptions {
    pub is_persistent: bool,
    /// Dummy outputs only validate that the type can be constructed; the
    /// native handle is released immediately and the record stays inert.
    pub is_dummy: bool,
}

#[derive(Default)]
struct OutputStore {
    records: HashMap<String, OutputRecord>,
}

pub struct OutputRegistry {
    engine: Arc<dyn MediaEngine>,
    encoders: Arc<EncoderRegistry>,
    providers: Arc<ProviderRegistry>,
    store: Arc<DocCollection>,
    state: Mutex<OutputStore>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl OutputRegistry {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        encoders: Arc<EncoderRegistry>,
        providers: Arc<ProviderRegistry>,
        data_dir: &Path,
    ) -> Self {
        Self {
            engine,
            encoders,
            providers,
            store: Arc::new(DocCollection::new(data_dir.join("outputs"))),
            state: Mutex::new(OutputStore::default()),
            flusher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, OutputStore> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load durable records, recreate native handles and rebind whatever
    /// references survived. References to encoders or providers that no
    /// longer exist are cleared rather than carried along broken.
    pub async fn initialize(&self) -> Result<(), String> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let docs: Vec<(String, OutputContent)> =
            self.store.load_all().await.map_err(|e| e.to_string())?;

        for (id, mut content) in docs {
            if !self
                .engine
                .create_output(&content.kind, &id, Some(&content.settings))
            {
                log::warn!("Failed to recreate output {id} with type {}", content.kind);
                continue;
            }

            let audio_codecs = self.engine.supported_audio_codecs(&id);
            let video_codecs = self.engine.supported_video_codecs(&id);

            if content.is_dummy {
                // Feasibility proven, the handle has no further use
                self.engine.release_output(&id);
            }

            let mut drifted = false;

            for (track, slot) in content.audio_encoders.iter_mut().enumerate() {
                let Some(encoder_id) = slot.clone() else { continue };

                if self.encoders.snapshot(&encoder_id).is_none() {
                    log::warn!("Bad audio encoder {encoder_id} for output {id}");
                    *slot = None;
                    drifted = true;
                } else if !content.is_dummy {
                    self.engine
                        .set_output_audio_encoder(&id, Some(&encoder_id), track as u32);
                }
            }

            if let Some(encoder_id) = content.video_encoder.clone() {
                if self.encoders.snapshot(&encoder_id).is_none() {
                    log::warn!("Bad video encoder {encoder_id} for output {id}");
                    content.video_encoder = None;
                    drifted = true;
                } else if !content.is_dummy {
                    self.engine.set_output_video_encoder(&id, Some(&encoder_id));
                }
            }

            if let Some(provider_id) = content.provider.clone() {
                if self.providers.snapshot(&provider_id).is_none() {
                    log::warn!("Bad provider {provider_id} for output {id}");
                    content.provider = None;
                    drifted = true;
                } else if !content.is_dummy {
                    self.engine.set_output_provider(&id, Some(&provider_id));
                }
            }

            if !content.is_dummy && (content.delay > 0 || content.delay_flags > 0) {
                self.engine
                    .set_output_delay(&id, content.delay, content.delay_flags);
            }

            let record = content.into_record(audio_codecs, video_codecs);

            if drifted {
                self.store.queue_change(&id, &record.content());
            }

            self.state().records.insert(id, record);
        }

        let flusher = self.store.spawn_flusher(FLUSH_INTERVAL);
        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(flusher);

        log::info!(
            "Output registry initialized: {} outputs",
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

    /// Create a native output. Returns `false` with no state mutation if
    /// the factory rejects the type. Dummy outputs release their handle
    /// right after the supported codec lists are captured.
    pub fn add_output(
        &self,
        kind: &str,
        id: &str,
        options: AddOutputOptions,
        settings: Option<Settings>,
    ) -> bool {
        if !self.engine.create_output(kind, id, settings.as_ref()) {
            log::warn!("Failed to create output with type {kind}");
            return false;
        }

        let supported_audio_codecs = self.engine.supported_audio_codecs(id);
        let supported_video_codecs = self.engine.supported_video_codecs(id);
        let effective = self.engine.output_settings(id);

        if options.is_dummy {
            self.engine.release_output(id);
        }

        self.state().records.insert(
            id.to_string(),
            OutputRecord {
                kind: kind.to_string(),
                settings: effective,
                audio_encoders: Default::default(),
                audio_track_bitmask: 1,
                video_encoder: None,
                provider: None,
                delay: 0,
                delay_flags: 0,
                is_dummy: options.is_dummy,
                is_persistent: options.is_persistent,
                is_active: false,
                supported_audio_codecs,
                supported_video_codecs,
            },
        );
        self.queue_change(id);

        true
    }

    /// Stop (if running), release and forget an output. Idempotent.
    pub fn remove_output(&self, id: &str) {
        if !self.check_id(id) {
            return;
        }

        let (is_dummy, is_active, is_persistent) = {
            let state = self.state();
            let Some(record) = state.records.get(id) else { return };
            (record.is_dummy, record.is_active, record.is_persistent)
        };

        if !is_dummy {
            if is_active {
                self.engine.stop_output(id);
            }
            self.engine.release_output(id);
        }

        if is_persistent {
            self.store.queue_deletion(id);
        }

        self.state().records.remove(id);
    }

    /// Start streaming/recording through an output. Raw outputs get the
    /// global media feeds routed directly; everything else is fed through
    /// its bound encoders first. `is_active` reflects only the engine's
    /// synchronous verdict; the definitive stop comes back as a signal.
    pub fn start_output(&self, id: &str) -> bool {
        if !self.check_id(id) {
            return false;
        }

        let (kind, is_dummy, is_active, video_encoder, audio_encoders, bitmask) = {
            let state = self.state();
            let Some(record) = state.records.get(id) else { return false };
            (
                record.kind.clone(),
                record.is_dummy,
                record.is_active,
                record.video_encoder.clone(),
                record.audio_encoders.clone(),
                record.audio_track_bitmask,
            )
        };

        if is_dummy {
            log::warn!("Refusing to start dummy output {id}");
            return false;
        }

        if is_active {
            log::warn!("Output {id} is already active");
            return false;
        }

        if RAW_OUTPUT_KINDS.contains(&kind.as_str()) {
            self.engine.route_raw_media(id);
        } else {
            if let Some(encoder_id) = &video_encoder {
                self.engine.feed_encoder_video(encoder_id);
            }

            for (track, slot) in audio_encoders.iter().enumerate() {
                let Some(encoder_id) = slot else { continue };
                if bitmask & (1 << track) != 0 {
                    self.engine.feed_encoder_audio(encoder_id);
                }
            }
        }

        let started = self.engine.start_output(id);

        if let Some(record) = self.state().records.get_mut(id) {
            record.is_active = started;
        }

        if !started {
            log::warn!("Engine rejected start for output {id}");
        }

        started
    }

    /// Request a stop. `is_active` stays set until the engine's stop
    /// signal comes back through `pump_signals`.
    pub fn stop_output(&self, id: &str) {
        if !self.check_id(id) {
            return;
        }

        // Dummy outputs released their handle at creation
        if self.is_dummy(id) {
            return;
        }

        self.engine.stop_output(id);
    }

    /// Drain engine signals and apply them to the records. Returns the
    /// drained signals so callers can react to them too.
    pub fn pump_signals(&self) -> Vec<EngineSignal> {
        let signals = self.engine.poll_signals();

        for signal in &signals {
            match signal {
                EngineSignal::Stopped { output_id, code } => {
                    if *code != 0 {
                        log::warn!("Output {output_id} stopped with code {code}");
                    }
                    if let Some(record) = self.state().records.get_mut(output_id) {
                        record.is_active = false;
                    }
                }
                EngineSignal::Reconnecting { output_id } => {
                    log::info!("Output {output_id} reconnecting");
                }
                EngineSignal::Reconnected { output_id } => {
                    log::info!("Output {output_id} reconnected");
                }
                EngineSignal::Started { .. } => {}
            }
        }

        signals
    }

    /// Bind (or with `None`, detach) a video encoder. The encoder must
    /// exist in the encoder registry.
    pub fn set_video_encoder(&self, output_id: &str, encoder_id: Option<&str>) {
        if !self.check_id(output_id) {
            return;
        }

        if let Some(encoder_id) = encoder_id {
            if !self.encoders.check_id(encoder_id) {
                return;
            }
        }

        let is_dummy = self.is_dummy(output_id);
        if !is_dummy {
            self.engine.set_output_video_encoder(output_id, encoder_id);
        }

        if let Some(record) = self.state().records.get_mut(output_id) {
            record.video_encoder = encoder_id.map(str::to_string);
        }
        self.queue_change(output_id);
    }

    /// Bind (or detach) an audio encoder on a track slot
    pub fn set_audio_encoder(&self, output_id: &str, encoder_id: Option<&str>, track: usize) {
        if !self.check_id(output_id) {
            return;
        }

        if track >= AUDIO_TRACKS {
            log::warn!("Track {track} is out of range for output {output_id}");
            return;
        }

        if let Some(encoder_id) = encoder_id {
            if !self.encoders.check_id(encoder_id) {
                return;
            }
        }

        let is_dummy = self.is_dummy(output_id);
        if !is_dummy {
            self.engine
                .set_output_audio_encoder(output_id, encoder_id, track as u32);
        }

        if let Some(record) = self.state().records.get_mut(output_id) {
            record.audio_encoders[track] = encoder_id.map(str::to_string);
        }
        self.queue_change(output_id);
    }

    /// Bind (or detach) a provider
    pub fn set_provider(&self, output_id: &str, provider_id: Option<&str>) {
        if !self.check_id(output_id) {
            return;
        }

        if let Some(provider_id) = provider_id {
            if !self.providers.check_id(provider_id) {
                return;
            }
        }

        let is_dummy = self.is_dummy(output_id);
        if !is_dummy {
            self.engine.set_output_provider(output_id, provider_id);
        }

        if let Some(record) = self.state().records.get_mut(output_id) {
            record.provider = provider_id.map(str::to_string);
        }
        self.queue_change(output_id);
    }

    /// Flip exactly one bit of the audio track bitmask
    pub fn set_track_bit(&self, output_id: &str, enabled: bool, track: usize) {
        if !self.check_id(output_id) {
            return;
        }

        if track >= AUDIO_TRACKS {
            log::warn!("Track {track} is out of range for output {output_id}");
            return;
        }

        if let Some(record) = self.state().records.get_mut(output_id) {
            if enabled {
                record.audio_track_bitmask |= 1 << track;
            } else {
                record.audio_track_bitmask &= !(1 << track);
            }
        }
        self.queue_change(output_id);
    }

    /// Set the stream delay. The engine has no getter for the flags, so
    /// both shadowed values are always pushed together.
    pub fn set_delay(&self, output_id: &str, delay: u32) {
        if !self.check_id(output_id) {
            return;
        }

        let (is_dummy, flags) = {
            let mut state = self.state();
            let Some(record) = state.records.get_mut(output_id) else { return };
            record.delay = delay;
            (record.is_dummy, record.delay_flags)
        };

        if !is_dummy {
            self.engine.set_output_delay(output_id, delay, flags);
        }
        self.queue_change(output_id);
    }

    /// Set the delay behavior flags, pushing the shadowed delay with them
    pub fn set_delay_flags(&self, output_id: &str, flags: u32) {
        if !self.check_id(output_id) {
            return;
        }

        let (is_dummy, delay) = {
            let mut state = self.state();
            let Some(record) = state.records.get_mut(output_id) else { return };
            record.delay_flags = flags;
            (record.is_dummy, record.delay)
        };

        if !is_dummy {
            self.engine.set_output_delay(output_id, delay, flags);
        }
        self.queue_change(output_id);
    }

    /// Merge a patch into the output's settings. Dummy outputs have no
    /// native handle, so only the stored record is updated.
    pub fn update_settings(&self, id: &str, patch: &Settings) {
        if !self.check_id(id) {
            return;
        }

        let is_dummy = self.is_dummy(id);

        if is_dummy {
            let mut state = self.state();
            if let Some(record) = state.records.get_mut(id) {
                merge_settings(&mut record.settings, patch);
            }
        } else {
            let mut settings = self.engine.output_settings(id);
            merge_settings(&mut settings, patch);
            self.engine.update_output(id, &settings);

            if let Some(record) = self.state().records.get_mut(id) {
                record.settings = settings;
            }
        }

        self.queue_change(id);
    }

    fn is_dummy(&self, id: &str) -> bool {
        self.state()
            .records
            .get(id)
            .map(|r| r.is_dummy)
            .unwrap_or(false)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state()
            .records
            .get(id)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    pub fn output_kind(&self, id: &str) -> Option<String> {
        self.state().records.get(id).map(|r| r.kind.clone())
    }

    pub fn supported_audio_codecs(&self, id: &str) -> Vec<String> {
        self.state()
            .records
            .get(id)
            .map(|r| r.supported_audio_codecs.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, id: &str) -> Option<OutputRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn output_count(&self) -> usize {
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
    /// Dummy records have none.
    pub fn destroy(&self) {
        if let Some(flusher) = self.flusher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            flusher.abort();
        }

        let live: Vec<String> = {
            let state = self.state();
            state
                .records
                .iter()
                .filter(|(_, r)| !r.is_dummy)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in live {
            self.engine.release_output(&id);
        }
    }
}
