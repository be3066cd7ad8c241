// Streaming Output Service
// RTMP streaming preset built on the registries: one persistent output,
// one persistent video encoder, two providers (well-known service or
// custom ingest) and a per-session audio encoder chosen by codec support.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::engine::FormField;
use crate::models::{settings_from, EncoderMode, ProviderMode, Settings, StreamingContent};
use crate::services::{
    unique_id, AddOutputOptions, DocCollection, EncoderRegistry, OutputRegistry, ProviderRegistry,
    FLUSH_INTERVAL,
};

/// Fixed ids for the streaming graph. Records and handles survive restarts
/// under the same names.
pub const RTMP_OUTPUT_ID: &str = "output_rtmp_output";
pub const RTMP_COMMON_PROVIDER_ID: &str = "provider_rtmp_common";
pub const RTMP_CUSTOM_PROVIDER_ID: &str = "provider_rtmp_custom";
pub const RTMP_VIDEO_ENCODER_ID: &str = "encoder_rtmp_video";

const DOC_ID: &str = "rtmp-output-settings";

const DEFAULT_VIDEO_ENCODER_TYPE: &str = "obs_x264";

struct StreamingState {
    content: StreamingContent,
    /// Session audio encoder, created at start and torn down at stop
    audio_encoder_id: Option<String>,
}

pub struct StreamingOutputService {
    outputs: Arc<OutputRegistry>,
    encoders: Arc<EncoderRegistry>,
    providers: Arc<ProviderRegistry>,
    store: Arc<DocCollection>,
    state: Mutex<StreamingState>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl StreamingOutputService {
    pub fn new(
        outputs: Arc<OutputRegistry>,
        encoders: Arc<EncoderRegistry>,
        providers: Arc<ProviderRegistry>,
        data_dir: &Path,
    ) -> Self {
        Self {
            outputs,
            encoders,
            providers,
            store: Arc::new(DocCollection::new(data_dir.join("streaming"))),
            state: Mutex::new(StreamingState {
                content: StreamingContent::default(),
                audio_encoder_id: None,
            }),
            flusher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StreamingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_change(&self) {
        self.store.queue_change(DOC_ID, &self.state().content);
    }

    /// Load the singleton configuration and make sure the streaming graph
    /// exists and is wired. The registries must be initialized first.
    pub async fn initialize(&self) -> Result<(), String> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let docs: Vec<(String, StreamingContent)> =
            self.store.load_all().await.map_err(|e| e.to_string())?;

        let content = docs
            .into_iter()
            .find(|(id, _)| id == DOC_ID)
            .map(|(_, content)| content)
            .unwrap_or_default();

        self.state().content = content;
        self.create_config()?;
        self.queue_change();

        let flusher = self.store.spawn_flusher(FLUSH_INTERVAL);
        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(flusher);

        log::info!("Streaming output service initialized");
        Ok(())
    }

    /// Idempotently build the persistent streaming graph: output, both
    /// providers and the video encoder, then wire the bindings.
    fn create_config(&self) -> Result<(), String> {
        let persistent = AddOutputOptions {
            is_persistent: true,
            is_dummy: false,
        };

        if self.outputs.snapshot(RTMP_OUTPUT_ID).is_none()
            && !self
                .outputs
                .add_output("rtmp_output", RTMP_OUTPUT_ID, persistent, None)
        {
            return Err("Failed to create streaming output".to_string());
        }

        for (kind, id) in [
            ("rtmp_common", RTMP_COMMON_PROVIDER_ID),
            ("rtmp_custom", RTMP_CUSTOM_PROVIDER_ID),
        ] {
            if self.providers.snapshot(id).is_none()
                && !self.providers.add_provider(kind, id, true, None)
            {
                return Err(format!("Failed to create streaming provider {kind}"));
            }
        }

        if self.encoders.snapshot(RTMP_VIDEO_ENCODER_ID).is_none()
            && !self.encoders.add_video_encoder(
                DEFAULT_VIDEO_ENCODER_TYPE,
                RTMP_VIDEO_ENCODER_ID,
                true,
                None,
            )
        {
            return Err("Failed to create streaming video encoder".to_string());
        }

        self.outputs
            .set_video_encoder(RTMP_OUTPUT_ID, Some(RTMP_VIDEO_ENCODER_ID));
        self.outputs
            .set_provider(RTMP_OUTPUT_ID, Some(self.active_provider_id()));

        Ok(())
    }

    fn active_provider_id(&self) -> &'static str {
        match self.state().content.provider_mode {
            ProviderMode::Common => RTMP_COMMON_PROVIDER_ID,
            ProviderMode::Custom => RTMP_CUSTOM_PROVIDER_ID,
        }
    }

    /// Start streaming. A session audio encoder is created to match what
    /// the output handle advertises: AAC destinations get the best AAC
    /// implementation for the configured bitrate, FTL-style destinations
    /// get Opus. The encoder lives only for this session.
    pub fn start(&self) -> bool {
        if self.outputs.is_active(RTMP_OUTPUT_ID) {
            log::warn!("Streaming output is already active");
            return false;
        }

        let codecs = self.outputs.supported_audio_codecs(RTMP_OUTPUT_ID);
        let bitrate = self.state().content.audio_bitrate;

        let encoder_kind = if codecs.iter().any(|c| c.eq_ignore_ascii_case("aac")) {
            Some(self.encoders.get_best_aac_encoder_for_bitrate(bitrate))
        } else if codecs.iter().any(|c| c.eq_ignore_ascii_case("opus")) {
            Some("ffmpeg_opus".to_string())
        } else {
            log::warn!("Output supports neither AAC nor Opus: {codecs:?}");
            None
        };

        if let Some(kind) = encoder_kind {
            let encoder_id = unique_id("encoder");
            let settings = settings_from(&[("bitrate", json!(bitrate))]);

            if self
                .encoders
                .add_audio_encoder(&kind, &encoder_id, false, 0, Some(settings))
            {
                self.outputs
                    .set_audio_encoder(RTMP_OUTPUT_ID, Some(&encoder_id), 0);
                self.state().audio_encoder_id = Some(encoder_id);
            } else {
                log::warn!("Failed to create session audio encoder {kind}");
            }
        }

        self.outputs.start_output(RTMP_OUTPUT_ID)
    }

    /// Stop streaming and tear down the session audio encoder. The
    /// encoder is detached from the output before it is released.
    pub fn stop(&self) {
        self.outputs.stop_output(RTMP_OUTPUT_ID);

        let encoder_id = self.state().audio_encoder_id.take();
        if let Some(encoder_id) = encoder_id {
            self.outputs.set_audio_encoder(RTMP_OUTPUT_ID, None, 0);
            self.encoders.remove_audio_encoder(&encoder_id);
        }
    }

    /// Swap the streaming video encoder to a different native type. The
    /// record keeps its id, so every binding that names it stays valid.
    /// Rejected while the output is live.
    pub fn set_video_encoder_type(&self, kind: &str) {
        if self.outputs.is_active(RTMP_OUTPUT_ID) {
            log::warn!("Cannot change video encoder type while streaming");
            return;
        }

        self.outputs.set_video_encoder(RTMP_OUTPUT_ID, None);
        self.encoders.remove_video_encoder(RTMP_VIDEO_ENCODER_ID);

        if !self
            .encoders
            .add_video_encoder(kind, RTMP_VIDEO_ENCODER_ID, true, None)
        {
            // Unsupported hardware type; software encoding always works
            log::warn!("Encoder type {kind} unavailable, falling back to {DEFAULT_VIDEO_ENCODER_TYPE}");
            self.encoders.add_video_encoder(
                DEFAULT_VIDEO_ENCODER_TYPE,
                RTMP_VIDEO_ENCODER_ID,
                true,
                None,
            );
        }

        self.outputs
            .set_video_encoder(RTMP_OUTPUT_ID, Some(RTMP_VIDEO_ENCODER_ID));
    }

    pub fn set_encoder_mode(&self, mode: EncoderMode) {
        self.state().content.encoder_mode = mode;
        self.queue_change();
    }

    /// Switch between the well-known service provider and the custom
    /// ingest provider, rebinding the output accordingly
    pub fn set_provider_mode(&self, mode: ProviderMode) {
        self.state().content.provider_mode = mode;
        self.outputs
            .set_provider(RTMP_OUTPUT_ID, Some(self.active_provider_id()));
        self.queue_change();
    }

    /// Update the active provider's settings (ingest URL, stream key, ...)
    pub fn set_provider_settings(&self, patch: &Settings) {
        self.providers
            .update_settings(self.active_provider_id(), patch);
    }

    pub fn set_video_bitrate(&self, bitrate: u32) {
        let patch = settings_from(&[("bitrate", json!(bitrate))]);
        self.encoders.update_settings(RTMP_VIDEO_ENCODER_ID, &patch);
    }

    /// Takes effect at the next start; the session encoder is already
    /// configured for the running session.
    pub fn set_audio_bitrate(&self, bitrate: u32) {
        self.state().content.audio_bitrate = bitrate;
        self.queue_change();
    }

    pub fn video_encoder_form(&self) -> Option<Vec<FormField>> {
        self.encoders.get_property_form_data(RTMP_VIDEO_ENCODER_ID)
    }

    pub fn set_video_encoder_form(&self, fields: &[FormField]) {
        self.encoders
            .set_property_form_data(RTMP_VIDEO_ENCODER_ID, fields);
    }

    pub fn encoder_mode(&self) -> EncoderMode {
        self.state().content.encoder_mode
    }

    pub fn provider_mode(&self) -> ProviderMode {
        self.state().content.provider_mode
    }

    pub fn audio_bitrate(&self) -> u32 {
        self.state().content.audio_bitrate
    }

    pub fn is_active(&self) -> bool {
        self.outputs.is_active(RTMP_OUTPUT_ID)
    }

    pub fn session_audio_encoder(&self) -> Option<String> {
        self.state().audio_encoder_id.clone()
    }

    pub fn flush(&self) -> Result<usize, String> {
        self.store.flush().map_err(|e| e.to_string())
    }

    pub async fn drain(&self) -> Result<(), String> {
        self.store.drain().await.map_err(|e| e.to_string())
    }

    /// Stop the background flusher. The registries own the handles.
    pub fn destroy(&self) {
        if let Some(flusher) = self.flusher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            flusher.abort();
        }
    }
}
