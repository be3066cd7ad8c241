// Recording Output Service
// Recording preset built on the registries. The quality tier decides the
// whole graph: Stream shares the streaming video encoder, High/Ultra own
// a fixed-quality encoder, Lossless swaps in a raw uncompressed output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::models::{
    lossless_output_settings, settings_from, RecordingContent, RecordingEncoderType,
    RecordingQuality, Settings, AUDIO_TRACKS,
};
use crate::services::streaming_output::RTMP_VIDEO_ENCODER_ID;
use crate::services::{
    unique_id, AddOutputOptions, DocCollection, EncoderRegistry, OutputRegistry, FLUSH_INTERVAL,
};

const DOC_ID: &str = "rec-output-settings";

/// Container formats offered for non-lossless recording
pub const RECORDING_FORMATS: [&str; 6] = ["flv", "mp4", "mov", "mkv", "ts", "m3u8"];

struct RecordingState {
    content: RecordingContent,
    /// Owned video encoder for High/Ultra, absent otherwise
    video_encoder_id: Option<String>,
    /// Session audio encoders, one per recorded track, torn down at stop
    track_encoder_ids: [Option<String>; AUDIO_TRACKS],
}

pub struct RecordingOutputService {
    outputs: Arc<OutputRegistry>,
    encoders: Arc<EncoderRegistry>,
    store: Arc<DocCollection>,
    state: Mutex<RecordingState>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    initialized: AtomicBool,
}

fn output_kind_for(quality: RecordingQuality) -> &'static str {
    match quality {
        RecordingQuality::Lossless => "ffmpeg_output",
        _ => "ffmpeg_muxer",
    }
}

fn has_own_video_encoder(quality: RecordingQuality) -> bool {
    matches!(quality, RecordingQuality::High | RecordingQuality::Ultra)
}

/// Fixed-quality settings per encoder family. Each family spells the same
/// intent through different setting names.
fn rate_control_settings(encoder_type: RecordingEncoderType, quality: RecordingQuality) -> Settings {
    let crf: i64 = if quality == RecordingQuality::Ultra { 16 } else { 23 };

    match encoder_type {
        RecordingEncoderType::X264 => settings_from(&[
            ("use_bufsize", json!(true)),
            ("rate_control", json!("CRF")),
            ("profile", json!("high")),
            ("preset", json!("veryfast")),
            ("crf", json!(crf)),
        ]),
        RecordingEncoderType::Nvenc => settings_from(&[
            ("rate_control", json!("CQP")),
            ("profile", json!("high")),
            ("preset", json!("hq")),
            ("cqp", json!(crf)),
        ]),
        RecordingEncoderType::Amf => settings_from(&[
            ("Usage", json!(0)),
            ("Profile", json!(100)),
            ("RateControlMethod", json!(0)),
            ("QP.IFrame", json!(crf)),
            ("QP.PFrame", json!(crf)),
            ("QP.BFrame", json!(crf)),
            ("VBVBuffer", json!(1)),
            ("VBVBuffer.Size", json!(100_000)),
        ]),
        RecordingEncoderType::Qsv11 => settings_from(&[
            ("rate_control", json!("CQP")),
            ("qpi", json!(crf)),
            ("qpp", json!(crf)),
            ("qpb", json!(crf)),
        ]),
    }
}

impl RecordingOutputService {
    pub fn new(
        outputs: Arc<OutputRegistry>,
        encoders: Arc<EncoderRegistry>,
        data_dir: &Path,
    ) -> Self {
        Self {
            outputs,
            encoders,
            store: Arc::new(DocCollection::new(data_dir.join("recording"))),
            state: Mutex::new(RecordingState {
                content: RecordingContent::default(),
                video_encoder_id: None,
                track_encoder_ids: Default::default(),
            }),
            flusher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_change(&self) {
        self.store.queue_change(DOC_ID, &self.state().content);
    }

    /// Load the singleton configuration and rebuild the recording graph
    /// for the persisted quality tier. The registries and the streaming
    /// service must be initialized first.
    pub async fn initialize(&self) -> Result<(), String> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let docs: Vec<(String, RecordingContent)> =
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

        log::info!("Recording output service initialized");
        Ok(())
    }

    /// Idempotently make sure the recording output exists with the right
    /// type for the configured quality, then wire its video side
    fn create_config(&self) -> Result<(), String> {
        {
            let mut state = self.state();

            if state.content.directory.is_empty() {
                let videos = dirs_next::video_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .to_string_lossy()
                    .to_string();
                state.content.directory = videos;
            }

            if state.content.output_id.is_empty() {
                state.content.output_id = unique_id("output");
            }
        }

        let (output_id, quality) = {
            let state = self.state();
            (state.content.output_id.clone(), state.content.quality)
        };

        let expected_kind = output_kind_for(quality);

        match self.outputs.output_kind(&output_id) {
            Some(kind) if kind == expected_kind => {}
            Some(_) => {
                // Persisted output predates a quality change that never
                // finished; rebuild it with the right type
                self.outputs.remove_output(&output_id);
                self.build_output(&output_id, quality)?;
            }
            None => {
                self.build_output(&output_id, quality)?;
            }
        }

        self.bind_video_side(quality)?;
        Ok(())
    }

    fn build_output(&self, output_id: &str, quality: RecordingQuality) -> Result<(), String> {
        let settings = if quality == RecordingQuality::Lossless {
            Some(lossless_output_settings())
        } else {
            None
        };

        let options = AddOutputOptions {
            is_persistent: true,
            is_dummy: false,
        };

        if !self
            .outputs
            .add_output(output_kind_for(quality), output_id, options, settings)
        {
            return Err("Failed to create recording output".to_string());
        }

        // Mirror the configured track enablement onto the fresh record
        let bitmask = self.state().content.track_bitmask;
        for track in 0..AUDIO_TRACKS {
            self.outputs
                .set_track_bit(output_id, bitmask & (1 << track) != 0, track);
        }

        Ok(())
    }

    /// Bind the video encoder the quality tier calls for. High/Ultra own
    /// their encoder; Stream borrows the streaming one; Lossless encodes
    /// inside the raw output and binds nothing.
    fn bind_video_side(&self, quality: RecordingQuality) -> Result<(), String> {
        let (output_id, encoder_type) = {
            let state = self.state();
            (state.content.output_id.clone(), state.content.encoder_type)
        };

        match quality {
            RecordingQuality::Stream => {
                self.outputs
                    .set_video_encoder(&output_id, Some(RTMP_VIDEO_ENCODER_ID));
            }
            RecordingQuality::High | RecordingQuality::Ultra => {
                let encoder_id = unique_id("encoder");
                let settings = rate_control_settings(encoder_type, quality);

                let mut created = self.encoders.add_video_encoder(
                    encoder_type.engine_type(),
                    &encoder_id,
                    false,
                    Some(settings),
                );

                if !created {
                    // Hardware family unavailable; software always works
                    log::warn!(
                        "Encoder type {} unavailable, falling back to x264",
                        encoder_type.engine_type()
                    );
                    self.state().content.encoder_type = RecordingEncoderType::X264;
                    created = self.encoders.add_video_encoder(
                        "obs_x264",
                        &encoder_id,
                        false,
                        Some(rate_control_settings(RecordingEncoderType::X264, quality)),
                    );
                }

                if !created {
                    return Err("Failed to create recording video encoder".to_string());
                }

                self.outputs.set_video_encoder(&output_id, Some(&encoder_id));
                self.state().video_encoder_id = Some(encoder_id);
            }
            RecordingQuality::Lossless => {}
        }

        Ok(())
    }

    /// Switch quality tiers, rebuilding as much of the graph as the move
    /// requires. Rejected while recording.
    pub fn set_quality(&self, quality: RecordingQuality) {
        let (output_id, previous) = {
            let state = self.state();
            (state.content.output_id.clone(), state.content.quality)
        };

        if quality == previous {
            return;
        }

        if self.outputs.is_active(&output_id) {
            log::warn!("Cannot change recording quality while recording");
            return;
        }

        // Tear down the owned encoder before anything that could orphan it
        if has_own_video_encoder(previous) {
            self.outputs.set_video_encoder(&output_id, None);
            let encoder_id = self.state().video_encoder_id.take();
            if let Some(encoder_id) = encoder_id {
                self.encoders.remove_video_encoder(&encoder_id);
            }
        }

        self.state().content.quality = quality;

        if output_kind_for(previous) != output_kind_for(quality) {
            self.outputs.remove_output(&output_id);
            if let Err(e) = self.build_output(&output_id, quality) {
                log::warn!("{e}");
                return;
            }
        }

        if let Err(e) = self.bind_video_side(quality) {
            log::warn!("{e}");
        }

        self.queue_change();
    }

    /// Swap the owned encoder to a different family. Only meaningful for
    /// High/Ultra; rejected while recording.
    pub fn set_encoder_type(&self, encoder_type: RecordingEncoderType) {
        let (output_id, quality, old_encoder) = {
            let state = self.state();
            (
                state.content.output_id.clone(),
                state.content.quality,
                state.video_encoder_id.clone(),
            )
        };

        if self.outputs.is_active(&output_id) {
            log::warn!("Cannot change recording encoder type while recording");
            return;
        }

        if !has_own_video_encoder(quality) {
            log::warn!("Recording quality {quality:?} has no owned video encoder");
            return;
        }

        let encoder_id = unique_id("encoder");
        let settings = rate_control_settings(encoder_type, quality);

        if !self.encoders.add_video_encoder(
            encoder_type.engine_type(),
            &encoder_id,
            false,
            Some(settings),
        ) {
            log::warn!(
                "Encoder type {} unavailable, keeping current encoder",
                encoder_type.engine_type()
            );
            return;
        }

        // New encoder first, then rebind, then drop the old one
        self.outputs.set_video_encoder(&output_id, Some(&encoder_id));

        if let Some(old_encoder) = old_encoder {
            self.encoders.remove_video_encoder(&old_encoder);
        }

        {
            let mut state = self.state();
            state.video_encoder_id = Some(encoder_id);
            state.content.encoder_type = encoder_type;
        }
        self.queue_change();
    }

    /// Start a recording. The destination filename is derived from the
    /// configured directory, a local timestamp and the container format;
    /// each enabled track gets its own session AAC encoder.
    pub fn start(&self) -> bool {
        let (output_id, quality, directory, format, bitmask, tracks, encoder_type) = {
            let state = self.state();
            (
                state.content.output_id.clone(),
                state.content.quality,
                state.content.directory.clone(),
                state.content.format.clone(),
                state.content.track_bitmask,
                state.content.tracks.clone(),
                state.content.encoder_type,
            )
        };

        if self.outputs.is_active(&output_id) {
            log::warn!("Recording output is already active");
            return false;
        }

        let extension = if quality == RecordingQuality::Lossless {
            "avi"
        } else {
            format.as_str()
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S-%3f");
        let file = Path::new(&directory)
            .join(format!("{stamp}.{extension}"))
            .to_string_lossy()
            .to_string();

        // Raw outputs call the destination a url, muxers call it a path
        let output_kind = self.outputs.output_kind(&output_id).unwrap_or_default();
        let key = if output_kind == "ffmpeg_output" { "url" } else { "path" };
        self.outputs
            .update_settings(&output_id, &settings_from(&[(key, json!(file))]));

        if output_kind != "ffmpeg_output" {
            for track in 0..AUDIO_TRACKS {
                if bitmask & (1 << track) == 0 {
                    continue;
                }

                let bitrate = tracks[track].bitrate;
                let kind = self.encoders.get_best_aac_encoder_for_bitrate(bitrate);
                let encoder_id = unique_id("encoder");
                let settings = settings_from(&[("bitrate", json!(bitrate))]);

                if !self.encoders.add_audio_encoder(
                    &kind,
                    &encoder_id,
                    false,
                    track as u32,
                    Some(settings),
                ) {
                    log::warn!("Failed to create track {track} audio encoder {kind}");
                    continue;
                }

                self.outputs
                    .set_audio_encoder(&output_id, Some(&encoder_id), track);
                self.state().track_encoder_ids[track] = Some(encoder_id);
            }
        }

        if has_own_video_encoder(quality) {
            // Re-derive fixed-quality settings so a tier change that only
            // touched the document still lands on the live encoder
            let encoder_id = self.state().video_encoder_id.clone();
            if let Some(encoder_id) = encoder_id {
                self.encoders.update_settings_direct(
                    &encoder_id,
                    &rate_control_settings(encoder_type, quality),
                );
            }
        }

        self.outputs.start_output(&output_id)
    }

    /// Stop the recording and tear down the session track encoders. Each
    /// encoder is detached from the output before it is released.
    pub fn stop(&self) {
        let output_id = self.state().content.output_id.clone();
        self.outputs.stop_output(&output_id);

        for track in 0..AUDIO_TRACKS {
            let encoder_id = self.state().track_encoder_ids[track].take();
            if let Some(encoder_id) = encoder_id {
                self.outputs.set_audio_encoder(&output_id, None, track);
                self.encoders.remove_audio_encoder(&encoder_id);
            }
        }
    }

    /// Enable or disable a recorded track, mirroring the bit onto the
    /// output record. Rejected while recording: the session encoders for
    /// the run were created at start, so a mid-run bit would name a track
    /// with no encoder behind it.
    pub fn set_track(&self, enabled: bool, track: usize) {
        if track >= AUDIO_TRACKS {
            log::warn!("Recording track {track} is out of range");
            return;
        }

        let output_id = self.state().content.output_id.clone();

        if self.outputs.is_active(&output_id) {
            log::warn!("Cannot change recorded tracks while recording");
            return;
        }

        {
            let mut state = self.state();
            if enabled {
                state.content.track_bitmask |= 1 << track;
            } else {
                state.content.track_bitmask &= !(1 << track);
            }
        }

        self.outputs.set_track_bit(&output_id, enabled, track);
        self.queue_change();
    }

    pub fn set_audio_bitrate(&self, track: usize, bitrate: u32) {
        if track >= AUDIO_TRACKS {
            log::warn!("Recording track {track} is out of range");
            return;
        }

        self.state().content.tracks[track].bitrate = bitrate;
        self.queue_change();
    }

    /// Destination directory for the next recording. Rejected while
    /// recording; the running file keeps its path.
    pub fn set_file_directory(&self, directory: &str) {
        if self.is_active() {
            log::warn!("Cannot change recording directory while recording");
            return;
        }

        self.state().content.directory = directory.to_string();
        self.queue_change();
    }

    /// Container format for the next recording. Lossless recordings
    /// ignore it and always produce avi.
    pub fn set_recording_format(&self, format: &str) {
        if !RECORDING_FORMATS.contains(&format) {
            log::warn!("Unknown recording format {format}");
            return;
        }

        self.state().content.format = format.to_string();
        self.queue_change();
    }

    pub fn recording_formats(&self) -> Vec<String> {
        RECORDING_FORMATS.iter().map(|s| s.to_string()).collect()
    }

    /// Encoder families the engine can actually construct on this machine
    pub fn recording_encoder_types(&self) -> Vec<RecordingEncoderType> {
        self.encoders
            .available_video_encoders()
            .iter()
            .filter_map(|kind| RecordingEncoderType::from_engine_type(kind))
            .collect()
    }

    pub fn quality(&self) -> RecordingQuality {
        self.state().content.quality
    }

    pub fn encoder_type(&self) -> RecordingEncoderType {
        self.state().content.encoder_type
    }

    pub fn format(&self) -> String {
        self.state().content.format.clone()
    }

    pub fn file_directory(&self) -> String {
        self.state().content.directory.clone()
    }

    pub fn track_bitmask(&self) -> u32 {
        self.state().content.track_bitmask
    }

    pub fn output_id(&self) -> String {
        self.state().content.output_id.clone()
    }

    pub fn is_active(&self) -> bool {
        let output_id = self.state().content.output_id.clone();
        self.outputs.is_active(&output_id)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::services::{ProviderRegistry, StreamingOutputService};

    struct Fixture {
        engine: Arc<FakeEngine>,
        encoders: Arc<EncoderRegistry>,
        outputs: Arc<OutputRegistry>,
        recording: RecordingOutputService,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let engine: Arc<FakeEngine> = Arc::new(FakeEngine::new());
        let dir = tempfile::tempdir().unwrap();

        let encoders = Arc::new(EncoderRegistry::new(engine.clone(), dir.path()));
        let providers = Arc::new(ProviderRegistry::new(engine.clone(), dir.path()));
        encoders.initialize().await.unwrap();
        providers.initialize().await.unwrap();

        let outputs = Arc::new(OutputRegistry::new(
            engine.clone(),
            encoders.clone(),
            providers.clone(),
            dir.path(),
        ));
        outputs.initialize().await.unwrap();

        // The Stream tier borrows the streaming video encoder
        let streaming = StreamingOutputService::new(
            outputs.clone(),
            encoders.clone(),
            providers,
            dir.path(),
        );
        streaming.initialize().await.unwrap();

        let recording = RecordingOutputService::new(outputs.clone(), encoders.clone(), dir.path());
        recording.initialize().await.unwrap();

        Fixture {
            engine,
            encoders,
            outputs,
            recording,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_stream_quality_shares_streaming_encoder() {
        let f = fixture().await;

        assert_eq!(f.recording.quality(), RecordingQuality::Stream);
        assert_eq!(
            f.engine.video_binding(&f.recording.output_id()),
            Some(Some(RTMP_VIDEO_ENCODER_ID.to_string()))
        );
    }

    #[tokio::test]
    async fn test_quality_roundtrip_leaks_no_encoders() {
        let f = fixture().await;
        let baseline = f.encoders.encoder_count();

        f.recording.set_quality(RecordingQuality::High);
        assert_eq!(f.encoders.encoder_count(), baseline + 1);

        f.recording.set_quality(RecordingQuality::Stream);
        assert_eq!(f.encoders.encoder_count(), baseline);
        assert_eq!(
            f.engine.video_binding(&f.recording.output_id()),
            Some(Some(RTMP_VIDEO_ENCODER_ID.to_string()))
        );
    }

    #[tokio::test]
    async fn test_high_quality_owns_crf_encoder() {
        let f = fixture().await;

        f.recording.set_quality(RecordingQuality::High);

        let output = f.outputs.snapshot(&f.recording.output_id()).unwrap();
        let encoder_id = output.video_encoder.unwrap();
        assert_ne!(encoder_id, RTMP_VIDEO_ENCODER_ID);
        assert_eq!(f.encoders.encoder_kind(&encoder_id).as_deref(), Some("obs_x264"));
    }

    #[tokio::test]
    async fn test_lossless_swaps_to_raw_output() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        f.recording.set_quality(RecordingQuality::Lossless);

        let record = f.outputs.snapshot(&output_id).unwrap();
        assert_eq!(record.kind, "ffmpeg_output");
        assert_eq!(record.settings.get("format_name"), Some(&json!("avi")));
        assert_eq!(record.settings.get("video_encoder"), Some(&json!("utvideo")));
        assert_eq!(record.settings.get("audio_encoder"), Some(&json!("pcm_s16le")));
        assert!(record.video_encoder.is_none());

        // Back to Stream restores the muxer graph
        f.recording.set_quality(RecordingQuality::Stream);
        let record = f.outputs.snapshot(&output_id).unwrap();
        assert_eq!(record.kind, "ffmpeg_muxer");
    }

    #[tokio::test]
    async fn test_lossless_start_routes_raw_with_url_destination() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        f.recording.set_quality(RecordingQuality::Lossless);
        f.recording.set_file_directory("/tmp/recordings");

        assert!(f.recording.start());

        assert_eq!(f.engine.raw_media_calls(), vec![output_id.clone()]);
        assert!(f.engine.audio_feed_calls().is_empty());

        let url = f.engine.output_setting(&output_id, "url").unwrap();
        let url = url.as_str().unwrap();
        assert!(url.starts_with("/tmp/recordings/"));
        assert!(url.ends_with(".avi"));
    }

    #[tokio::test]
    async fn test_start_creates_track_encoders_and_stop_tears_down() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        f.recording.set_track(true, 2);
        f.recording.set_audio_bitrate(2, 448);

        let baseline = f.encoders.encoder_count();
        assert!(f.recording.start());

        // Tracks 0 (default) and 2 each got a session encoder
        assert_eq!(f.encoders.encoder_count(), baseline + 2);
        let track2 = f.engine.audio_binding(&output_id, 2).unwrap().unwrap();
        // 448 only exists in CoreAudio's enumerated list
        assert_eq!(f.encoders.encoder_kind(&track2).as_deref(), Some("CoreAudio_AAC"));

        f.recording.stop();
        f.outputs.pump_signals();

        assert!(!f.recording.is_active());
        assert_eq!(f.encoders.encoder_count(), baseline);
        assert_eq!(f.engine.audio_binding(&output_id, 2), Some(None));
    }

    #[tokio::test]
    async fn test_track_toggle_mirrors_to_output() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        assert_eq!(f.recording.track_bitmask(), 0b000001);

        f.recording.set_track(true, 2);
        assert_eq!(f.recording.track_bitmask(), 0b000101);
        assert_eq!(f.outputs.snapshot(&output_id).unwrap().audio_track_bitmask, 0b000101);

        f.recording.set_track(false, 0);
        assert_eq!(f.recording.track_bitmask(), 0b000100);
        assert_eq!(f.outputs.snapshot(&output_id).unwrap().audio_track_bitmask, 0b000100);
    }

    #[tokio::test]
    async fn test_track_toggle_rejected_while_recording() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        assert!(f.recording.start());
        f.recording.set_track(true, 3);

        // No bit appears without a session encoder behind it
        assert_eq!(f.recording.track_bitmask(), 0b000001);
        let record = f.outputs.snapshot(&output_id).unwrap();
        assert!(record.is_active);
        assert_eq!(record.audio_track_bitmask, 0b000001);
        assert!(record.audio_encoders[3].is_none());

        f.recording.stop();
        f.outputs.pump_signals();

        f.recording.set_track(true, 3);
        assert_eq!(f.recording.track_bitmask(), 0b001001);
    }

    #[tokio::test]
    async fn test_directory_change_rejected_while_recording() {
        let f = fixture().await;

        f.recording.set_file_directory("/tmp/recordings");
        assert!(f.recording.start());

        f.recording.set_file_directory("/tmp/elsewhere");
        assert_eq!(f.recording.file_directory(), "/tmp/recordings");

        f.recording.stop();
        f.outputs.pump_signals();

        f.recording.set_file_directory("/tmp/elsewhere");
        assert_eq!(f.recording.file_directory(), "/tmp/elsewhere");
    }

    #[tokio::test]
    async fn test_quality_change_rejected_while_recording() {
        let f = fixture().await;

        assert!(f.recording.start());
        f.recording.set_quality(RecordingQuality::High);

        assert_eq!(f.recording.quality(), RecordingQuality::Stream);
    }

    #[tokio::test]
    async fn test_encoder_type_swap_updates_binding() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        f.recording.set_quality(RecordingQuality::Ultra);
        let old_encoder = f.outputs.snapshot(&output_id).unwrap().video_encoder.unwrap();

        f.recording.set_encoder_type(RecordingEncoderType::Nvenc);

        let new_encoder = f.outputs.snapshot(&output_id).unwrap().video_encoder.unwrap();
        assert_ne!(new_encoder, old_encoder);
        assert_eq!(f.encoders.encoder_kind(&new_encoder).as_deref(), Some("ffmpeg_nvenc"));
        assert!(!f.encoders.check_id(&old_encoder));
        assert_eq!(f.recording.encoder_type(), RecordingEncoderType::Nvenc);
    }

    #[tokio::test]
    async fn test_unavailable_encoder_type_keeps_current() {
        let f = fixture().await;
        f.engine.reject_kind("obs_qsv11");

        f.recording.set_quality(RecordingQuality::High);
        f.recording.set_encoder_type(RecordingEncoderType::Qsv11);

        assert_eq!(f.recording.encoder_type(), RecordingEncoderType::X264);
    }

    #[tokio::test]
    async fn test_encoder_type_ignored_for_stream_quality() {
        let f = fixture().await;

        f.recording.set_encoder_type(RecordingEncoderType::Nvenc);
        assert_eq!(f.recording.encoder_type(), RecordingEncoderType::X264);
    }

    #[tokio::test]
    async fn test_ultra_uses_crf_16() {
        let settings = rate_control_settings(RecordingEncoderType::X264, RecordingQuality::Ultra);
        assert_eq!(settings.get("crf"), Some(&json!(16)));
        assert_eq!(settings.get("rate_control"), Some(&json!("CRF")));

        let settings = rate_control_settings(RecordingEncoderType::Amf, RecordingQuality::High);
        assert_eq!(settings.get("QP.IFrame"), Some(&json!(23)));
        assert_eq!(settings.get("VBVBuffer.Size"), Some(&json!(100_000)));
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let f = fixture().await;

        f.recording.set_recording_format("webm");
        assert_eq!(f.recording.format(), "flv");

        f.recording.set_recording_format("mp4");
        assert_eq!(f.recording.format(), "mp4");
    }

    #[tokio::test]
    async fn test_muxer_destination_uses_path_key() {
        let f = fixture().await;
        let output_id = f.recording.output_id();

        f.recording.set_file_directory("/tmp/recordings");
        f.recording.set_recording_format("mkv");

        assert!(f.recording.start());

        let path = f.engine.output_setting(&output_id, "path").unwrap();
        let path = path.as_str().unwrap();
        assert!(path.starts_with("/tmp/recordings/"));
        assert!(path.ends_with(".mkv"));
    }

    #[tokio::test]
    async fn test_configuration_survives_reload() {
        let engine: Arc<FakeEngine> = Arc::new(FakeEngine::new());
        let dir = tempfile::tempdir().unwrap();

        let output_id;
        {
            let encoders = Arc::new(EncoderRegistry::new(engine.clone(), dir.path()));
            let providers = Arc::new(ProviderRegistry::new(engine.clone(), dir.path()));
            encoders.initialize().await.unwrap();
            providers.initialize().await.unwrap();

            let outputs = Arc::new(OutputRegistry::new(
                engine.clone(),
                encoders.clone(),
                providers.clone(),
                dir.path(),
            ));
            outputs.initialize().await.unwrap();

            let streaming = StreamingOutputService::new(
                outputs.clone(),
                encoders.clone(),
                providers,
                dir.path(),
            );
            streaming.initialize().await.unwrap();

            let recording = RecordingOutputService::new(outputs.clone(), encoders.clone(), dir.path());
            recording.initialize().await.unwrap();

            recording.set_quality(RecordingQuality::High);
            recording.set_recording_format("mp4");
            output_id = recording.output_id();

            encoders.flush().unwrap();
            outputs.flush().unwrap();
            recording.flush().unwrap();
        }

        let encoders = Arc::new(EncoderRegistry::new(engine.clone(), dir.path()));
        let providers = Arc::new(ProviderRegistry::new(engine.clone(), dir.path()));
        encoders.initialize().await.unwrap();
        providers.initialize().await.unwrap();

        let outputs = Arc::new(OutputRegistry::new(
            engine.clone(),
            encoders.clone(),
            providers.clone(),
            dir.path(),
        ));
        outputs.initialize().await.unwrap();

        let streaming = StreamingOutputService::new(
            outputs.clone(),
            encoders.clone(),
            providers,
            dir.path(),
        );
        streaming.initialize().await.unwrap();

        let recording = RecordingOutputService::new(outputs.clone(), encoders.clone(), dir.path());
        recording.initialize().await.unwrap();

        assert_eq!(recording.output_id(), output_id);
        assert_eq!(recording.quality(), RecordingQuality::High);
        assert_eq!(recording.format(), "mp4");

        // The owned encoder is rebuilt, not resurrected from disk
        let record = outputs.snapshot(&output_id).unwrap();
        assert!(record.video_encoder.is_some());
    }
}
