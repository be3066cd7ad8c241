// Fake Engine
// In-memory MediaEngine for registry tests. Mirrors the behavior the real
// engine is contracted to have and records the calls tests assert on.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::json;

use super::{EngineSignal, ListItem, MediaEngine, Property, PropertyKind, PropertySchema};
use crate::models::{merge_settings, Settings};

const OUTPUT_KINDS: &[&str] = &["rtmp_output", "ftl_output", "ffmpeg_muxer", "ffmpeg_output", "null_output"];
const PROVIDER_KINDS: &[&str] = &["rtmp_common", "rtmp_custom"];
const VIDEO_ENCODER_KINDS: &[&str] = &[
    "obs_x264",
    "ffmpeg_nvenc",
    "amd_amf_h264",
    "obs_qsv11",
    "mf_h264_nvenc",
];
const AUDIO_ENCODER_KINDS: &[&str] = &["ffmpeg_aac", "mf_aac", "CoreAudio_AAC", "ffmpeg_opus"];

#[derive(Default)]
struct Handle {
    kind: String,
    settings: Settings,
}

#[derive(Default)]
struct Inner {
    outputs: HashMap<String, Handle>,
    encoders: HashMap<String, Handle>,
    providers: HashMap<String, Handle>,

    rejected_kinds: HashSet<String>,
    failing_starts: HashSet<String>,

    started: HashSet<String>,
    signals: Vec<EngineSignal>,

    encoder_releases: HashMap<String, usize>,
    stop_calls: Vec<String>,
    raw_media_calls: Vec<String>,
    video_feed_calls: Vec<String>,
    audio_feed_calls: Vec<String>,
    delay_calls: Vec<(String, u32, u32)>,

    video_bindings: HashMap<String, Option<String>>,
    audio_bindings: HashMap<(String, u32), Option<String>>,
    provider_bindings: HashMap<String, Option<String>>,
}

#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the factory reject a type, simulating missing hardware support
    pub fn reject_kind(&self, kind: &str) {
        self.lock().rejected_kinds.insert(kind.to_string());
    }

    /// Make `start_output` fail for a given output id
    pub fn fail_start(&self, id: &str) {
        self.lock().failing_starts.insert(id.to_string());
    }

    pub fn push_signal(&self, signal: EngineSignal) {
        self.lock().signals.push(signal);
    }

    pub fn encoder_release_count(&self, id: &str) -> usize {
        self.lock().encoder_releases.get(id).copied().unwrap_or(0)
    }

    pub fn encoder_exists(&self, id: &str) -> bool {
        self.lock().encoders.contains_key(id)
    }

    pub fn encoder_count(&self) -> usize {
        self.lock().encoders.len()
    }

    pub fn output_exists(&self, id: &str) -> bool {
        self.lock().outputs.contains_key(id)
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.lock().stop_calls.clone()
    }

    pub fn raw_media_calls(&self) -> Vec<String> {
        self.lock().raw_media_calls.clone()
    }

    pub fn video_feed_calls(&self) -> Vec<String> {
        self.lock().video_feed_calls.clone()
    }

    pub fn audio_feed_calls(&self) -> Vec<String> {
        self.lock().audio_feed_calls.clone()
    }

    pub fn delay_calls(&self) -> Vec<(String, u32, u32)> {
        self.lock().delay_calls.clone()
    }

    pub fn video_binding(&self, output_id: &str) -> Option<Option<String>> {
        self.lock().video_bindings.get(output_id).cloned()
    }

    pub fn audio_binding(&self, output_id: &str, track: u32) -> Option<Option<String>> {
        self.lock()
            .audio_bindings
            .get(&(output_id.to_string(), track))
            .cloned()
    }

    pub fn provider_binding(&self, output_id: &str) -> Option<Option<String>> {
        self.lock().provider_bindings.get(output_id).cloned()
    }

    pub fn output_setting(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        self.lock()
            .outputs
            .get(id)
            .and_then(|h| h.settings.get(key).cloned())
    }

    fn accepts(&self, kind: &str, known: &[&str]) -> bool {
        known.contains(&kind) && !self.lock().rejected_kinds.contains(kind)
    }

    fn effective_settings(schema: Option<PropertySchema>, settings: Option<&Settings>) -> Settings {
        let mut effective = schema.map(|s| s.defaults()).unwrap_or_default();
        if let Some(settings) = settings {
            merge_settings(&mut effective, settings);
        }
        effective
    }
}

fn number_prop(name: &str, min: i64, max: i64, step: i64, default: i64) -> Property {
    Property {
        name: name.to_string(),
        description: name.to_string(),
        enabled: true,
        visible: true,
        kind: PropertyKind::Number { min, max, step },
        default: Some(json!(default)),
    }
}

fn list_prop(name: &str, values: &[i64]) -> Property {
    Property {
        name: name.to_string(),
        description: name.to_string(),
        enabled: true,
        visible: true,
        kind: PropertyKind::List {
            items: values
                .iter()
                .map(|v| ListItem {
                    name: v.to_string(),
                    value: json!(v),
                    disabled: false,
                })
                .collect(),
        },
        default: None,
    }
}

fn encoder_schema(kind: &str) -> Option<PropertySchema> {
    let properties = match kind {
        // Stepped numeric bitrate domain
        "ffmpeg_aac" => vec![number_prop("bitrate", 64, 320, 32, 128)],
        // Enumerated bitrate domain; 448 is deliberately outside the
        // ffmpeg_aac range so priority for unique bitrates is testable
        "mf_aac" => vec![list_prop("bitrate", &[96, 128, 160, 192])],
        "CoreAudio_AAC" => vec![list_prop("bitrate", &[256, 320, 448])],
        "ffmpeg_opus" => vec![number_prop("bitrate", 32, 510, 1, 160)],
        "obs_x264" | "ffmpeg_nvenc" | "amd_amf_h264" | "obs_qsv11" | "mf_h264_nvenc" => {
            vec![number_prop("bitrate", 500, 100_000, 50, 2500)]
        }
        _ => return None,
    };

    Some(PropertySchema { properties })
}

fn output_schema(kind: &str) -> Option<PropertySchema> {
    if !OUTPUT_KINDS.contains(&kind) {
        return None;
    }

    Some(PropertySchema {
        properties: vec![Property {
            name: if kind == "ffmpeg_output" { "url" } else { "path" }.to_string(),
            description: "Destination".to_string(),
            enabled: true,
            visible: true,
            kind: PropertyKind::Text { multiline: false },
            default: Some(json!("")),
        }],
    })
}

impl MediaEngine for FakeEngine {
    fn create_output(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool {
        if !self.accepts(kind, OUTPUT_KINDS) {
            return false;
        }

        let handle = Handle {
            kind: kind.to_string(),
            settings: Self::effective_settings(output_schema(kind), settings),
        };
        self.lock().outputs.insert(id.to_string(), handle);
        true
    }

    fn create_audio_encoder(&self, kind: &str, id: &str, settings: Option<&Settings>, _track: u32) -> bool {
        if !self.accepts(kind, AUDIO_ENCODER_KINDS) {
            return false;
        }

        let handle = Handle {
            kind: kind.to_string(),
            settings: Self::effective_settings(encoder_schema(kind), settings),
        };
        self.lock().encoders.insert(id.to_string(), handle);
        true
    }

    fn create_video_encoder(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool {
        if !self.accepts(kind, VIDEO_ENCODER_KINDS) {
            return false;
        }

        let handle = Handle {
            kind: kind.to_string(),
            settings: Self::effective_settings(encoder_schema(kind), settings),
        };
        self.lock().encoders.insert(id.to_string(), handle);
        true
    }

    fn create_provider(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool {
        if !self.accepts(kind, PROVIDER_KINDS) {
            return false;
        }

        let handle = Handle {
            kind: kind.to_string(),
            settings: settings.cloned().unwrap_or_default(),
        };
        self.lock().providers.insert(id.to_string(), handle);
        true
    }

    fn release_output(&self, id: &str) {
        let mut inner = self.lock();
        inner.outputs.remove(id);
        inner.started.remove(id);
    }

    fn release_encoder(&self, id: &str) {
        let mut inner = self.lock();
        if inner.encoders.remove(id).is_some() {
            *inner.encoder_releases.entry(id.to_string()).or_insert(0) += 1;
        }
    }

    fn release_provider(&self, id: &str) {
        self.lock().providers.remove(id);
    }

    fn output_settings(&self, id: &str) -> Settings {
        self.lock()
            .outputs
            .get(id)
            .map(|h| h.settings.clone())
            .unwrap_or_default()
    }

    fn encoder_settings(&self, id: &str) -> Settings {
        self.lock()
            .encoders
            .get(id)
            .map(|h| h.settings.clone())
            .unwrap_or_default()
    }

    fn update_output(&self, id: &str, settings: &Settings) {
        if let Some(handle) = self.lock().outputs.get_mut(id) {
            merge_settings(&mut handle.settings, settings);
        }
    }

    fn update_encoder(&self, id: &str, settings: &Settings) {
        if let Some(handle) = self.lock().encoders.get_mut(id) {
            merge_settings(&mut handle.settings, settings);
        }
    }

    fn update_provider(&self, id: &str, settings: &Settings) {
        if let Some(handle) = self.lock().providers.get_mut(id) {
            merge_settings(&mut handle.settings, settings);
        }
    }

    fn start_output(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if !inner.outputs.contains_key(id) || inner.failing_starts.contains(id) {
            return false;
        }

        inner.started.insert(id.to_string());
        inner.signals.push(EngineSignal::Started { output_id: id.to_string() });
        true
    }

    fn stop_output(&self, id: &str) {
        let mut inner = self.lock();
        inner.stop_calls.push(id.to_string());
        if inner.started.remove(id) {
            inner.signals.push(EngineSignal::Stopped { output_id: id.to_string(), code: 0 });
        }
    }

    fn set_output_video_encoder(&self, output_id: &str, encoder_id: Option<&str>) {
        self.lock()
            .video_bindings
            .insert(output_id.to_string(), encoder_id.map(str::to_string));
    }

    fn set_output_audio_encoder(&self, output_id: &str, encoder_id: Option<&str>, track: u32) {
        self.lock()
            .audio_bindings
            .insert((output_id.to_string(), track), encoder_id.map(str::to_string));
    }

    fn set_output_provider(&self, output_id: &str, provider_id: Option<&str>) {
        self.lock()
            .provider_bindings
            .insert(output_id.to_string(), provider_id.map(str::to_string));
    }

    fn set_output_delay(&self, output_id: &str, delay: u32, flags: u32) {
        self.lock().delay_calls.push((output_id.to_string(), delay, flags));
    }

    fn route_raw_media(&self, output_id: &str) {
        self.lock().raw_media_calls.push(output_id.to_string());
    }

    fn feed_encoder_video(&self, encoder_id: &str) {
        self.lock().video_feed_calls.push(encoder_id.to_string());
    }

    fn feed_encoder_audio(&self, encoder_id: &str) {
        self.lock().audio_feed_calls.push(encoder_id.to_string());
    }

    fn output_properties(&self, kind: &str) -> Option<PropertySchema> {
        output_schema(kind)
    }

    fn encoder_properties(&self, kind: &str) -> Option<PropertySchema> {
        if self.lock().rejected_kinds.contains(kind) {
            return None;
        }
        encoder_schema(kind)
    }

    fn encoder_codec(&self, kind: &str) -> Option<String> {
        if self.lock().rejected_kinds.contains(kind) {
            return None;
        }

        match kind {
            "ffmpeg_aac" | "mf_aac" | "CoreAudio_AAC" => Some("AAC".to_string()),
            "ffmpeg_opus" => Some("Opus".to_string()),
            k if VIDEO_ENCODER_KINDS.contains(&k) => Some("H264".to_string()),
            _ => None,
        }
    }

    fn video_encoder_types(&self) -> Vec<String> {
        VIDEO_ENCODER_KINDS.iter().map(|s| s.to_string()).collect()
    }

    fn audio_encoder_types(&self) -> Vec<String> {
        AUDIO_ENCODER_KINDS.iter().map(|s| s.to_string()).collect()
    }

    fn supported_audio_codecs(&self, output_id: &str) -> Vec<String> {
        let kind = match self.lock().outputs.get(output_id) {
            Some(handle) => handle.kind.clone(),
            None => return Vec::new(),
        };

        match kind.as_str() {
            "rtmp_output" | "ffmpeg_muxer" | "ffmpeg_output" => vec!["aac".to_string()],
            "ftl_output" => vec!["opus".to_string()],
            _ => Vec::new(),
        }
    }

    fn supported_video_codecs(&self, output_id: &str) -> Vec<String> {
        if self.lock().outputs.contains_key(output_id) {
            vec!["h264".to_string()]
        } else {
            Vec::new()
        }
    }

    fn poll_signals(&self) -> Vec<EngineSignal> {
        std::mem::take(&mut self.lock().signals)
    }
}
