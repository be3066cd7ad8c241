// Recording Output Model
// Quality tiers, encoder families and the persisted recording configuration

use serde::{Deserialize, Serialize};

use crate::models::{Settings, AUDIO_TRACKS};

/// Recording quality tier. The tier decides which output/encoder graph the
/// recording preset builds, not just a settings value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    /// Share the streaming pipeline's video encoder (no double-encoding)
    Stream,
    High,
    Ultra,
    /// Fixed-format uncompressed output, bypasses the configurable encoders
    Lossless,
}

impl Default for RecordingQuality {
    fn default() -> Self {
        RecordingQuality::Stream
    }
}

/// Video encoder family for owned (High/Ultra) recording encoders.
/// Each family expresses "fixed quality" through different setting names,
/// so the preset keeps a per-family rate-control table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingEncoderType {
    X264,
    Nvenc,
    Amf,
    Qsv11,
}

impl RecordingEncoderType {
    /// The native factory type name for this family
    pub fn engine_type(&self) -> &'static str {
        match self {
            RecordingEncoderType::X264 => "obs_x264",
            RecordingEncoderType::Nvenc => "ffmpeg_nvenc",
            RecordingEncoderType::Amf => "amd_amf_h264",
            RecordingEncoderType::Qsv11 => "obs_qsv11",
        }
    }

    pub fn from_engine_type(kind: &str) -> Option<Self> {
        match kind {
            "obs_x264" => Some(RecordingEncoderType::X264),
            "ffmpeg_nvenc" => Some(RecordingEncoderType::Nvenc),
            "amd_amf_h264" => Some(RecordingEncoderType::Amf),
            "obs_qsv11" => Some(RecordingEncoderType::Qsv11),
            _ => None,
        }
    }
}

impl Default for RecordingEncoderType {
    fn default() -> Self {
        RecordingEncoderType::X264
    }
}

/// Per-track audio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConfig {
    pub name: String,
    /// Target AAC bitrate in kbps, matched against encoder schemas
    pub bitrate: u32,
}

/// The durable recording configuration, stored as a singleton document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingContent {
    /// Id of the output record currently backing recordings
    pub output_id: String,

    /// Destination directory for recording files
    pub directory: String,

    /// Container format / file extension (e.g. "flv", "mp4")
    pub format: String,

    /// Bit *i* set means audio track *i* is recorded
    pub track_bitmask: u32,

    /// Audio configuration per track
    pub tracks: [TrackConfig; AUDIO_TRACKS],

    pub quality: RecordingQuality,

    pub encoder_type: RecordingEncoderType,
}

impl Default for RecordingContent {
    fn default() -> Self {
        Self {
            output_id: String::new(),
            directory: String::new(),
            format: "flv".to_string(),
            track_bitmask: 1 << 0,
            tracks: std::array::from_fn(|i| TrackConfig {
                name: format!("Track {}", i + 1),
                bitrate: 128,
            }),
            quality: RecordingQuality::default(),
            encoder_type: RecordingEncoderType::default(),
        }
    }
}

/// The fixed settings of the lossless output graph
pub fn lossless_output_settings() -> Settings {
    crate::models::settings_from(&[
        ("format_name", serde_json::json!("avi")),
        ("video_encoder", serde_json::json!("utvideo")),
        ("audio_encoder", serde_json::json!("pcm_s16le")),
    ])
}
