// Output Model
// Durable and runtime records for native output handles

use serde::{Deserialize, Serialize};

use crate::models::Settings;

/// Number of audio tracks an output can carry
pub const AUDIO_TRACKS: usize = 6;

/// The durable portion of an output record, exactly as persisted.
/// Runtime-only fields (`is_active`, supported codec lists) are re-derived
/// from the engine on load and never written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputContent {
    /// Native output type name (e.g. "rtmp_output", "ffmpeg_muxer")
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque settings validated only by the engine
    #[serde(default)]
    pub settings: Settings,

    /// Audio encoder id per track, `None` when the slot is unbound
    pub audio_encoders: [Option<String>; AUDIO_TRACKS],

    /// Bit *i* set means audio track *i* is enabled
    pub audio_track_bitmask: u32,

    /// Bound video encoder id, if any
    #[serde(default)]
    pub video_encoder: Option<String>,

    /// Bound provider id, if any
    #[serde(default)]
    pub provider: Option<String>,

    /// Stream delay in seconds
    #[serde(default)]
    pub delay: u32,

    /// Delay behavior flags. The engine has no getter for these, so the
    /// registry shadows them alongside `delay`.
    #[serde(default)]
    pub delay_flags: u32,

    /// Dummy outputs are constructed only to validate feasibility;
    /// their native handle is released immediately and they never start.
    #[serde(default)]
    pub is_dummy: bool,
}

/// Full in-memory output record
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub kind: String,
    pub settings: Settings,
    pub audio_encoders: [Option<String>; AUDIO_TRACKS],
    pub audio_track_bitmask: u32,
    pub video_encoder: Option<String>,
    pub provider: Option<String>,
    pub delay: u32,
    pub delay_flags: u32,
    pub is_dummy: bool,

    pub is_persistent: bool,

    /// Mirrors the engine's running state. Set `true` only from a
    /// successful native start, cleared from the engine's stop signal.
    pub is_active: bool,

    pub supported_audio_codecs: Vec<String>,
    pub supported_video_codecs: Vec<String>,
}

impl OutputRecord {
    /// The durable subset queued into the document store
    pub fn content(&self) -> OutputContent {
        OutputContent {
            kind: self.kind.clone(),
            settings: self.settings.clone(),
            audio_encoders: self.audio_encoders.clone(),
            audio_track_bitmask: self.audio_track_bitmask,
            video_encoder: self.video_encoder.clone(),
            provider: self.provider.clone(),
            delay: self.delay,
            delay_flags: self.delay_flags,
            is_dummy: self.is_dummy,
        }
    }
}

impl OutputContent {
    /// Rehydrate a loaded document into a runtime record. Supported codec
    /// lists come from the freshly created engine handle, never from disk.
    pub fn into_record(
        self,
        supported_audio_codecs: Vec<String>,
        supported_video_codecs: Vec<String>,
    ) -> OutputRecord {
        OutputRecord {
            kind: self.kind,
            settings: self.settings,
            audio_encoders: self.audio_encoders,
            audio_track_bitmask: self.audio_track_bitmask,
            video_encoder: self.video_encoder,
            provider: self.provider,
            delay: self.delay,
            delay_flags: self.delay_flags,
            is_dummy: self.is_dummy,
            is_persistent: true,
            is_active: false,
            supported_audio_codecs,
            supported_video_codecs,
        }
    }
}
