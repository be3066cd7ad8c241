// Encoder Model
// Durable and runtime records for native encoder handles

use serde::{Deserialize, Serialize};

use crate::models::Settings;

/// The durable portion of an encoder record, exactly as persisted.
/// Non-persistent (session) encoders never produce one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderContent {
    /// Native encoder type name (e.g. "obs_x264", "ffmpeg_aac")
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque settings validated only by the engine
    #[serde(default)]
    pub settings: Settings,

    /// Audio vs video encoder
    pub is_audio: bool,
}

/// Full in-memory encoder record
#[derive(Debug, Clone)]
pub struct EncoderRecord {
    pub kind: String,
    pub settings: Settings,
    pub is_audio: bool,

    /// Session encoders (created for a single recording/streaming run)
    /// are never written to the document store.
    pub is_persistent: bool,
}

impl EncoderRecord {
    /// The durable subset queued into the document store
    pub fn content(&self) -> EncoderContent {
        EncoderContent {
            kind: self.kind.clone(),
            settings: self.settings.clone(),
            is_audio: self.is_audio,
        }
    }
}

impl EncoderContent {
    /// Rehydrate a loaded document into a runtime record
    pub fn into_record(self, is_persistent: bool) -> EncoderRecord {
        EncoderRecord {
            kind: self.kind,
            settings: self.settings,
            is_audio: self.is_audio,
            is_persistent,
        }
    }
}
