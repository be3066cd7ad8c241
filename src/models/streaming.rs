// Streaming Output Model
// Persisted configuration for the RTMP streaming preset

use serde::{Deserialize, Serialize};

/// Simple mode derives encoder settings from a handful of fields,
/// advanced mode exposes the raw encoder property form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    Simple,
    Advanced,
}

impl Default for EncoderMode {
    fn default() -> Self {
        EncoderMode::Simple
    }
}

/// Common mode uses a well-known streaming service definition,
/// custom mode takes a raw ingest URL and stream key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Common,
    Custom,
}

impl Default for ProviderMode {
    fn default() -> Self {
        ProviderMode::Common
    }
}

/// The durable streaming configuration, stored as a singleton document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingContent {
    pub encoder_mode: EncoderMode,
    pub provider_mode: ProviderMode,
    /// Target audio bitrate in kbps for the session audio encoder
    pub audio_bitrate: u32,
}

impl Default for StreamingContent {
    fn default() -> Self {
        Self {
            encoder_mode: EncoderMode::default(),
            provider_mode: ProviderMode::default(),
            audio_bitrate: 128,
        }
    }
}
