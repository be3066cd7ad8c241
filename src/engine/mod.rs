// Native Engine Boundary
// Trait contract for the out-of-process media engine. This layer only
// manages handles and settings; encoding itself is opaque to it.

mod properties;

pub use properties::*;

#[cfg(test)]
pub(crate) mod fake;

use crate::models::Settings;

/// Asynchronous engine events. The engine runs out-of-process, so start and
/// stop outcomes arrive after the fact and are applied by the registries on
/// their regular mutation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    Started { output_id: String },
    Stopped { output_id: String, code: i32 },
    Reconnecting { output_id: String },
    Reconnected { output_id: String },
}

/// The native engine contract. All factories are keyed by a string type
/// name and a caller-chosen unique handle id. Construction failures are
/// reported as `false` — probing unsupported hardware encoder types is an
/// expected, frequent path and must not error.
pub trait MediaEngine: Send + Sync {
    // Factories. Settings are optional; the engine applies its schema
    // defaults for anything missing.
    fn create_output(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool;
    fn create_audio_encoder(&self, kind: &str, id: &str, settings: Option<&Settings>, track: u32) -> bool;
    fn create_video_encoder(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool;
    fn create_provider(&self, kind: &str, id: &str, settings: Option<&Settings>) -> bool;

    // Handle teardown. Unknown ids are ignored.
    fn release_output(&self, id: &str);
    fn release_encoder(&self, id: &str);
    fn release_provider(&self, id: &str);

    // Effective settings readback and updates
    fn output_settings(&self, id: &str) -> Settings;
    fn encoder_settings(&self, id: &str) -> Settings;
    fn update_output(&self, id: &str, settings: &Settings);
    fn update_encoder(&self, id: &str, settings: &Settings);
    fn update_provider(&self, id: &str, settings: &Settings);

    // Output lifecycle. `start_output` returns the engine's synchronous
    // verdict; the definitive stop arrives later as a signal.
    fn start_output(&self, id: &str) -> bool;
    fn stop_output(&self, id: &str);

    // Graph wiring. `None` detaches without destroying the target.
    fn set_output_video_encoder(&self, output_id: &str, encoder_id: Option<&str>);
    fn set_output_audio_encoder(&self, output_id: &str, encoder_id: Option<&str>, track: u32);
    fn set_output_provider(&self, output_id: &str, provider_id: Option<&str>);

    /// The engine exposes no getter for previously set delay flags, so
    /// callers must always pass both current values together.
    fn set_output_delay(&self, output_id: &str, delay: u32, flags: u32);

    // Media routing. Raw outputs consume the global feeds directly;
    // everything else is fed through its encoders.
    fn route_raw_media(&self, output_id: &str);
    fn feed_encoder_video(&self, encoder_id: &str);
    fn feed_encoder_audio(&self, encoder_id: &str);

    // Capability and schema queries, keyed by type name
    fn output_properties(&self, kind: &str) -> Option<PropertySchema>;
    fn encoder_properties(&self, kind: &str) -> Option<PropertySchema>;
    /// Codec name an encoder type produces (e.g. "AAC"), if the type exists
    fn encoder_codec(&self, kind: &str) -> Option<String>;
    fn video_encoder_types(&self) -> Vec<String>;
    fn audio_encoder_types(&self) -> Vec<String>;

    // Per-handle codec support, advertised by the live output handle
    fn supported_audio_codecs(&self, output_id: &str) -> Vec<String>;
    fn supported_video_codecs(&self, output_id: &str) -> Vec<String>;

    /// Drain pending engine events
    fn poll_signals(&self) -> Vec<EngineSignal>;
}
