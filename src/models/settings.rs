// Settings Model
// Opaque key-value settings maps passed through to the native engine

use serde_json::{Map, Value};

/// Settings for a native handle (output, encoder or provider).
/// The keys and value types are only validated by the engine itself.
pub type Settings = Map<String, Value>;

/// Merge a patch into existing settings. Keys present in the patch
/// overwrite existing keys; everything else is left untouched.
pub fn merge_settings(base: &mut Settings, patch: &Settings) {
    for (key, value) in patch {
        base.insert(key.clone(), value.clone());
    }
}

/// Build a settings map from key/value pairs
pub fn settings_from(pairs: &[(&str, Value)]) -> Settings {
    let mut settings = Settings::new();
    for (key, value) in pairs {
        settings.insert((*key).to_string(), value.clone());
    }
    settings
}
