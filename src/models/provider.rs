// Provider Model
// Durable and runtime records for native streaming-service provider handles

use serde::{Deserialize, Serialize};

use crate::models::Settings;

/// The durable portion of a provider record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderContent {
    /// Native service type name (e.g. "rtmp_common", "rtmp_custom")
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub settings: Settings,
}

/// Full in-memory provider record
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub kind: String,
    pub settings: Settings,
    pub is_persistent: bool,
}

impl ProviderRecord {
    pub fn content(&self) -> ProviderContent {
        ProviderContent {
            kind: self.kind.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl ProviderContent {
    pub fn into_record(self, is_persistent: bool) -> ProviderRecord {
        ProviderRecord {
            kind: self.kind,
            settings: self.settings,
            is_persistent,
        }
    }
}
