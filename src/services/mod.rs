// Services
// Registries and preset managers layered over the native engine boundary

mod doc_store;
mod encoder_registry;
mod ids;
mod output_registry;
mod provider_registry;
mod recording_output;
pub mod streaming_output;

pub use doc_store::*;
pub use encoder_registry::*;
pub use ids::*;
pub use output_registry::*;
pub use provider_registry::*;
pub use recording_output::*;
pub use streaming_output::StreamingOutputService;
