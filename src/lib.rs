// SpiritStream Outputs
// Output, encoder and provider lifecycle management over the native media
// engine: durable registries, a streaming preset and a recording preset.

pub mod engine;
pub mod models;
pub mod services;
