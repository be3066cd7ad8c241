// SpiritStream Outputs Models
// Data structures for the output/encoder manager

mod settings;
mod encoder;
mod output;
mod provider;
mod recording;
mod streaming;

pub use settings::*;
pub use encoder::*;
pub use output::*;
pub use provider::*;
pub use recording::*;
pub use streaming::*;
