// Unique Id Service
// Kind-prefixed unique ids for outputs, encoders and providers.
// A local atomic counter plus a random process salt replaces the old
// cross-process counter round trip without weakening uniqueness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub struct IdGenerator {
    salt: u32,
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            salt: rand::random::<u32>(),
            counter: AtomicU64::new(0),
        }
    }

    /// Next id for a kind prefix, e.g. `unique_id("encoder")` ->
    /// `encoder_9f3a2b1c-17`
    pub fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{:08x}-{}", prefix, self.salt, n)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GENERATOR: OnceLock<IdGenerator> = OnceLock::new();

/// Process-wide id generator
pub fn unique_id(prefix: &str) -> String {
    GENERATOR.get_or_init(IdGenerator::new).next(prefix)
}
