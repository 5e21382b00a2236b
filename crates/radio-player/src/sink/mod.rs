//! Audio sinks: where finished PCM goes.
//!
//! The engine hands mono, target-rate `i16` chunks to an [`AudioSink`]; how
//! they reach a speaker is the sink's business.

mod cpal_sink;

use std::sync::{Arc, Mutex, PoisonError};

pub use cpal_sink::{CpalSink, CpalSinkConfig, list_devices};

/// Consumer of finished PCM chunks (mono, 16-bit, target rate).
pub trait AudioSink: Send + Sync {
    /// Turn rendering on or off. A disabled sink renders silence.
    fn enable_output(&self, enabled: bool);

    /// Queue one chunk for rendering. May block briefly for backpressure.
    fn write_pcm(&self, samples: &[i16]);
}

/// Sink that records everything written to it.
///
/// Useful for tests and for running the engine headless.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkState>>,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    enabled: bool,
    chunks: Vec<Vec<i16>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).enabled
    }

    /// Chunks received so far, in order.
    pub fn chunks(&self) -> Vec<Vec<i16>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .clone()
    }

    pub fn total_samples(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .iter()
            .map(Vec::len)
            .sum()
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .clear();
    }
}

impl AudioSink for MemorySink {
    fn enable_output(&self, enabled: bool) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).enabled = enabled;
    }

    fn write_pcm(&self, samples: &[i16]) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .push(samples.to_vec());
    }
}
