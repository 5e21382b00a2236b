//! Signals exchanged with the voice assistant that shares the speaker.
//!
//! The output pump polls an [`ActivitySource`] every tick to decide whether it
//! must hold back audio, and the controller announces session start/end
//! through a [`BackgroundModeListener`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use radio_types::{BackgroundAudioMode, DeviceActivity};

/// Readable snapshot of the assistant's current activity.
pub trait ActivitySource: Send + Sync {
    fn activity(&self) -> DeviceActivity;
}

/// Receives the background audio mode whenever it changes.
pub trait BackgroundModeListener: Send + Sync {
    fn set_background_mode(&self, mode: BackgroundAudioMode);
}

/// Atomic activity cell; clones share the same value.
#[derive(Clone, Debug, Default)]
pub struct SharedActivity {
    value: Arc<AtomicU8>,
}

impl SharedActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, activity: DeviceActivity) {
        let prev = self.value.swap(activity.to_u8(), Ordering::Relaxed);
        if prev != activity.to_u8() {
            tracing::debug!(activity = ?activity, "device activity changed");
        }
    }

    pub fn get(&self) -> DeviceActivity {
        DeviceActivity::from_u8(self.value.load(Ordering::Relaxed))
    }
}

impl ActivitySource for SharedActivity {
    fn activity(&self) -> DeviceActivity {
        self.get()
    }
}

/// Atomic background-mode cell; clones share the same value.
#[derive(Clone, Debug, Default)]
pub struct SharedBackgroundMode {
    value: Arc<AtomicU8>,
}

impl SharedBackgroundMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> BackgroundAudioMode {
        BackgroundAudioMode::from_u8(self.value.load(Ordering::Relaxed))
    }
}

impl BackgroundModeListener for SharedBackgroundMode {
    fn set_background_mode(&self, mode: BackgroundAudioMode) {
        self.value.store(mode.to_u8(), Ordering::Relaxed);
        tracing::info!(mode = ?mode, "background audio mode");
    }
}
