//! Internet radio streaming engine.
//!
//! HTTP/HLS fetch, MP3/ADTS-AAC decode to mono 16 kHz PCM, and a ducking
//! output pump, driven by [`RadioPlayer`].

pub mod config;
pub mod decode;
pub mod dsp;
pub mod error;
pub mod fetch;
pub mod icy;
mod output;
pub mod player;
pub mod playlist;
pub mod ring_buffer;
pub mod signals;
pub mod sink;
pub mod stations;
pub mod status;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub use config::EngineConfig;
pub use error::{RadioError, Result};
pub use player::RadioPlayer;
pub use signals::{ActivitySource, BackgroundModeListener, SharedActivity, SharedBackgroundMode};
pub use sink::{AudioSink, CpalSink, CpalSinkConfig, MemorySink};
pub use stations::StationDirectory;
pub use transport::{HttpTransport, UreqTransport};

const STOP_POLL: Duration = Duration::from_millis(10);

/// Sleep for `dur` in short slices, giving up early if `stop` is raised.
///
/// Returns `false` when stopped (including when already stopped on entry).
pub(crate) fn sleep_unless_stopped(stop: &AtomicBool, dur: Duration) -> bool {
    let deadline = Instant::now() + dur;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_false_when_already_stopped() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_unless_stopped(&stop, Duration::from_secs(5)));
    }

    #[test]
    fn sleep_completes_when_not_stopped() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(&stop, Duration::from_millis(5)));
        assert!(sleep_unless_stopped(&stop, Duration::ZERO));
    }
}
