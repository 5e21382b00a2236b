use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use radio_types::{RadioStatus, SessionEndReason, StreamCodec};

/// Per-session counters and facts written by the pipeline workers.
///
/// Counters are plain atomics so the hot loops never take a lock; the
/// descriptive fields sit behind one mutex and change rarely.
#[derive(Debug, Default)]
pub struct SessionMonitor {
    /// Compressed bytes pushed into the compressed buffer.
    pub bytes_fetched: AtomicU64,
    /// HTTP bodies consumed (1 for plain streams, one per HLS segment).
    pub segments_fetched: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub resync_discards: AtomicU64,
    /// Output ticks that found the PCM buffer empty.
    pub output_underruns: AtomicU64,
    pub ducked_ticks: AtomicU64,
    facts: Mutex<SessionFacts>,
}

#[derive(Debug, Default, Clone)]
struct SessionFacts {
    stream_url: Option<String>,
    codec: Option<StreamCodec>,
    source_rate_hz: Option<u32>,
    source_channels: Option<u16>,
    stream_title: Option<String>,
    end_reason: Option<SessionEndReason>,
    last_error: Option<String>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn facts(&self) -> MutexGuard<'_, SessionFacts> {
        self.facts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_stream(&self, url: &str, codec: StreamCodec) {
        let mut f = self.facts();
        f.stream_url = Some(url.to_string());
        f.codec = Some(codec);
    }

    pub fn set_stream_url(&self, url: &str) {
        self.facts().stream_url = Some(url.to_string());
    }

    pub fn set_source_format(&self, rate_hz: u32, channels: u16) {
        let mut f = self.facts();
        f.source_rate_hz = Some(rate_hz);
        f.source_channels = Some(channels);
    }

    pub fn set_stream_title(&self, title: &str) {
        self.facts().stream_title = Some(title.to_string());
    }

    /// Record why a worker ended. The first terminal reason wins so that a
    /// later `Stopped` does not mask an earlier failure.
    pub fn record_end(&self, reason: SessionEndReason, message: Option<String>) {
        let mut f = self.facts();
        if f.end_reason.is_none() {
            f.end_reason = Some(reason);
            f.last_error = message;
        }
    }

    pub fn end_reason(&self) -> Option<SessionEndReason> {
        self.facts().end_reason
    }

    /// Whether a worker ended the session with a failure.
    pub fn has_failed(&self) -> bool {
        matches!(
            self.end_reason(),
            Some(SessionEndReason::Error | SessionEndReason::Stalled)
        )
    }

    /// Copy session fields into `status`.
    pub fn fill(&self, status: &mut RadioStatus) {
        let f = self.facts().clone();
        status.stream_url = f.stream_url;
        status.codec = f.codec;
        status.source_rate_hz = f.source_rate_hz;
        status.source_channels = f.source_channels;
        status.stream_title = f.stream_title;
        status.end_reason = f.end_reason;
        status.last_error = f.last_error;
        status.bytes_fetched = self.bytes_fetched.load(Ordering::Relaxed);
        status.segments_fetched = self.segments_fetched.load(Ordering::Relaxed);
        status.frames_decoded = self.frames_decoded.load(Ordering::Relaxed);
        status.resync_discards = self.resync_discards.load(Ordering::Relaxed);
        status.output_underruns = self.output_underruns.load(Ordering::Relaxed);
        status.ducked_ticks = self.ducked_ticks.load(Ordering::Relaxed);
    }
}
