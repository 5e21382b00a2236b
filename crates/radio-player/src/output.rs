//! Output pump: PCM buffer to sink, with pre-buffering and ducking.
//!
//! This is the only stage aware of the assistant's activity. While the
//! assistant is listening, speaking or connecting, the pump emits nothing
//! and leaves the PCM buffer alone; upstream stages then stall on
//! backpressure until output resumes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use radio_types::SessionEndReason;

use crate::config::EngineConfig;
use crate::dsp;
use crate::ring_buffer::ByteRingBuffer;
use crate::signals::ActivitySource;
use crate::sink::AudioSink;
use crate::sleep_unless_stopped;
use crate::status::SessionMonitor;

pub(crate) struct OutputPump {
    pub pcm: Arc<ByteRingBuffer>,
    pub sink: Arc<dyn AudioSink>,
    pub activity: Arc<dyn ActivitySource>,
    pub monitor: Arc<SessionMonitor>,
    pub stop: Arc<AtomicBool>,
    pub cfg: EngineConfig,
}

impl OutputPump {
    /// Wait until the cushion is buffered, the wait times out, or stop.
    ///
    /// Returns `false` only when stopped.
    fn prebuffer(&self) -> bool {
        let started = Instant::now();
        let deadline = self.cfg.prebuffer_timeout();
        while self.pcm.available() < self.cfg.prebuffer_bytes {
            if started.elapsed() >= deadline {
                tracing::warn!(
                    buffered = self.pcm.available(),
                    wanted = self.cfg.prebuffer_bytes,
                    "prebuffer timed out, starting anyway"
                );
                return !self.stop.load(Ordering::Relaxed);
            }
            if !sleep_unless_stopped(&self.stop, self.cfg.prebuffer_poll()) {
                return false;
            }
        }
        tracing::debug!(
            buffered = self.pcm.available(),
            waited_ms = started.elapsed().as_millis() as u64,
            "prebuffer complete"
        );
        true
    }

    pub fn run(self) {
        if !self.prebuffer() {
            self.monitor.record_end(SessionEndReason::Stopped, None);
            return;
        }

        let mut bytes = vec![0u8; self.cfg.output_chunk_samples.max(1) * 2];
        // An odd byte left over from the previous read.
        let mut carry: Option<u8> = None;
        let mut ducked = false;

        while !self.stop.load(Ordering::Relaxed) {
            let activity = self.activity.activity();
            if activity.pauses_background() {
                if !ducked {
                    tracing::info!(activity = ?activity, "radio ducked");
                    ducked = true;
                }
                SessionMonitor::add(&self.monitor.ducked_ticks, 1);
                sleep_unless_stopped(&self.stop, self.cfg.duck_poll());
                continue;
            }
            if ducked {
                tracing::info!("radio resumed");
                ducked = false;
            }

            let start = usize::from(carry.is_some());
            if let Some(b) = carry.take() {
                bytes[0] = b;
            }
            let n = self
                .pcm
                .read(&mut bytes[start..], self.cfg.output_read_timeout());
            let total = start + n;
            if n == 0 {
                if start == 1 {
                    carry = Some(bytes[0]);
                }
                SessionMonitor::add(&self.monitor.output_underruns, 1);
                sleep_unless_stopped(&self.stop, self.cfg.output_idle());
                continue;
            }

            let even = total & !1;
            if even < total {
                carry = Some(bytes[even]);
            }
            let mut samples = dsp::le_bytes_to_samples(&bytes[..even]);
            dsp::apply_gain(&mut samples, self.cfg.output_gain);
            if !samples.is_empty() {
                self.sink.write_pcm(&samples);
            }
        }

        self.monitor.record_end(SessionEndReason::Stopped, None);
        tracing::debug!("output pump exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SharedActivity;
    use crate::sink::MemorySink;
    use radio_types::DeviceActivity;
    use std::thread;
    use std::time::Duration;

    fn pump(
        pcm: Arc<ByteRingBuffer>,
        sink: MemorySink,
        activity: SharedActivity,
        stop: Arc<AtomicBool>,
    ) -> (OutputPump, Arc<SessionMonitor>) {
        let monitor = Arc::new(SessionMonitor::new());
        let cfg = EngineConfig {
            prebuffer_bytes: 8,
            prebuffer_timeout_ms: 200,
            prebuffer_poll_ms: 1,
            output_chunk_samples: 4,
            output_read_timeout_ms: 5,
            output_idle_ms: 1,
            duck_poll_ms: 1,
            ..EngineConfig::default()
        };
        let pump = OutputPump {
            pcm,
            sink: Arc::new(sink),
            activity: Arc::new(activity),
            monitor: monitor.clone(),
            stop,
            cfg,
        };
        (pump, monitor)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn gain_is_applied_with_saturation() {
        let pcm = Arc::new(ByteRingBuffer::new(64).unwrap());
        pcm.write(&dsp::samples_to_le_bytes(&[100, -100, 20_000, -20_000]), Duration::ZERO);
        let sink = MemorySink::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (pump, _) = pump(pcm, sink.clone(), SharedActivity::new(), stop.clone());
        let handle = thread::spawn(move || pump.run());

        wait_until(|| sink.total_samples() >= 4);
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let all: Vec<i16> = sink.chunks().concat();
        assert_eq!(all, vec![300, -300, i16::MAX, i16::MIN]);
    }

    #[test]
    fn ducking_holds_back_audio_until_idle() {
        let pcm = Arc::new(ByteRingBuffer::new(64).unwrap());
        pcm.write(&dsp::samples_to_le_bytes(&[1, 2, 3, 4, 5, 6]), Duration::ZERO);
        let sink = MemorySink::new();
        let activity = SharedActivity::new();
        activity.set(DeviceActivity::Speaking);
        let stop = Arc::new(AtomicBool::new(false));
        let (pump, monitor) = pump(pcm.clone(), sink.clone(), activity.clone(), stop.clone());
        let handle = thread::spawn(move || pump.run());

        wait_until(|| monitor.ducked_ticks.load(Ordering::Relaxed) >= 5);
        assert_eq!(sink.total_samples(), 0);
        assert_eq!(pcm.available(), 12);

        activity.set(DeviceActivity::Idle);
        wait_until(|| sink.total_samples() >= 6);
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(sink.chunks().concat(), vec![3, 6, 9, 12, 15, 18]);
    }

    #[test]
    fn odd_byte_is_carried_to_the_next_read() {
        let pcm = Arc::new(ByteRingBuffer::new(64).unwrap());
        let bytes = dsp::samples_to_le_bytes(&[1000, 2000, 3000, 4000, 5000]);
        pcm.write(&bytes[..9], Duration::ZERO);
        let sink = MemorySink::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (pump, _) = pump(pcm.clone(), sink.clone(), SharedActivity::new(), stop.clone());
        let handle = thread::spawn(move || pump.run());

        wait_until(|| sink.total_samples() >= 4);
        pcm.write(&bytes[9..], Duration::ZERO);
        wait_until(|| sink.total_samples() >= 5);
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(sink.chunks().concat(), vec![3000, 6000, 9000, 12000, 15000]);
    }

    #[test]
    fn stop_during_prebuffer_exits() {
        let pcm = Arc::new(ByteRingBuffer::new(64).unwrap());
        let stop = Arc::new(AtomicBool::new(true));
        let sink = MemorySink::new();
        let (pump, monitor) = pump(pcm, sink.clone(), SharedActivity::new(), stop);
        pump.run();
        assert_eq!(sink.total_samples(), 0);
        assert_eq!(monitor.end_reason(), Some(SessionEndReason::Stopped));
    }
}
