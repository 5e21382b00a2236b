//! Decode stage: compressed buffer in, mono target-rate PCM out.
//!
//! Both codecs share one loop. An accumulator is topped up from the
//! compressed buffer, frames are cut out of it with a [`FrameDecoder`], and
//! every decoded frame goes through the same post-processing
//! (downmix, resample, volume) before it is written to the PCM buffer.
//!
//! A full accumulator from which not a single byte could be consumed drops
//! its first byte; this resynchronises against corrupt input instead of
//! stalling.

pub mod codec;
pub mod frame;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use radio_types::{SessionEndReason, StreamCodec};

use crate::config::EngineConfig;
use crate::dsp;
use crate::ring_buffer::ByteRingBuffer;
use crate::sleep_unless_stopped;
use crate::status::SessionMonitor;

pub use codec::SymphoniaFrameDecoder;

/// Interleaved PCM of one decoded frame, in the source format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// What a single decode attempt did with its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// One frame decoded from the first `consumed` bytes.
    Frame { consumed: usize, pcm: DecodedPcm },
    /// `consumed` bytes were junk, metadata, or an undecodable frame.
    Skipped { consumed: usize },
    /// Nothing can be done until more bytes arrive.
    NeedMoreData,
}

/// Codec-specific frame decoder driven by the shared decode loop.
pub trait FrameDecoder: Send {
    fn codec(&self) -> StreamCodec;

    /// Decode at most one frame from the front of `input`.
    fn decode_frame(&mut self, input: &[u8]) -> DecodeOutcome;
}

/// Source format observed during a session.
///
/// Every frame is checked against it; a change is logged and published and
/// post-processing simply follows the new format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderSession {
    pub codec: StreamCodec,
    pub detected_rate: Option<u32>,
    pub detected_channels: Option<u16>,
}

impl DecoderSession {
    pub fn new(codec: StreamCodec) -> Self {
        Self {
            codec,
            detected_rate: None,
            detected_channels: None,
        }
    }

    /// Record the format of `pcm`; returns `true` when it differs from before.
    pub fn observe(&mut self, pcm: &DecodedPcm) -> bool {
        let changed = self.detected_rate != Some(pcm.sample_rate)
            || self.detected_channels != Some(pcm.channels);
        if changed {
            if self.detected_rate.is_some() {
                tracing::warn!(
                    codec = self.codec.as_str(),
                    from_hz = ?self.detected_rate,
                    to_hz = pcm.sample_rate,
                    from_channels = ?self.detected_channels,
                    to_channels = pcm.channels,
                    "source format changed mid-stream"
                );
            } else {
                tracing::info!(
                    codec = self.codec.as_str(),
                    rate_hz = pcm.sample_rate,
                    channels = pcm.channels,
                    "source format"
                );
            }
            self.detected_rate = Some(pcm.sample_rate);
            self.detected_channels = Some(pcm.channels);
        }
        changed
    }
}

/// Downmix, resample to `target_rate` and scale by `volume` percent.
pub fn postprocess(pcm: &DecodedPcm, target_rate: u32, volume: u8) -> Vec<i16> {
    let mono = dsp::downmix_to_mono(&pcm.samples, pcm.channels as usize);
    let mut out = dsp::resample_linear_q16(&mono, pcm.sample_rate, target_rate);
    dsp::apply_volume(&mut out, volume);
    out
}

/// Everything the decode thread needs, owned.
pub(crate) struct DecodeWorker {
    pub decoder: Box<dyn FrameDecoder>,
    pub compressed: Arc<ByteRingBuffer>,
    pub pcm: Arc<ByteRingBuffer>,
    pub monitor: Arc<SessionMonitor>,
    pub stop: Arc<AtomicBool>,
    pub upstream_done: Arc<AtomicBool>,
    pub volume: Arc<AtomicU8>,
    pub cfg: EngineConfig,
}

impl DecodeWorker {
    fn limits(&self) -> (usize, usize, std::time::Duration) {
        match self.decoder.codec() {
            StreamCodec::Mp3 => (
                self.cfg.mp3_accumulator_bytes,
                self.cfg.mp3_read_bytes,
                std::time::Duration::from_millis(self.cfg.mp3_read_timeout_ms),
            ),
            StreamCodec::Aac => (
                // An ADTS frame can be up to 8191 bytes long.
                self.cfg.mp3_accumulator_bytes.max(self.cfg.aac_read_bytes * 2).max(8192),
                self.cfg.aac_read_bytes,
                std::time::Duration::from_millis(self.cfg.aac_read_timeout_ms),
            ),
        }
    }

    /// Push all of `bytes` downstream; `false` if stopped first.
    fn write_pcm(&self, bytes: &[u8]) -> bool {
        let mut offset = 0;
        while offset < bytes.len() {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            offset += self.pcm.write(&bytes[offset..], self.cfg.pcm_write_timeout());
        }
        true
    }

    fn upstream_exhausted(&self) -> bool {
        self.upstream_done.load(Ordering::Acquire) && self.compressed.available() == 0
    }

    pub fn run(mut self) {
        let (acc_cap, read_chunk, read_timeout) = self.limits();
        let acc_cap = acc_cap.max(read_chunk).max(1);
        let mut acc: Vec<u8> = Vec::with_capacity(acc_cap);
        let mut scratch = vec![0u8; read_chunk.max(1)];
        let mut session = DecoderSession::new(self.decoder.codec());
        let mut stuck_discards = 0u64;

        tracing::debug!(
            codec = session.codec.as_str(),
            accumulator = acc_cap,
            "decoder started"
        );

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let room = acc_cap - acc.len();
            let want = room.min(scratch.len());
            let got = if want > 0 {
                self.compressed.read(&mut scratch[..want], read_timeout)
            } else {
                0
            };
            acc.extend_from_slice(&scratch[..got]);

            let mut pos = 0;
            while pos < acc.len() && !self.stop.load(Ordering::Relaxed) {
                match self.decoder.decode_frame(&acc[pos..]) {
                    DecodeOutcome::Frame { consumed, pcm } => {
                        pos += consumed.max(1);
                        SessionMonitor::add(&self.monitor.frames_decoded, 1);
                        if session.observe(&pcm) {
                            self.monitor.set_source_format(pcm.sample_rate, pcm.channels);
                        }
                        let volume = self.volume.load(Ordering::Relaxed);
                        let out = postprocess(&pcm, self.cfg.target_rate_hz, volume);
                        if !self.write_pcm(&dsp::samples_to_le_bytes(&out)) {
                            break;
                        }
                    }
                    DecodeOutcome::Skipped { consumed } => {
                        let consumed = consumed.max(1).min(acc.len() - pos);
                        pos += consumed;
                        SessionMonitor::add(&self.monitor.resync_discards, consumed as u64);
                    }
                    DecodeOutcome::NeedMoreData => break,
                }
            }

            if pos == 0 && acc.len() == acc_cap {
                acc.remove(0);
                stuck_discards += 1;
                SessionMonitor::add(&self.monitor.resync_discards, 1);
                if stuck_discards <= 3 || stuck_discards % 500 == 0 {
                    tracing::warn!(
                        discards = stuck_discards,
                        "accumulator stuck, dropping one byte"
                    );
                }
                continue;
            }
            acc.drain(..pos);

            if got == 0 && pos == 0 {
                if self.upstream_exhausted() {
                    tracing::debug!(leftover = acc.len(), "compressed stream drained");
                    break;
                }
                if !sleep_unless_stopped(&self.stop, self.cfg.decode_idle()) {
                    break;
                }
            }
        }

        if self.stop.load(Ordering::Relaxed) {
            self.monitor.record_end(SessionEndReason::Stopped, None);
        }
        tracing::debug!("decoder exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Frames are `AA 55 xx xx` (four mono samples at 16 kHz), zero bytes
    /// are skippable filler, and anything else is junk the decoder cannot
    /// get past on its own.
    struct ScriptedFrames;

    impl FrameDecoder for ScriptedFrames {
        fn codec(&self) -> StreamCodec {
            StreamCodec::Mp3
        }

        fn decode_frame(&mut self, input: &[u8]) -> DecodeOutcome {
            match input {
                [0xAA, 0x55, a, b, ..] => DecodeOutcome::Frame {
                    consumed: 4,
                    pcm: DecodedPcm {
                        samples: vec![*a as i16, *b as i16, 0, 0],
                        sample_rate: 16_000,
                        channels: 1,
                    },
                },
                [0, ..] => DecodeOutcome::Skipped {
                    consumed: input.iter().take_while(|&&b| b == 0).count(),
                },
                _ => DecodeOutcome::NeedMoreData,
            }
        }
    }

    struct Harness {
        compressed: Arc<ByteRingBuffer>,
        pcm: Arc<ByteRingBuffer>,
        monitor: Arc<SessionMonitor>,
        upstream_done: Arc<AtomicBool>,
        worker: thread::JoinHandle<()>,
    }

    fn spawn_worker(input: &[u8], upstream_done: bool) -> Harness {
        let compressed = Arc::new(ByteRingBuffer::new(1024).unwrap());
        assert_eq!(compressed.write(input, Duration::ZERO), input.len());
        let pcm = Arc::new(ByteRingBuffer::new(1024).unwrap());
        let monitor = Arc::new(SessionMonitor::new());
        let upstream = Arc::new(AtomicBool::new(upstream_done));
        let worker = DecodeWorker {
            decoder: Box::new(ScriptedFrames),
            compressed: compressed.clone(),
            pcm: pcm.clone(),
            monitor: monitor.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            upstream_done: upstream.clone(),
            volume: Arc::new(AtomicU8::new(100)),
            cfg: EngineConfig {
                mp3_accumulator_bytes: 16,
                mp3_read_bytes: 8,
                mp3_read_timeout_ms: 5,
                decode_idle_ms: 5,
                ..EngineConfig::default()
            },
        };
        Harness {
            compressed,
            pcm,
            monitor,
            upstream_done: upstream,
            worker: thread::spawn(move || worker.run()),
        }
    }

    fn join_within(worker: thread::JoinHandle<()>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "decode worker did not exit");
            thread::sleep(Duration::from_millis(5));
        }
        worker.join().unwrap();
    }

    #[test]
    fn junk_only_input_is_discarded_byte_by_byte() {
        let h = spawn_worker(&[0xFF; 64], true);
        join_within(h.worker, Duration::from_secs(5));

        assert_eq!(h.compressed.available(), 0);
        assert_eq!(h.pcm.available(), 0);
        assert_eq!(h.monitor.frames_decoded.load(Ordering::Relaxed), 0);
        // Everything except a not-quite-full accumulator was dropped.
        assert!(h.monitor.resync_discards.load(Ordering::Relaxed) >= 64 - 16);
        assert_eq!(h.monitor.end_reason(), None);
    }

    #[test]
    fn decoding_recovers_after_junk_and_ends_with_upstream() {
        let mut input = vec![0xFF; 20];
        input.extend_from_slice(&[0; 6]);
        for i in 0..5u8 {
            input.extend_from_slice(&[0xAA, 0x55, i, 7]);
        }
        let h = spawn_worker(&input, false);

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.monitor.frames_decoded.load(Ordering::Relaxed) < 5 {
            assert!(Instant::now() < deadline, "frames were not decoded");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!h.worker.is_finished(), "worker must wait while upstream is open");

        h.upstream_done.store(true, Ordering::Release);
        join_within(h.worker, Duration::from_secs(5));

        assert_eq!(h.monitor.frames_decoded.load(Ordering::Relaxed), 5);
        assert_eq!(h.monitor.resync_discards.load(Ordering::Relaxed), 20 + 6);
        let mut out = vec![0u8; 64];
        let n = h.pcm.read(&mut out, Duration::ZERO);
        assert_eq!(n, 5 * 4 * 2);
        let first: Vec<i16> = out[..8]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(first, vec![0, 7, 0, 0]);
    }

    #[test]
    fn session_reports_first_format_and_changes() {
        let mut session = DecoderSession::new(StreamCodec::Aac);
        let pcm = |rate, channels| DecodedPcm {
            samples: vec![0; 4],
            sample_rate: rate,
            channels,
        };
        assert!(session.observe(&pcm(24_000, 2)));
        assert!(!session.observe(&pcm(24_000, 2)));
        assert!(session.observe(&pcm(48_000, 2)));
        assert_eq!(session.detected_rate, Some(48_000));
        assert!(session.observe(&pcm(48_000, 1)));
        assert_eq!(session.detected_channels, Some(1));
    }

    #[test]
    fn postprocess_of_mono_target_rate_only_scales_volume() {
        let pcm = DecodedPcm {
            samples: vec![1000, -2000, 3000],
            sample_rate: 16_000,
            channels: 1,
        };
        assert_eq!(postprocess(&pcm, 16_000, 100), vec![1000, -2000, 3000]);
        assert_eq!(postprocess(&pcm, 16_000, 50), vec![500, -1000, 1500]);
    }

    #[test]
    fn postprocess_downmixes_then_resamples() {
        let pcm = DecodedPcm {
            samples: vec![100, 300, 100, 300, 100, 300, 100, 300],
            sample_rate: 32_000,
            channels: 2,
        };
        assert_eq!(postprocess(&pcm, 16_000, 100), vec![200, 200]);
    }
}
