//! CPAL output sink.
//!
//! The engine produces mono 16 kHz `i16`; devices rarely take that as is.
//! This sink:
//! - picks an output device (default, or by case-insensitive substring)
//! - picks the supported config closest to the source rate, preferring `i16`
//! - converts to the device rate with a Rubato sinc resampler when needed
//! - duplicates mono across all device channels in the callback
//!
//! `cpal::Stream` is not `Send` on every host, so the stream is built and
//! owned by a dedicated thread that lives until the sink is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::AudioSink;

/// Settings for [`CpalSink`].
#[derive(Clone, Debug)]
pub struct CpalSinkConfig {
    /// Substring of the output device name; `None` uses the host default.
    pub device: Option<String>,
    /// Rate of the PCM handed to [`AudioSink::write_pcm`].
    pub source_rate_hz: u32,
    /// Audio queued ahead of the device callback.
    pub buffer_ms: u32,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for CpalSinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            source_rate_hz: 16_000,
            buffer_ms: 500,
            resample_chunk_frames: 1024,
        }
    }
}

/// Bounded mono `f32` queue between the writer and the device callback.
struct MonoQueue {
    inner: Mutex<VecDeque<f32>>,
    cv: Condvar,
    max_samples: usize,
}

impl MonoQueue {
    fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_samples)),
            cv: Condvar::new(),
            max_samples: max_samples.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push, waiting up to `timeout` for room. Returns samples dropped.
    fn push_timeout(&self, samples: &[f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;
        let mut g = self.lock();
        while offset < samples.len() {
            let room = self.max_samples.saturating_sub(g.len());
            if room > 0 {
                let n = room.min(samples.len() - offset);
                g.extend(&samples[offset..offset + n]);
                offset += n;
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        samples.len() - offset
    }

    /// Non-blocking pop used by the device callback.
    fn pop_into(&self, out: &mut Vec<f32>, max: usize) -> usize {
        let mut g = self.lock();
        let n = g.len().min(max);
        out.extend(g.drain(..n));
        drop(g);
        if n > 0 {
            self.cv.notify_all();
        }
        n
    }

    fn clear(&self) {
        self.lock().clear();
        self.cv.notify_all();
    }
}

/// Streaming mono sinc resampler (source rate to device rate).
struct StreamResampler {
    inner: Async<f32>,
    chunk: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl StreamResampler {
    fn new(src_rate: u32, dst_rate: u32, chunk: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let ratio = dst_rate as f64 / src_rate as f64;
        let chunk = chunk.max(1);
        let inner = Async::<f32>::new_sinc(ratio, 1.1, &params, chunk, 1, FixedAsync::Input)
            .map_err(|e| anyhow!("resampler init: {e}"))?;
        let out_len = ((chunk as f64 * ratio * 1.2).ceil() as usize).max(chunk) + 64;
        Ok(Self {
            inner,
            chunk,
            pending: Vec::with_capacity(chunk * 2),
            out: vec![0.0; out_len],
        })
    }

    /// Feed `input`; returns whatever full chunks produced.
    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut produced = Vec::new();
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };
        while self.pending.len() >= self.chunk {
            let block: Vec<f32> = self.pending.drain(..self.chunk).collect();
            let Ok(input_adapter) = InterleavedSlice::new(&block, 1, self.chunk) else {
                break;
            };
            let out_frames = self.out.len();
            let Ok(mut output_adapter) = InterleavedSlice::new_mut(&mut self.out, 1, out_frames)
            else {
                break;
            };
            match self
                .inner
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            {
                Ok((_nbr_in, nbr_out)) => produced.extend_from_slice(&self.out[..nbr_out]),
                Err(e) => {
                    tracing::error!("resampler process error: {e}");
                    break;
                }
            }
        }
        produced
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

/// What the stream thread reports once the device is running.
struct Opened {
    device_name: String,
    rate: u32,
    channels: u16,
    sample_format: cpal::SampleFormat,
}

/// [`AudioSink`] rendering through CPAL.
pub struct CpalSink {
    queue: Arc<MonoQueue>,
    enabled: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    resampler: Mutex<Option<StreamResampler>>,
    write_timeout: Duration,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    device_name: String,
    device_rate: u32,
}

impl CpalSink {
    /// Open the output device and start its stream (initially silent).
    pub fn open(cfg: CpalSinkConfig) -> Result<Self> {
        let device_rate_hint = cfg.source_rate_hz.max(8_000);
        let max_samples = (device_rate_hint as usize * 4 * cfg.buffer_ms.max(50) as usize) / 1000;
        let queue = Arc::new(MonoQueue::new(max_samples));
        let enabled = Arc::new(AtomicBool::new(false));
        let underruns = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<Opened>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_queue = queue.clone();
        let thread_enabled = enabled.clone();
        let thread_underruns = underruns.clone();
        let thread_cfg = cfg.clone();
        let thread = std::thread::Builder::new()
            .name("radio-cpal".to_string())
            .spawn(move || {
                stream_thread_main(
                    thread_cfg,
                    thread_queue,
                    thread_enabled,
                    thread_underruns,
                    ready_tx,
                    shutdown_rx,
                )
            })
            .context("spawn audio output thread")?;

        let opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio output thread exited during setup"))??;

        let resampler = if opened.rate != cfg.source_rate_hz {
            Some(StreamResampler::new(
                cfg.source_rate_hz,
                opened.rate,
                cfg.resample_chunk_frames,
            )?)
        } else {
            None
        };
        tracing::info!(
            device = %opened.device_name,
            rate_hz = opened.rate,
            channels = opened.channels,
            sample_format = ?opened.sample_format,
            resampling = resampler.is_some(),
            "audio output ready"
        );

        Ok(Self {
            queue,
            enabled,
            underruns,
            resampler: Mutex::new(resampler),
            write_timeout: Duration::from_millis(cfg.buffer_ms.max(50) as u64 * 2),
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            device_name: opened.device_name,
            device_rate: opened.rate,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Callbacks that found the queue empty while enabled.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalSink {
    fn enable_output(&self, enabled: bool) {
        // Disabled output leaves the queue alone; whatever is left over is
        // discarded when output comes back so it never leaks into a new session.
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if !was && enabled {
            self.queue.clear();
            if let Some(r) = self
                .resampler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_mut()
            {
                r.reset();
            }
        }
    }

    fn write_pcm(&self, samples: &[i16]) {
        let as_f32: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
        let converted = match self
            .resampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(r) => r.process(&as_f32),
            None => as_f32,
        };
        let dropped = self.queue.push_timeout(&converted, self.write_timeout);
        if dropped > 0 {
            tracing::warn!(dropped, "audio output queue full, samples dropped");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn stream_thread_main(
    cfg: CpalSinkConfig,
    queue: Arc<MonoQueue>,
    enabled: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    ready: Sender<Result<Opened>>,
    shutdown: Receiver<()>,
) {
    let opened = open_stream(&cfg, queue, enabled, underruns);
    let stream = match opened {
        Ok((stream, info)) => {
            let _ = ready.send(Ok(info));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    // Blocks until the sink is dropped (sender gone or explicit signal).
    let _ = shutdown.recv();
    drop(stream);
    tracing::debug!("audio output stream closed");
}

fn open_stream(
    cfg: &CpalSinkConfig,
    queue: Arc<MonoQueue>,
    enabled: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
) -> Result<(cpal::Stream, Opened)> {
    let host = cpal::default_host();
    let device = pick_device(&host, cfg.device.as_deref())?;
    let device_name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let supported = pick_output_config(&device, cfg.source_rate_hz)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, queue, enabled, underruns),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, queue, enabled, underruns),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, queue, enabled, underruns),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, queue, enabled, underruns),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    Ok((
        stream,
        Opened {
            device_name,
            rate: config.sample_rate,
            channels: config.channels,
            sample_format,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<MonoQueue>,
    enabled: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let mut mono: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("output stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if !enabled.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let frames = data.len() / channels;
            mono.clear();
            let got = queue.pop_into(&mut mono, frames);
            if got < frames {
                underruns.fetch_add(1, Ordering::Relaxed);
            }
            for (i, frame) in data.chunks_mut(channels).enumerate() {
                let v = mono.get(i).copied().unwrap_or(0.0);
                frame.fill(<T as cpal::Sample>::from_sample::<f32>(v));
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let found = host
            .output_devices()
            .context("no output devices")?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            });
        return found.ok_or_else(|| anyhow!("no output device matched: {needle}"));
    }
    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Choose the supported config closest to `target_rate`, preferring an exact
/// rate match, then the smallest rate above it, then `i16` samples.
fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate =
            pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_rate, b_rank, _)) => {
                is_better_candidate(target_rate, rate, rank, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((rate, rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("no supported output configs"))
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Rate distance decides first (rates at or above the target win ties so
/// we never downsample below the source), then format rank.
fn is_better_candidate(target: u32, rate: u32, rank: u8, best_rate: u32, best_rank: u8) -> bool {
    let key = |r: u32| (r.abs_diff(target), r < target);
    let (dist, below) = key(rate);
    let (best_dist, best_below) = key(best_rate);
    if dist != best_dist {
        dist < best_dist
    } else if below != best_below {
        !below
    } else {
        rank < best_rank && rank < 10
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Print available output devices to stdout (for `--list-devices`).
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());
    let devices = host.output_devices().context("no output devices")?;
    for (i, d) in devices.enumerate() {
        let name = d.description()?.name().to_string();
        let marker = if default_name.as_deref() == Some(name.as_str()) { " (default)" } else { "" };
        println!("#{i}: {name}{marker}");
    }
    Ok(())
}
