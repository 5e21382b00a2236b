//! Player controller: owns the session lifecycle.
//!
//! ```text
//! Idle --play--> Connecting --open ok--> Playing --stop--> Idle
//!                     |
//!                     +--open failed--> Error --stop/play--> ...
//! ```
//!
//! A session is three named threads (`radio-fetch`, `radio-decode`,
//! `radio-output`) sharing two ring buffers, one stop flag and one monitor.
//! Cancellation is cooperative: every blocking call in the workers has a
//! bounded timeout, so raising the flag is enough for them to wind down
//! within the stop grace period.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use radio_types::{
    BackgroundAudioMode, CurrentStation, PlayerState, RadioStatus, SessionEndReason,
    StationDescriptor,
};

use crate::config::EngineConfig;
use crate::decode::{DecodeWorker, SymphoniaFrameDecoder};
use crate::dsp;
use crate::error::{RadioError, Result};
use crate::fetch::{FetchWorker, open_station_stream};
use crate::output::OutputPump;
use crate::ring_buffer::ByteRingBuffer;
use crate::signals::{ActivitySource, BackgroundModeListener};
use crate::sink::AudioSink;
use crate::stations::StationDirectory;
use crate::status::SessionMonitor;
use crate::transport::HttpTransport;

const TEST_TONE_HZ: f32 = 1000.0;
const TEST_TONE_AMPLITUDE: f32 = 0.3;

/// Running pipeline of one station.
struct Session {
    stop: Arc<AtomicBool>,
    compressed: Arc<ByteRingBuffer>,
    pcm: Arc<ByteRingBuffer>,
    workers: Vec<JoinHandle<()>>,
}

impl Session {
    /// Raise the stop flag and wait up to `grace` for the workers.
    ///
    /// Workers still running after the grace period are detached; they hold
    /// their own `Arc`s, so nothing is freed under them.
    fn halt(mut self, grace: Duration) {
        self.stop.store(true, Ordering::Relaxed);
        let deadline = Instant::now() + grace;
        while self.workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.is_finished() {
                if worker.join().is_err() {
                    tracing::error!(worker = %name, "worker panicked");
                }
            } else {
                tracing::warn!(
                    worker = %name,
                    grace_ms = grace.as_millis() as u64,
                    "worker did not stop in time, detaching"
                );
            }
        }
        self.compressed.clear();
        self.pcm.clear();
    }
}

fn spawn_worker(stage: &'static str, job: Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(stage.to_string())
        .spawn(job)
        .map_err(|source| RadioError::WorkerSpawn { stage, source })
}

/// Radio controller: `play`, `stop`, volume and status.
///
/// All collaborators are injected; there is no global state. Control calls
/// are serialised, while state and status reads never wait on a connect.
pub struct RadioPlayer {
    directory: StationDirectory,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn AudioSink>,
    activity: Arc<dyn ActivitySource>,
    background: Arc<dyn BackgroundModeListener>,
    cfg: EngineConfig,
    volume: Arc<AtomicU8>,
    background_mode: AtomicU8,
    session: Mutex<Option<Session>>,
    state: Mutex<PlayerState>,
    current: Mutex<Option<StationDescriptor>>,
    monitor: Mutex<Option<Arc<SessionMonitor>>>,
}

impl RadioPlayer {
    pub fn new(
        directory: StationDirectory,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn AudioSink>,
        activity: Arc<dyn ActivitySource>,
        background: Arc<dyn BackgroundModeListener>,
        cfg: EngineConfig,
    ) -> Self {
        let volume = cfg.default_volume.min(100);
        Self {
            directory,
            transport,
            sink,
            activity,
            background,
            cfg,
            volume: Arc::new(AtomicU8::new(volume)),
            background_mode: AtomicU8::new(BackgroundAudioMode::None.to_u8()),
            session: Mutex::new(None),
            state: Mutex::new(PlayerState::Idle),
            current: Mutex::new(None),
            monitor: Mutex::new(None),
        }
    }

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PlayerState) {
        let mut s = Self::lock(&self.state);
        if *s != state {
            tracing::debug!(from = s.as_str(), to = state.as_str(), "player state");
            *s = state;
        }
    }

    fn signal_background(&self, mode: BackgroundAudioMode) {
        self.background_mode.store(mode.to_u8(), Ordering::Relaxed);
        self.background.set_background_mode(mode);
    }

    /// Start playing `station_id`, replacing any current session.
    ///
    /// An unknown id fails with [`RadioError::NotFound`] and changes nothing.
    /// Any other failure leaves the player in [`PlayerState::Error`].
    pub fn play(&self, station_id: &str) -> Result<()> {
        let station = self
            .directory
            .lookup(station_id)
            .cloned()
            .ok_or_else(|| RadioError::NotFound(station_id.to_string()))?;

        let mut session = Self::lock(&self.session);
        self.teardown(&mut session);

        self.set_state(PlayerState::Connecting);
        *Self::lock(&self.current) = Some(station.clone());
        tracing::info!(station = %station.id, url = %station.url, "radio connecting");

        match self.start_session(&station) {
            Ok(started) => {
                *session = Some(started);
                self.set_state(PlayerState::Playing);
                self.signal_background(BackgroundAudioMode::Radio);
                tracing::info!(station = %station.id, "radio playing");
                Ok(())
            }
            Err(e) => {
                self.sink.enable_output(false);
                self.set_state(PlayerState::Error);
                tracing::warn!(station = %station.id, error = %e, "radio failed to start");
                Err(e)
            }
        }
    }

    fn start_session(&self, station: &StationDescriptor) -> Result<Session> {
        let monitor = Arc::new(SessionMonitor::new());
        *Self::lock(&self.monitor) = Some(monitor.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let prepared = self.prepare(station, &monitor, &stop);
        let (opened, decoder, compressed, pcm) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                monitor.record_end(SessionEndReason::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let upstream_done = Arc::new(AtomicBool::new(false));
        let fetch = FetchWorker {
            transport: self.transport.clone(),
            compressed: compressed.clone(),
            monitor: monitor.clone(),
            stop: stop.clone(),
            upstream_done: upstream_done.clone(),
            cfg: self.cfg.clone(),
        };
        let decode = DecodeWorker {
            decoder,
            compressed: compressed.clone(),
            pcm: pcm.clone(),
            monitor: monitor.clone(),
            stop: stop.clone(),
            upstream_done,
            volume: self.volume.clone(),
            cfg: self.cfg.clone(),
        };
        let output = OutputPump {
            pcm: pcm.clone(),
            sink: self.sink.clone(),
            activity: self.activity.clone(),
            monitor: monitor.clone(),
            stop: stop.clone(),
            cfg: self.cfg.clone(),
        };

        let mut session = Session {
            stop,
            compressed,
            pcm,
            workers: Vec::with_capacity(3),
        };
        self.sink.enable_output(true);
        let jobs: [(&'static str, Box<dyn FnOnce() + Send>); 3] = [
            ("radio-fetch", Box::new(move || fetch.run(opened))),
            ("radio-decode", Box::new(move || decode.run())),
            ("radio-output", Box::new(move || output.run())),
        ];
        for (stage, job) in jobs {
            match spawn_worker(stage, job) {
                Ok(handle) => session.workers.push(handle),
                Err(e) => {
                    monitor.record_end(SessionEndReason::Error, Some(e.to_string()));
                    session.halt(self.cfg.stop_grace());
                    return Err(e);
                }
            }
        }
        Ok(session)
    }

    #[allow(clippy::type_complexity)]
    fn prepare(
        &self,
        station: &StationDescriptor,
        monitor: &SessionMonitor,
        stop: &Arc<AtomicBool>,
    ) -> Result<(
        crate::fetch::OpenedStream,
        Box<dyn crate::decode::FrameDecoder>,
        Arc<ByteRingBuffer>,
        Arc<ByteRingBuffer>,
    )> {
        let opened = open_station_stream(self.transport.as_ref(), station, &self.cfg, stop)?;
        monitor.set_stream(&opened.media_url, opened.codec);
        let decoder = SymphoniaFrameDecoder::new(opened.codec)?;
        let compressed = Arc::new(ByteRingBuffer::new(self.cfg.compressed_buffer_bytes)?);
        let pcm = Arc::new(ByteRingBuffer::new(self.cfg.pcm_buffer_bytes)?);
        Ok((opened, Box::new(decoder), compressed, pcm))
    }

    /// Stop the current session. Does nothing when already idle.
    pub fn stop(&self) {
        let mut session = Self::lock(&self.session);
        self.teardown(&mut session);
    }

    fn teardown(&self, session: &mut Option<Session>) {
        if *Self::lock(&self.state) == PlayerState::Idle && session.is_none() {
            return;
        }
        if let Some(running) = session.take() {
            running.halt(self.cfg.stop_grace());
        }
        self.sink.enable_output(false);
        self.set_state(PlayerState::Idle);
        let previous = Self::lock(&self.current).take();
        self.signal_background(BackgroundAudioMode::None);
        if let Some(station) = previous {
            tracing::info!(station = %station.id, "radio stopped");
        }
    }

    /// Set the volume in percent, clamped to `0..=100`; returns the new level.
    ///
    /// Applies from the next decoded frame on.
    pub fn set_volume(&self, level: i32) -> u8 {
        let level = level.clamp(0, 100) as u8;
        self.volume.store(level, Ordering::Relaxed);
        tracing::debug!(volume = level, "volume set");
        level
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Current state. A session whose workers failed reports `Error`.
    pub fn state(&self) -> PlayerState {
        let state = *Self::lock(&self.state);
        if state == PlayerState::Playing
            && Self::lock(&self.monitor)
                .as_ref()
                .is_some_and(|m| m.has_failed())
        {
            return PlayerState::Error;
        }
        state
    }

    pub fn current_station(&self) -> Option<StationDescriptor> {
        Self::lock(&self.current).clone()
    }

    pub fn list_stations(&self) -> Vec<StationDescriptor> {
        self.directory.list()
    }

    pub fn stations_by_genre(&self, genre: &str) -> Vec<StationDescriptor> {
        self.directory.by_genre(genre)
    }

    pub fn describe_stations(&self) -> String {
        self.directory.describe()
    }

    pub fn directory(&self) -> &StationDirectory {
        &self.directory
    }

    pub fn status(&self) -> RadioStatus {
        let mut status = RadioStatus {
            state: self.state(),
            current_station: Self::lock(&self.current).as_ref().map(CurrentStation::from),
            volume: self.volume(),
            background_mode: BackgroundAudioMode::from_u8(
                self.background_mode.load(Ordering::Relaxed),
            ),
            ..RadioStatus::default()
        };
        if let Some(monitor) = Self::lock(&self.monitor).as_ref() {
            monitor.fill(&mut status);
        }
        status
    }

    /// Play a 1 kHz sine through the sink for `duration`.
    ///
    /// Any running session is stopped first. Returns the samples written.
    pub fn test_tone(&self, duration: Duration) -> usize {
        self.stop();
        let _guard = Self::lock(&self.session);

        let rate = self.cfg.target_rate_hz.max(1);
        let total = (rate as u128 * duration.as_millis() / 1000) as usize;
        let chunk = self.cfg.output_chunk_samples.max(1);
        let step = std::f32::consts::TAU * TEST_TONE_HZ / rate as f32;
        let volume = self.volume();

        tracing::info!(duration_ms = duration.as_millis() as u64, rate_hz = rate, "test tone");
        self.sink.enable_output(true);
        let mut written = 0;
        while written < total {
            let n = chunk.min(total - written);
            let mut samples: Vec<i16> = (written..written + n)
                .map(|i| ((i as f32 * step).sin() * TEST_TONE_AMPLITUDE * i16::MAX as f32) as i16)
                .collect();
            dsp::apply_volume(&mut samples, volume);
            self.sink.write_pcm(&samples);
            written += n;
        }
        self.sink.enable_output(false);
        written
    }
}

impl Drop for RadioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SharedActivity, SharedBackgroundMode};
    use crate::sink::MemorySink;
    use crate::transport::{FetchedText, StreamRequest, StreamResponse};

    type Reply<T> = std::result::Result<T, String>;

    struct Unreachable;

    impl HttpTransport for Unreachable {
        fn fetch_text(&self, url: &str, _limit: usize, _timeout: Duration) -> Reply<FetchedText> {
            Err(format!("connection refused: {url}"))
        }

        fn open_stream(&self, url: &str, _request: &StreamRequest) -> Reply<StreamResponse> {
            Err(format!("connection refused: {url}"))
        }
    }

    fn player(sink: MemorySink, background: SharedBackgroundMode) -> RadioPlayer {
        RadioPlayer::new(
            StationDirectory::builtin(),
            Arc::new(Unreachable),
            Arc::new(sink),
            Arc::new(SharedActivity::new()),
            Arc::new(background),
            EngineConfig::default(),
        )
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let background = SharedBackgroundMode::new();
        let p = player(MemorySink::new(), background.clone());
        p.stop();
        p.stop();
        assert_eq!(p.state(), PlayerState::Idle);
        assert!(p.current_station().is_none());
        assert_eq!(background.get(), BackgroundAudioMode::None);
    }

    #[test]
    fn unknown_station_is_not_found_and_changes_nothing() {
        let p = player(MemorySink::new(), SharedBackgroundMode::new());
        let err = p.play("unknown_id").unwrap_err();
        assert!(matches!(err, RadioError::NotFound(ref id) if id == "unknown_id"));
        assert_eq!(p.state(), PlayerState::Idle);
        assert!(p.current_station().is_none());
    }

    #[test]
    fn connection_failure_moves_to_error_and_stop_recovers() {
        let background = SharedBackgroundMode::new();
        let p = player(MemorySink::new(), background.clone());
        let err = p.play("bbc").unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(p.state(), PlayerState::Error);
        assert_eq!(p.current_station().map(|s| s.id), Some("bbc".to_string()));
        let status = p.status();
        assert_eq!(status.end_reason, Some(SessionEndReason::Error));
        assert!(status.last_error.is_some());
        assert_eq!(background.get(), BackgroundAudioMode::None);

        p.stop();
        assert_eq!(p.state(), PlayerState::Idle);
        assert!(p.current_station().is_none());
    }

    #[test]
    fn volume_is_clamped() {
        let p = player(MemorySink::new(), SharedBackgroundMode::new());
        assert_eq!(p.volume(), 70);
        assert_eq!(p.set_volume(150), 100);
        assert_eq!(p.set_volume(-5), 0);
        assert_eq!(p.set_volume(42), 42);
        assert_eq!(p.status().volume, 42);
    }

    #[test]
    fn test_tone_writes_requested_length() {
        let sink = MemorySink::new();
        let p = player(sink.clone(), SharedBackgroundMode::new());
        p.set_volume(100);
        let written = p.test_tone(Duration::from_millis(500));
        assert_eq!(written, 8000);
        assert_eq!(sink.total_samples(), 8000);
        let samples = sink.chunks().concat();
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(peak > 9000 && peak < 10_000, "peak {peak}");
        assert!(!sink.is_enabled());
    }
}
