//! Whole-engine runs over an in-memory transport and a recording sink.

mod support;

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use radio_player::dsp::resampled_len;
use radio_player::transport::{FetchedText, StreamRequest, StreamResponse};
use radio_player::{
    EngineConfig, HttpTransport, MemorySink, RadioPlayer, SharedActivity, SharedBackgroundMode,
    StationDirectory,
};
use radio_types::{
    BackgroundAudioMode, DeclaredFormat, DeviceActivity, PlayerState, SessionEndReason,
    StationDescriptor, StreamCodec,
};

use support::{FRAME_LEN, silent_mp3, wait_for};

const FRAMES: usize = 40;

/// Insert an ICY metadata block after every `metaint` audio bytes.
fn with_icy_blocks(audio: &[u8], metaint: usize, title: &str) -> Vec<u8> {
    let meta = format!("StreamTitle='{title}';");
    let units = meta.len().div_ceil(16);
    let mut block = vec![units as u8];
    block.extend_from_slice(meta.as_bytes());
    block.resize(1 + units * 16, 0);

    let mut out = Vec::new();
    for chunk in audio.chunks(metaint) {
        out.extend_from_slice(chunk);
        if chunk.len() == metaint {
            out.extend_from_slice(&block);
        }
    }
    out
}

struct FixedBody {
    body: Vec<u8>,
    icy_metaint: Option<usize>,
}

impl HttpTransport for FixedBody {
    fn fetch_text(
        &self,
        url: &str,
        _limit: usize,
        _timeout: Duration,
    ) -> Result<FetchedText, String> {
        Err(format!("no playlist at {url}"))
    }

    fn open_stream(&self, url: &str, _request: &StreamRequest) -> Result<StreamResponse, String> {
        Ok(StreamResponse {
            url: url.to_string(),
            status: 200,
            content_type: Some("audio/mpeg".to_string()),
            icy_metaint: self.icy_metaint,
            body: Box::new(Cursor::new(self.body.clone())),
        })
    }
}

fn local_station() -> StationDescriptor {
    StationDescriptor {
        id: "local_mp3".to_string(),
        display_name: "Local MP3".to_string(),
        url: "http://radio.invalid/stream.mp3".to_string(),
        genre: "test".to_string(),
        bitrate_kbps: 128,
        declared_format: DeclaredFormat::Unknown,
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        prebuffer_bytes: 2_000,
        prebuffer_timeout_ms: 1_000,
        output_chunk_samples: 1_024,
        ..EngineConfig::default()
    }
}

struct Rig {
    player: RadioPlayer,
    sink: MemorySink,
    activity: SharedActivity,
    background: SharedBackgroundMode,
}

fn rig(transport: FixedBody) -> Rig {
    let sink = MemorySink::new();
    let activity = SharedActivity::new();
    let background = SharedBackgroundMode::new();
    let player = RadioPlayer::new(
        StationDirectory::builtin_with([local_station()]),
        Arc::new(transport),
        Arc::new(sink.clone()),
        Arc::new(activity.clone()),
        Arc::new(background.clone()),
        engine_config(),
    );
    Rig {
        player,
        sink,
        activity,
        background,
    }
}

#[test]
fn mp3_stream_is_played_as_mono_16k_to_the_end() {
    let rig = rig(FixedBody {
        body: silent_mp3(FRAMES),
        icy_metaint: None,
    });

    rig.player.play("local_mp3").unwrap();
    assert_eq!(rig.player.state(), PlayerState::Playing);
    assert_eq!(rig.background.get(), BackgroundAudioMode::Radio);
    assert!(rig.sink.is_enabled());

    let per_frame = resampled_len(1152, 44_100, 16_000);
    wait_for("all frames played", Duration::from_secs(5), || {
        let status = rig.player.status();
        status.end_reason == Some(SessionEndReason::Eof)
            && status.frames_decoded >= (FRAMES - 2) as u64
            && rig.sink.total_samples() == status.frames_decoded as usize * per_frame
    });
    // Let any straggling frame reach the sink before taking the final count.
    thread::sleep(Duration::from_millis(200));

    let status = rig.player.status();
    let expected = status.frames_decoded as usize * per_frame;
    assert_eq!(status.codec, Some(StreamCodec::Mp3));
    assert_eq!(status.source_rate_hz, Some(44_100));
    assert_eq!(status.source_channels, Some(1));
    assert_eq!(status.bytes_fetched, (FRAMES * FRAME_LEN) as u64);
    assert_eq!(status.end_reason, Some(SessionEndReason::Eof));
    // A finished stream is not a failure.
    assert_eq!(rig.player.state(), PlayerState::Playing);
    assert_eq!(rig.sink.total_samples(), expected);
    assert!(rig.sink.chunks().iter().all(|c| c.len() <= 1_024));

    rig.player.stop();
    assert_eq!(rig.player.state(), PlayerState::Idle);
    assert_eq!(rig.background.get(), BackgroundAudioMode::None);
    assert!(!rig.sink.is_enabled());
}

#[test]
fn icy_metadata_is_stripped_and_title_published() {
    let audio = silent_mp3(FRAMES);
    let rig = rig(FixedBody {
        body: with_icy_blocks(&audio, 1_000, "Morning News"),
        icy_metaint: Some(1_000),
    });

    rig.player.play("local_mp3").unwrap();
    wait_for("end of stream", Duration::from_secs(5), || {
        rig.player.status().end_reason == Some(SessionEndReason::Eof)
    });
    let status = rig.player.status();
    assert_eq!(status.stream_title.as_deref(), Some("Morning News"));
    assert_eq!(status.bytes_fetched, audio.len() as u64);
    rig.player.stop();
}

#[test]
fn zero_volume_emits_only_silence() {
    let rig = rig(FixedBody {
        body: silent_mp3(FRAMES),
        icy_metaint: None,
    });
    rig.player.set_volume(0);
    rig.player.play("local_mp3").unwrap();
    wait_for("output", Duration::from_secs(5), || rig.sink.total_samples() > 0);
    rig.player.stop();
    assert!(rig.sink.chunks().iter().flatten().all(|&s| s == 0));
}

#[test]
fn speaking_assistant_holds_back_output() {
    let rig = rig(FixedBody {
        body: silent_mp3(FRAMES),
        icy_metaint: None,
    });
    rig.activity.set(DeviceActivity::Speaking);
    rig.player.play("local_mp3").unwrap();

    wait_for("ducking", Duration::from_secs(5), || rig.player.status().ducked_ticks >= 5);
    assert_eq!(rig.sink.total_samples(), 0);

    rig.activity.set(DeviceActivity::Idle);
    wait_for("output after ducking", Duration::from_secs(5), || {
        rig.sink.total_samples() > 0
    });
    rig.player.stop();
}

#[test]
fn replaying_replaces_the_session() {
    let rig = rig(FixedBody {
        body: silent_mp3(FRAMES),
        icy_metaint: None,
    });
    rig.player.play("local_mp3").unwrap();
    rig.player.play("local_mp3").unwrap();
    assert_eq!(rig.player.state(), PlayerState::Playing);
    assert_eq!(
        rig.player.current_station().map(|s| s.id),
        Some("local_mp3".to_string())
    );
    rig.player.stop();
    rig.player.stop();
    assert_eq!(rig.player.state(), PlayerState::Idle);
    assert!(rig.player.current_station().is_none());
}
