//! Value types shared by the radio engine and the control daemon.
//!
//! Everything here is plain data: serde-serialisable, cheap to clone, free of
//! any threading or I/O concerns.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the radio player.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// No session is active.
    #[default]
    Idle,
    /// A station was requested and the stream is being opened.
    Connecting,
    /// The pipeline workers are running.
    Playing,
    /// The last session failed to open or hit an unrecoverable fault.
    Error,
}

impl PlayerState {
    /// Lowercase label used in logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Connecting => "connecting",
            PlayerState::Playing => "playing",
            PlayerState::Error => "error",
        }
    }
}

/// Codec a station advertises in its directory entry.
///
/// Deserialises through [`DeclaredFormat::from_label`], so `"MP3"` or
/// `"m4a"` in a station file are accepted and unrecognised labels become
/// `Unknown`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum DeclaredFormat {
    Mp3,
    Aac,
    #[default]
    Unknown,
}

impl DeclaredFormat {
    /// Parse a loose format label (`"mp3"`, `"aac"`, `"m4a"`), case-insensitive.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "mp3" => DeclaredFormat::Mp3,
            "aac" | "m4a" => DeclaredFormat::Aac,
            _ => DeclaredFormat::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredFormat::Mp3 => "mp3",
            DeclaredFormat::Aac => "aac",
            DeclaredFormat::Unknown => "unknown",
        }
    }
}

impl From<String> for DeclaredFormat {
    fn from(label: String) -> Self {
        DeclaredFormat::from_label(&label)
    }
}

/// Codec actually selected for a session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamCodec {
    Mp3,
    Aac,
}

impl StreamCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamCodec::Mp3 => "mp3",
            StreamCodec::Aac => "aac",
        }
    }
}

/// Immutable description of a radio station.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationDescriptor {
    /// Stable lookup key (for example `vov1`).
    pub id: String,
    /// Human-readable station name.
    #[serde(alias = "name")]
    pub display_name: String,
    /// Stream or HLS playlist URL.
    pub url: String,
    /// Free-form genre label used for grouping.
    #[serde(default)]
    pub genre: String,
    /// Nominal bitrate in kbit/s.
    #[serde(default, alias = "bitrate")]
    pub bitrate_kbps: u32,
    /// Codec the station is known to carry.
    #[serde(default, alias = "format")]
    pub declared_format: DeclaredFormat,
}

/// Station listing payload (`{stations, total}`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationListing {
    pub stations: Vec<StationDescriptor>,
    pub total: usize,
}

impl StationListing {
    pub fn new(stations: Vec<StationDescriptor>) -> Self {
        let total = stations.len();
        Self { stations, total }
    }
}

/// Reason a streaming session's workers ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// A non-HLS body was exhausted.
    Eof,
    /// Transport or decoder failure.
    Error,
    /// The HLS playlist stopped advancing.
    Stalled,
    /// The session was stopped by the controller.
    Stopped,
}

/// High-level activity of the voice assistant sharing the audio output.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceActivity {
    #[default]
    Idle,
    Listening,
    Speaking,
    Connecting,
}

impl DeviceActivity {
    /// Whether background audio must be held back while in this activity.
    pub fn pauses_background(self) -> bool {
        matches!(
            self,
            DeviceActivity::Listening | DeviceActivity::Speaking | DeviceActivity::Connecting
        )
    }

    pub fn to_u8(self) -> u8 {
        match self {
            DeviceActivity::Idle => 0,
            DeviceActivity::Listening => 1,
            DeviceActivity::Speaking => 2,
            DeviceActivity::Connecting => 3,
        }
    }

    /// Inverse of [`DeviceActivity::to_u8`]; unknown values map to `Idle`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceActivity::Listening,
            2 => DeviceActivity::Speaking,
            3 => DeviceActivity::Connecting,
            _ => DeviceActivity::Idle,
        }
    }
}

/// Which background audio source currently owns the output.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundAudioMode {
    #[default]
    None,
    Radio,
    YoutubeStream,
    Music,
    Podcast,
}

impl BackgroundAudioMode {
    pub fn to_u8(self) -> u8 {
        match self {
            BackgroundAudioMode::None => 0,
            BackgroundAudioMode::Radio => 1,
            BackgroundAudioMode::YoutubeStream => 2,
            BackgroundAudioMode::Music => 3,
            BackgroundAudioMode::Podcast => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => BackgroundAudioMode::Radio,
            2 => BackgroundAudioMode::YoutubeStream,
            3 => BackgroundAudioMode::Music,
            4 => BackgroundAudioMode::Podcast,
            _ => BackgroundAudioMode::None,
        }
    }
}

/// Compact view of the current station, as reported in status payloads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentStation {
    pub id: String,
    pub name: String,
    pub genre: String,
    pub format: DeclaredFormat,
    pub bitrate: u32,
}

impl From<&StationDescriptor> for CurrentStation {
    fn from(station: &StationDescriptor) -> Self {
        Self {
            id: station.id.clone(),
            name: station.display_name.clone(),
            genre: station.genre.clone(),
            format: station.declared_format,
            bitrate: station.bitrate_kbps,
        }
    }
}

/// Point-in-time status of the radio player.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RadioStatus {
    pub state: PlayerState,
    pub current_station: Option<CurrentStation>,
    /// Volume in percent (0-100).
    pub volume: u8,
    pub background_mode: BackgroundAudioMode,
    /// Media URL after playlist resolution.
    pub stream_url: Option<String>,
    pub codec: Option<StreamCodec>,
    /// Source sample rate reported by the decoder.
    pub source_rate_hz: Option<u32>,
    pub source_channels: Option<u16>,
    /// Latest ICY `StreamTitle`, when the server sends one.
    pub stream_title: Option<String>,
    pub bytes_fetched: u64,
    pub segments_fetched: u64,
    pub frames_decoded: u64,
    /// Bytes dropped while resynchronising the frame parser.
    pub resync_discards: u64,
    pub output_underruns: u64,
    /// Output ticks skipped while the assistant held the audio.
    pub ducked_ticks: u64,
    pub end_reason: Option<SessionEndReason>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_format_parses_loose_labels() {
        assert_eq!(DeclaredFormat::from_label("MP3"), DeclaredFormat::Mp3);
        assert_eq!(DeclaredFormat::from_label("m4a"), DeclaredFormat::Aac);
        assert_eq!(DeclaredFormat::from_label(" aac "), DeclaredFormat::Aac);
        assert_eq!(DeclaredFormat::from_label("ogg"), DeclaredFormat::Unknown);
    }

    #[test]
    fn declared_format_deserialises_loose_labels() {
        let parse = |raw: &str| serde_json::from_str::<DeclaredFormat>(raw).unwrap();
        assert_eq!(parse(r#""MP3""#), DeclaredFormat::Mp3);
        assert_eq!(parse(r#""M4A""#), DeclaredFormat::Aac);
        assert_eq!(parse(r#""ogg""#), DeclaredFormat::Unknown);
        assert_eq!(serde_json::to_string(&DeclaredFormat::Aac).unwrap(), r#""aac""#);
    }

    #[test]
    fn activity_roundtrips_through_u8() {
        for activity in [
            DeviceActivity::Idle,
            DeviceActivity::Listening,
            DeviceActivity::Speaking,
            DeviceActivity::Connecting,
        ] {
            assert_eq!(DeviceActivity::from_u8(activity.to_u8()), activity);
        }
        assert_eq!(DeviceActivity::from_u8(200), DeviceActivity::Idle);
    }

    #[test]
    fn only_idle_lets_background_audio_through() {
        assert!(!DeviceActivity::Idle.pauses_background());
        assert!(DeviceActivity::Listening.pauses_background());
        assert!(DeviceActivity::Speaking.pauses_background());
        assert!(DeviceActivity::Connecting.pauses_background());
    }

    #[test]
    fn station_accepts_short_field_aliases() {
        let json = r#"{"id":"x","name":"X FM","url":"http://x/","format":"aac","bitrate":64}"#;
        let station: StationDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(station.display_name, "X FM");
        assert_eq!(station.declared_format, DeclaredFormat::Aac);
        assert_eq!(station.bitrate_kbps, 64);
        assert_eq!(station.genre, "");
    }

    #[test]
    fn status_serializes_state_in_snake_case() {
        let status = RadioStatus {
            state: PlayerState::Playing,
            ..RadioStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "playing");
        assert!(json["current_station"].is_null());
    }
}
