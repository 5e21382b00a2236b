//! Read-only station directory.

use std::collections::BTreeMap;

use radio_types::{DeclaredFormat, StationDescriptor};

/// Station lookup table built once at startup.
///
/// There is no mutation API: extra stations are supplied to
/// [`StationDirectory::with_stations`] before the directory is shared.
#[derive(Clone, Debug, Default)]
pub struct StationDirectory {
    stations: BTreeMap<String, StationDescriptor>,
}

fn station(
    id: &str,
    name: &str,
    url: &str,
    genre: &str,
    bitrate_kbps: u32,
    format: DeclaredFormat,
) -> StationDescriptor {
    StationDescriptor {
        id: id.to_string(),
        display_name: name.to_string(),
        url: url.to_string(),
        genre: genre.to_string(),
        bitrate_kbps,
        declared_format: format,
    }
}

/// Stations shipped with the player.
pub fn builtin_stations() -> Vec<StationDescriptor> {
    use DeclaredFormat::{Aac, Mp3};
    const BBC: &str = "http://stream.live.vc.bbcmedia.co.uk/bbc_world_service";
    vec![
        station(
            "vov1",
            "VOV1 - Đài Tiếng nói Việt Nam",
            "http://media.kythuatvov.vn:1936/live/VOV1.sdp/playlist.m3u8",
            "news",
            48,
            Aac,
        ),
        station(
            "vov2",
            "VOV2 - Kênh Đời sống",
            "http://media.kythuatvov.vn:1936/live/VOV2.sdp/playlist.m3u8",
            "lifestyle",
            48,
            Aac,
        ),
        station(
            "vov3",
            "VOV3 - Kênh Âm nhạc",
            "http://media.kythuatvov.vn:1936/live/VOV3.sdp/playlist.m3u8",
            "music",
            48,
            Aac,
        ),
        station(
            "vov5",
            "VOV5 - Kênh Dân tộc",
            "http://media.kythuatvov.vn:1936/live/VOV5.sdp/playlist.m3u8",
            "ethnic",
            48,
            Aac,
        ),
        station(
            "voh",
            "VOH 99.9MHz - Đài TPHCM",
            "http://mediatech.vncdn.vn/voh/voh.m3u8",
            "news",
            128,
            Mp3,
        ),
        station(
            "voh_fm95",
            "VOH FM 95.6MHz - Giao thông",
            "http://mediatech.vncdn.vn/voh/vohfm95.6.m3u8",
            "traffic",
            128,
            Mp3,
        ),
        station(
            "hnr",
            "VOV Giao thông Hà Nội",
            "http://media.cntv.vn:1935/live/vov_giao_thong_hn/playlist.m3u8",
            "traffic",
            96,
            Mp3,
        ),
        station(
            "nrg",
            "NRG Radio - Nhạc trẻ",
            "http://stream.nrg.com.vn:1935/radio/nrgstream_source/playlist.m3u8",
            "music",
            128,
            Aac,
        ),
        station("bbc", "BBC World Service", BBC, "news", 128, Mp3),
        station("test_mp3", "Test Radio (BBC MP3)", BBC, "test", 128, Mp3),
    ]
}

impl StationDirectory {
    /// Directory seeded with [`builtin_stations`].
    pub fn builtin() -> Self {
        Self::with_stations(builtin_stations())
    }

    /// Build a directory from `stations`; later entries replace earlier ones
    /// with the same id.
    pub fn with_stations(stations: impl IntoIterator<Item = StationDescriptor>) -> Self {
        let stations = stations
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Self { stations }
    }

    /// Builtin stations overlaid with `extra`.
    pub fn builtin_with(extra: impl IntoIterator<Item = StationDescriptor>) -> Self {
        Self::with_stations(builtin_stations().into_iter().chain(extra))
    }

    pub fn lookup(&self, id: &str) -> Option<&StationDescriptor> {
        self.stations.get(id)
    }

    /// All stations ordered by id.
    pub fn list(&self) -> Vec<StationDescriptor> {
        self.stations.values().cloned().collect()
    }

    pub fn by_genre(&self, genre: &str) -> Vec<StationDescriptor> {
        self.stations
            .values()
            .filter(|s| s.genre.eq_ignore_ascii_case(genre))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// One-line listing for tool descriptions and `--help` style output.
    pub fn describe(&self) -> String {
        let entries: Vec<String> = self
            .stations
            .values()
            .map(|s| format!("{} ({})", s.id, s.display_name))
            .collect();
        format!("Available stations: {}", entries.join(", "))
    }
}
