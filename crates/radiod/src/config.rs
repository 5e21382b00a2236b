//! Daemon configuration.
//!
//! An optional TOML file supplies defaults; command-line flags win over it.
//!
//! ```toml
//! http_bind = "0.0.0.0:5580"
//! device = "USB"
//! volume = 60
//!
//! [engine]
//! hls_max_retries = 8
//!
//! [[stations]]
//! id = "local"
//! name = "Local test stream"
//! url = "http://127.0.0.1:8000/stream.mp3"
//! format = "mp3"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use radio_player::EngineConfig;
use radio_types::StationDescriptor;
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0:5580";

/// Contents of the TOML config file; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub http_bind: Option<String>,
    pub device: Option<String>,
    pub volume: Option<u8>,
    pub engine: EngineConfig,
    /// Added to the built-in directory; a matching id replaces the built-in entry.
    pub stations: Vec<StationDescriptor>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct RadiodConfig {
    pub http_bind: SocketAddr,
    pub device: Option<String>,
    pub buffer_ms: u32,
    pub engine: EngineConfig,
    pub stations: Vec<StationDescriptor>,
}

impl RadiodConfig {
    /// Merge the config file (if any) with command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match args.config.as_deref() {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    pub fn merge(file: FileConfig, args: &Args) -> Result<Self> {
        let http_bind = match (args.http_bind, file.http_bind.as_deref()) {
            (Some(addr), _) => addr,
            (None, Some(raw)) => raw.parse().with_context(|| format!("parse http_bind {raw}"))?,
            (None, None) => DEFAULT_HTTP_BIND
                .parse()
                .context("parse default http bind")?,
        };

        let mut engine = file.engine;
        if let Some(volume) = args.volume.or(file.volume) {
            engine.default_volume = volume.min(100);
        }

        Ok(Self {
            http_bind,
            device: normalize_device_name(args.device.clone().or(file.device)),
            buffer_ms: args.buffer_ms,
            engine,
            stations: file.stations,
        })
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use radio_types::DeclaredFormat;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["radiod"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn file_sections_are_parsed() {
        let file = FileConfig::parse(
            r#"
            http_bind = "127.0.0.1:9000"
            volume = 55

            [engine]
            hls_max_retries = 8
            prebuffer_bytes = 8000

            [[stations]]
            id = "local"
            name = "Local"
            url = "http://127.0.0.1:8000/stream.mp3"
            format = "mp3"
            "#,
        )
        .unwrap();
        assert_eq!(file.engine.hls_max_retries, 8);
        assert_eq!(file.engine.prebuffer_bytes, 8000);
        assert_eq!(file.engine.target_rate_hz, 16_000);
        assert_eq!(file.stations.len(), 1);
        assert_eq!(file.stations[0].display_name, "Local");
        assert_eq!(file.stations[0].declared_format, DeclaredFormat::Mp3);

        let cfg = RadiodConfig::merge(file, &args(&["listen"])).unwrap();
        assert_eq!(cfg.http_bind.port(), 9000);
        assert_eq!(cfg.engine.default_volume, 55);
    }

    #[test]
    fn flags_override_the_file() {
        let raw = "http_bind = \"127.0.0.1:9000\"\nvolume = 55\ndevice = \"hdmi\"";
        let file = FileConfig::parse(raw).unwrap();
        let flags = args(&[
            "--http-bind",
            "127.0.0.1:7000",
            "--volume",
            "20",
            "--device",
            " USB ",
            "listen",
        ]);
        let cfg = RadiodConfig::merge(file, &flags).unwrap();
        assert_eq!(cfg.http_bind.port(), 7000);
        assert_eq!(cfg.engine.default_volume, 20);
        assert_eq!(cfg.device.as_deref(), Some("USB"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = RadiodConfig::merge(FileConfig::parse("").unwrap(), &args(&[])).unwrap();
        assert_eq!(cfg.http_bind, DEFAULT_HTTP_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.engine, EngineConfig::default());
        assert!(cfg.device.is_none());
        assert!(cfg.stations.is_empty());
    }

    #[test]
    fn station_format_labels_are_case_insensitive() {
        let file = FileConfig::parse(
            r#"
            [[stations]]
            id = "upper"
            name = "Upper"
            url = "http://127.0.0.1:8000/a"
            format = "AAC"

            [[stations]]
            id = "odd"
            name = "Odd"
            url = "http://127.0.0.1:8000/b"
            format = "ogg"
            "#,
        )
        .unwrap();
        assert_eq!(file.stations[0].declared_format, DeclaredFormat::Aac);
        assert_eq!(file.stations[1].declared_format, DeclaredFormat::Unknown);
    }

    #[test]
    fn bad_bind_is_reported() {
        let file = FileConfig::parse("http_bind = \"not an address\"").unwrap();
        assert!(RadiodConfig::merge(file, &args(&[])).is_err());
    }
}
