use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "radiod", version = VERSION, about = "Internet radio streaming daemon")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// TOML config file ([engine] overrides, [[stations]], http_bind, device, volume)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// HTTP API bind address, e.g. 0.0.0.0:5580
    #[arg(long)]
    pub http_bind: Option<SocketAddr>,

    /// Initial volume in percent (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Audio queued ahead of the output device, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub buffer_ms: u32,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the station directory
    Stations {
        /// Only stations of this genre (case-insensitive)
        #[arg(long)]
        genre: Option<String>,
    },

    /// Play one station until Ctrl-C
    Play {
        /// Station id, e.g. vov1
        station_id: String,
    },

    /// Serve the HTTP control API (the default)
    Listen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_takes_station_id() {
        let args = Args::try_parse_from(["radiod", "--volume", "40", "play", "vov1"]).unwrap();
        assert_eq!(
            args.cmd,
            Some(Command::Play {
                station_id: "vov1".to_string()
            })
        );
        assert_eq!(args.volume, Some(40));
    }

    #[test]
    fn volume_above_100_is_rejected() {
        assert!(Args::try_parse_from(["radiod", "--volume", "101", "listen"]).is_err());
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let args = Args::try_parse_from(["radiod", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
