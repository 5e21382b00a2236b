use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use radiod::cli::{Args, Command};
use radiod::config::RadiodConfig;
use radiod::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,radiod=info,radio_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = RadiodConfig::from_args(&args)?;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let mut interrupted = false;
    ctrlc::set_handler(move || {
        if interrupted {
            std::process::exit(130);
        }
        interrupted = true;
        let _ = shutdown_tx.try_send(());
    })?;

    match args.cmd.clone().unwrap_or(Command::Listen) {
        Command::Stations { genre } => runtime::run_stations(&config, genre.as_deref()),
        Command::Play { station_id } => runtime::run_play(&config, &station_id, shutdown_rx),
        Command::Listen => runtime::run_listen(&config, shutdown_rx),
    }
}
