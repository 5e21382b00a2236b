//! Daemon runtime: wires the engine to the sound card and the control API.

use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use radio_player::{
    AudioSink, CpalSink, CpalSinkConfig, RadioPlayer, SharedActivity, SharedBackgroundMode,
    StationDirectory, UreqTransport,
};
use radio_types::StationDescriptor;

use crate::config::RadiodConfig;
use crate::http_api::{self, ControlSurface};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    radio_player::sink::list_devices()
}

pub fn directory(config: &RadiodConfig) -> StationDirectory {
    StationDirectory::builtin_with(config.stations.iter().cloned())
}

/// Print the station directory, optionally filtered by genre.
pub fn run_stations(config: &RadiodConfig, genre: Option<&str>) -> Result<()> {
    let dir = directory(config);
    let stations = match genre {
        Some(genre) => dir.by_genre(genre),
        None => dir.list(),
    };
    for line in station_lines(&stations) {
        println!("{line}");
    }
    Ok(())
}

fn station_lines(stations: &[StationDescriptor]) -> Vec<String> {
    stations
        .iter()
        .map(|s| {
            format!(
                "{:<10} {:<40} {:<8} {:>4} kbps  {}",
                s.id,
                s.display_name,
                s.genre,
                s.bitrate_kbps,
                s.declared_format.as_str()
            )
        })
        .collect()
}

fn open_sink(config: &RadiodConfig) -> Result<Arc<CpalSink>> {
    let sink = CpalSink::open(CpalSinkConfig {
        device: config.device.clone(),
        source_rate_hz: config.engine.target_rate_hz,
        buffer_ms: config.buffer_ms,
        ..CpalSinkConfig::default()
    })
    .context("open audio output")?;
    tracing::info!(
        device = sink.device_name(),
        device_rate_hz = sink.device_rate(),
        "audio device selected"
    );
    Ok(Arc::new(sink))
}

fn build_player(
    config: &RadiodConfig,
    activity: SharedActivity,
) -> Result<(RadioPlayer, Arc<CpalSink>)> {
    let sink = open_sink(config)?;
    let player = RadioPlayer::new(
        directory(config),
        Arc::new(UreqTransport::new(config.engine.connect_timeout())),
        sink.clone() as Arc<dyn AudioSink>,
        Arc::new(activity),
        Arc::new(SharedBackgroundMode::new()),
        config.engine.clone(),
    );
    Ok((player, sink))
}

fn shut_down(player: &RadioPlayer, sink: &CpalSink) {
    tracing::info!("shutting down");
    player.stop();
    tracing::info!(
        device = sink.device_name(),
        underruns = sink.underruns(),
        "audio output closed"
    );
}

/// Play one station until `shutdown` fires.
pub fn run_play(config: &RadiodConfig, station_id: &str, shutdown: Receiver<()>) -> Result<()> {
    let (player, sink) = build_player(config, SharedActivity::new())?;
    player
        .play(station_id)
        .with_context(|| format!("play {station_id}"))?;
    let _ = shutdown.recv();
    shut_down(&player, &sink);
    Ok(())
}

/// Serve the HTTP control API until `shutdown` fires.
pub fn run_listen(config: &RadiodConfig, shutdown: Receiver<()>) -> Result<()> {
    let activity = SharedActivity::new();
    let (player, sink) = build_player(config, activity.clone())?;
    let player = Arc::new(player);
    tracing::info!(stations = %player.describe_stations(), "station directory");

    // The server thread blocks on accept; it is torn down with the process.
    let _http = http_api::spawn_http_server(
        config.http_bind,
        ControlSurface::new(player.clone(), activity),
    )?;

    let _ = shutdown.recv();
    shut_down(&player, &sink);
    Ok(())
}
