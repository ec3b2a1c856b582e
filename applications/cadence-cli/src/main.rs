//! Cadence CLI - plays a list of files through the engine and prints the
//! transport snapshot and output levels every 100 ms until playback stops.

mod cli;

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadence_output::{list_devices, AudioBackend, CpalDeviceFactory, FileOpener};
use cadence_playback::{
    Engine, EngineConfig, EngineEvent, LevelSample, OutputMode, OutputSnapshot, OutputState,
    PlaybackItem, Playlist,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = args.mode {
        config.output.mode = mode.into();
    }
    if let Some(device) = args.device.clone() {
        config.output.device = device;
    }

    if args.list_devices {
        return print_devices(config.output.mode);
    }

    config.playback.crossfade |= args.crossfade;
    config.playback.random_play |= args.shuffle;
    config.playback.repeat_playlist |= args.repeat;
    if let Some(volume) = args.volume {
        config.playback.set_volume(volume);
    }

    let items = probe_files(&args.files);
    let Some(first) = items.first().map(PlaybackItem::id) else {
        bail!("none of the given files could be opened");
    };
    let playlist = Arc::new(Playlist::new(1, "command line", items));

    let engine = Engine::new(
        config,
        Box::new(CpalDeviceFactory::new()),
        Arc::new(FileOpener::new()),
    )
    .context("starting engine")?;

    let display = Arc::new(Mutex::new(LevelSample::default()));
    let meter_display = Arc::clone(&display);
    let _meter = engine.spawn_vu_meter(true, move |sample| {
        *meter_display.lock().unwrap_or_else(PoisonError::into_inner) = sample;
    })?;

    engine.play_from(Arc::clone(&playlist), first)?;

    let mut status_failed = false;
    loop {
        thread::sleep(TICK);

        for event in engine.drain_events() {
            report(&event, &playlist);
        }

        let snapshot = engine.current_playing();
        let levels = *display.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = print_status(&snapshot, levels) {
            if !status_failed {
                tracing::debug!("Cannot write status line: {}", e);
                status_failed = true;
            }
        }

        if snapshot.state == OutputState::Stopped {
            break;
        }
    }
    eprintln!();

    if let Some(err) = engine.take_error() {
        return Err(err).context("playback stopped");
    }
    Ok(())
}

fn print_devices(mode: OutputMode) -> Result<()> {
    let backend = AudioBackend::for_mode(mode);
    let devices = list_devices(backend).with_context(|| format!("listing {} devices", backend.name()))?;
    if devices.is_empty() {
        println!("No {} output devices found", backend.name());
    }
    for (i, device) in devices.iter().enumerate() {
        let marker = if device.is_default { "*" } else { " " };
        let range = device
            .sample_rate_range
            .map(|(min, max)| format!(" ({}-{} Hz)", min, max))
            .unwrap_or_default();
        println!(
            "{}#{}: {} [{} ch @ {} Hz{}]",
            marker, i, device.name, device.channels, device.sample_rate, range
        );
    }
    Ok(())
}

/// Playlist items for the files that open, numbered from 1
fn probe_files(files: &[impl AsRef<Path>]) -> Vec<PlaybackItem> {
    let mut items = Vec::with_capacity(files.len());
    for path in files {
        let path = path.as_ref();
        let id = items.len() as u64 + 1;
        match FileOpener::probe(id, path) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!(path = %path.display(), "Skipping file: {}", e),
        }
    }
    items
}

fn report(event: &EngineEvent, playlist: &Playlist) {
    match event {
        EngineEvent::TrackChanged { item_id, .. } => {
            if let Some(item) = playlist.get(*item_id) {
                eprintln!();
                tracing::info!("Now playing {}", item.media());
            }
        }
        EngineEvent::Error { message } => {
            eprintln!();
            tracing::warn!("{}", message);
        }
        _ => {}
    }
}

fn print_status(snapshot: &OutputSnapshot, levels: LevelSample) -> io::Result<()> {
    let duration = snapshot
        .item
        .as_ref()
        .and_then(PlaybackItem::duration)
        .map(format_time)
        .unwrap_or_else(|| "--:--".into());
    let title = snapshot
        .stream_title
        .as_deref()
        .map(|t| format!(" {}", t))
        .unwrap_or_default();

    let mut stderr = io::stderr().lock();
    write!(
        stderr,
        "\r{:<7} #{:<3} {} / {}  L {} R {}{}   ",
        format!("{:?}", snapshot.state),
        snapshot.item_id(),
        format_time(snapshot.position),
        duration,
        meter(levels.left),
        meter(levels.right),
        title,
    )?;
    stderr.flush()
}

fn format_time(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Twenty-segment bar for a level in [0, 1]
fn meter(level: f32) -> String {
    let lit = (level.clamp(0.0, 1.0) * 20.0).round() as usize;
    format!("{}{}", "#".repeat(lit), ".".repeat(20 - lit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(0)), "00:00");
        assert_eq!(format_time(Duration::from_millis(125_900)), "02:05");
    }

    #[test]
    fn test_meter() {
        assert_eq!(meter(0.0), ".".repeat(20));
        assert_eq!(meter(1.5), "#".repeat(20));
        assert_eq!(meter(0.5).matches('#').count(), 10);
    }

    #[test]
    fn test_print_status_succeeds() {
        let snapshot = OutputSnapshot {
            state: OutputState::Playing,
            item: Some(PlaybackItem::new(3, "a.flac", Duration::from_secs(90))),
            position: Duration::from_secs(61),
            stream_title: None,
        };
        assert!(print_status(&snapshot, LevelSample::new(0.5, 0.25)).is_ok());
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let items = probe_files(&["/nonexistent/a.flac", "/nonexistent/b.flac"]);
        assert!(items.is_empty());
    }
}
