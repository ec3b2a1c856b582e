//! Command-line interface definitions.
//!
//! Only the `clap` surface lives here; wiring is in `main.rs`.

use std::path::PathBuf;

use cadence_playback::OutputMode;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "cadence-cli")]
#[command(about = "Play audio files through the Cadence engine", long_about = None)]
pub struct Args {
    /// Audio files to play, in order
    #[arg(required_unless_present = "list_devices")]
    pub files: Vec<PathBuf>,

    /// Configuration file (TOML); CADENCE_* environment variables also apply
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Output device by exact name (see --list-devices)
    #[arg(long)]
    pub device: Option<String>,

    /// Crossfade between tracks
    #[arg(long)]
    pub crossfade: bool,

    /// Random play order
    #[arg(long)]
    pub shuffle: bool,

    /// Repeat the playlist
    #[arg(long)]
    pub repeat: bool,

    /// Master volume (0.0 - 1.0)
    #[arg(long)]
    pub volume: Option<f32>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Standard,
    Exclusive,
    Asio,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Standard => OutputMode::Standard,
            ModeArg::Exclusive => OutputMode::Exclusive,
            ModeArg::Asio => OutputMode::Asio,
        }
    }
}
