//! Cadence - Playback Engine
//!
//! Platform-agnostic audio playback engine.
//!
//! This crate provides:
//! - Transport state machine (Stopped / Playing / Paused)
//! - Crossfade, fade-out and fade-to-next transitions
//! - Playlist cursor (repeat track, repeat playlist, random play)
//! - Mixing stage: replay gain, 9-band EQ, limiter, pitch, master volume
//! - Lock-free level monitor and VU meter ballistics
//! - A dedicated render thread that drives an output device, with sources
//!   opened on a background loader thread
//!
//! # Architecture
//!
//! `cadence-playback` has no OS audio dependency. The output device and the
//! decoder are reached through two pairs of traits:
//! - [`DeviceFactory`] / [`DeviceBackend`] for the audio sink
//! - [`MediaOpener`] / [`AudioSource`] for decoded PCM
//!
//! Desktop implementations (cpal, symphonia) live in `cadence-output`.
//!
//! # Example
//!
//! ```rust,no_run
//! use cadence_playback::{
//!     AudioSource, DeviceBackend, DeviceError, DeviceFactory, DeviceFormat, Engine,
//!     EngineConfig, OutputConfig, OutputMode, PlaybackItem, Playlist, Result, ToneSource,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Null(DeviceFormat);
//!
//! impl DeviceBackend for Null {
//!     fn format(&self) -> DeviceFormat { self.0 }
//!     fn mode(&self) -> OutputMode { OutputMode::Standard }
//!     fn write(&mut self, _: &[f32]) -> std::result::Result<(), DeviceError> { Ok(()) }
//!     fn flush(&mut self) {}
//!     fn close(&mut self) {}
//! }
//!
//! struct NullFactory;
//!
//! impl DeviceFactory for NullFactory {
//!     fn open(
//!         &mut self,
//!         _: &OutputConfig,
//!         format: DeviceFormat,
//!     ) -> std::result::Result<Box<dyn DeviceBackend>, DeviceError> {
//!         Ok(Box::new(Null(format)))
//!     }
//! }
//!
//! let opener = Arc::new(|item: &PlaybackItem| -> Result<Box<dyn AudioSource>> {
//!     Ok(Box::new(ToneSource::new(440.0, 44100, item.duration())))
//! });
//! let engine = Engine::new(EngineConfig::default(), Box::new(NullFactory), opener)?;
//!
//! let playlist = Arc::new(Playlist::new(
//!     1,
//!     "tones",
//!     vec![
//!         PlaybackItem::new(1, "tone:440", Duration::from_secs(10)),
//!         PlaybackItem::new(2, "tone:440", Duration::from_secs(8)),
//!     ],
//! ));
//! engine.set_crossfade(true);
//! engine.play_from(playlist, 1)?;
//!
//! let snapshot = engine.current_playing();
//! println!("{:?} item {} at {:?}", snapshot.state, snapshot.item_id(), snapshot.position);
//! # Ok::<(), cadence_playback::EngineError>(())
//! ```

pub mod bling;
pub mod config;
pub mod crossfade;
pub mod cursor;
pub mod device;
mod engine;
pub mod eq;
mod error;
pub mod events;
pub mod gain;
pub mod levels;
mod loader;
pub mod mixer;
pub mod pitch;
mod render;
pub mod settings;
pub mod source;
pub mod transport;
pub mod types;
pub mod volume;

// Public exports
pub use crate::config::{
    AsioSettings, EngineConfig, ExclusiveSettings, MixParams, OutputConfig, OutputMode,
};
pub use crossfade::TransitionKind;
pub use cursor::{Playlist, PlaylistCursor, PlaylistId};
pub use device::{DeviceBackend, DeviceFactory, DeviceFormat};
pub use engine::Engine;
pub use error::{DeviceError, EngineError, Result};
pub use events::{EngineEvent, PlaylistListener};
pub use gain::{GainMode, LimiterMode};
pub use levels::{LevelMonitor, VuMeter, VuMeterThread};
pub use settings::{PitchRange, PlaybackSettings};
pub use source::{AudioSource, MediaOpener, ToneSource};
pub use types::{GainInfo, ItemId, LevelSample, OutputSnapshot, OutputState, PlaybackItem};
