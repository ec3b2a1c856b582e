//! Cadence - Desktop Output
//!
//! Desktop implementations of the engine's seams:
//! - [`CpalDeviceFactory`] / [`CpalDevice`]: cpal output streams in Standard,
//!   Exclusive and ASIO modes
//! - [`FileOpener`] / [`FileSource`]: Symphonia file decoding
//! - device and backend enumeration for settings screens
//!
//! ```rust,no_run
//! use cadence_output::{CpalDeviceFactory, FileOpener};
//! use cadence_playback::{Engine, EngineConfig, Playlist};
//! use std::sync::Arc;
//!
//! let config = EngineConfig::load(None)?;
//! let engine = Engine::new(config, Box::new(CpalDeviceFactory::new()), Arc::new(FileOpener::new()))?;
//!
//! let item = FileOpener::probe(1, "music/track01.flac")?;
//! engine.play_from(Arc::new(Playlist::new(1, "cli", vec![item])), 1)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
mod cpal_device;
pub mod device;
mod error;
mod file_source;

pub use backend::{list_available_backends, AudioBackend};
pub use cpal_device::{CpalDevice, CpalDeviceFactory};
pub use device::{default_device, find_device_by_name, list_devices, AudioDeviceInfo};
pub use error::{OutputError, Result};
pub use file_source::{FileOpener, FileSource};
