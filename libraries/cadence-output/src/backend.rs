// cadence-output/src/backend.rs
//
// Host API selection: the platform default (WASAPI, CoreAudio, ALSA) or ASIO

use crate::error::{OutputError, Result};
use cadence_playback::OutputMode;
use serde::{Deserialize, Serialize};

/// Audio backend / driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// System default backend (WASAPI on Windows, CoreAudio on macOS, ALSA on Linux)
    Default,

    /// ASIO dedicated driver (Windows, `asio` feature)
    Asio,
}

impl AudioBackend {
    /// Backend serving an output mode
    ///
    /// Standard and Exclusive both run on the platform host; Exclusive only
    /// changes how the stream is configured.
    pub fn for_mode(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Standard | OutputMode::Exclusive => Self::Default,
            OutputMode::Asio => Self::Asio,
        }
    }

    /// Get human-readable name of backend
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => {
                #[cfg(target_os = "windows")]
                return "WASAPI";

                #[cfg(target_os = "macos")]
                return "CoreAudio";

                #[cfg(target_os = "linux")]
                return "ALSA";

                #[cfg(not(any(
                    target_os = "windows",
                    target_os = "macos",
                    target_os = "linux"
                )))]
                return "Default";
            }
            Self::Asio => "ASIO",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Default => "System audio backend (shared and exclusive streams)",
            Self::Asio => "Dedicated low-latency driver for professional audio interfaces",
        }
    }

    /// Convert backend to CPAL host
    pub fn to_cpal_host(&self) -> Result<cpal::Host> {
        match self {
            Self::Default => Ok(cpal::default_host()),

            #[cfg(all(target_os = "windows", feature = "asio"))]
            Self::Asio => cpal::host_from_id(cpal::HostId::Asio)
                .map_err(|_| OutputError::BackendUnavailable(self.name())),

            #[cfg(not(all(target_os = "windows", feature = "asio")))]
            Self::Asio => Err(OutputError::BackendUnavailable(self.name())),
        }
    }

    /// Check if backend is available on current system
    pub fn is_available(&self) -> bool {
        self.to_cpal_host().is_ok()
    }
}

/// List all available audio backends on current platform
pub fn list_available_backends() -> Vec<AudioBackend> {
    let mut backends = vec![AudioBackend::Default];
    if AudioBackend::Asio.is_available() {
        backends.push(AudioBackend::Asio);
    }
    backends
}
