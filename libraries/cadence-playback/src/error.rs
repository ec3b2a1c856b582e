//! Error types for the playback engine

use std::time::Duration;
use thiserror::Error;

/// Engine errors
///
/// None of these are fatal to the host process. Every failure path leaves the
/// transport in a consistent state (usually `Stopped`) and reports one of these.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The output device could not be opened in the requested mode/format
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The output device went away mid-playback and could not be reopened
    #[error("Audio device lost: {0}")]
    DeviceLost(String),

    /// A source could not produce frames
    #[error("Decode error: {0}")]
    Decode(String),

    /// A command was rejected (e.g. play with item id 0)
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Opening the output device took longer than allowed
    #[error("Timed out after {0:?} waiting for the audio device")]
    OpenTimeout(Duration),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`DeviceBackend`](crate::device::DeviceBackend)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// Format or mode could not be granted
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// Device was unplugged or reconfigured
    #[error("device lost: {0}")]
    Lost(String),

    /// Device did not respond in time
    #[error("device timed out: {0}")]
    Timeout(String),
}

impl From<DeviceError> for EngineError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Unavailable(msg) | DeviceError::Timeout(msg) => {
                EngineError::DeviceUnavailable(msg)
            }
            DeviceError::Lost(msg) => EngineError::DeviceLost(msg),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_conversion() {
        let lost: EngineError = DeviceError::Lost("unplugged".into()).into();
        assert!(matches!(lost, EngineError::DeviceLost(ref m) if m == "unplugged"));

        let unavailable: EngineError = DeviceError::Unavailable("busy".into()).into();
        assert!(matches!(unavailable, EngineError::DeviceUnavailable(_)));

        let timeout: EngineError = DeviceError::Timeout("open".into()).into();
        assert!(matches!(timeout, EngineError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::Decode("truncated frame".into());
        assert_eq!(err.to_string(), "Decode error: truncated frame");
    }
}
