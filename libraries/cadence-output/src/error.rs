/// Desktop output errors
use cadence_playback::{DeviceError, EngineError};
use thiserror::Error;

/// Result type for output operations
pub type Result<T> = std::result::Result<T, OutputError>;

#[derive(Debug, Error)]
pub enum OutputError {
    /// Device with the requested name does not exist
    #[error("Audio device '{0}' not found")]
    DeviceNotFound(String),

    /// Host API not compiled in or not installed
    #[error("Audio backend '{0}' is not available on this system")]
    BackendUnavailable(&'static str),

    /// Failed to enumerate devices
    #[error("Failed to enumerate audio devices: {0}")]
    Enumeration(String),

    /// No usable stream configuration
    #[error("Unsupported device configuration: {0}")]
    Config(String),

    /// Failed to build output stream
    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    /// Failed to start stream
    #[error("Failed to play stream: {0}")]
    Play(String),

    /// Symphonia could not open or decode a file
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::BuildStreamError> for OutputError {
    fn from(err: cpal::BuildStreamError) -> Self {
        OutputError::StreamBuild(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for OutputError {
    fn from(err: cpal::PlayStreamError) -> Self {
        OutputError::Play(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for OutputError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        OutputError::Config(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for OutputError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        OutputError::Config(err.to_string())
    }
}

impl From<cpal::DevicesError> for OutputError {
    fn from(err: cpal::DevicesError) -> Self {
        OutputError::Enumeration(err.to_string())
    }
}

impl From<symphonia::core::errors::Error> for OutputError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        OutputError::Decode(err.to_string())
    }
}

// Anything that stops a device from opening is "unavailable" to the engine,
// which then falls back to standard mode or reports the failure.
impl From<OutputError> for DeviceError {
    fn from(err: OutputError) -> Self {
        DeviceError::Unavailable(err.to_string())
    }
}

impl From<OutputError> for EngineError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::Decode(msg) => EngineError::Decode(msg),
            OutputError::Io(e) => EngineError::Io(e),
            other => EngineError::DeviceUnavailable(other.to_string()),
        }
    }
}
