//! Output device abstraction
//!
//! A [`DeviceBackend`] is opened and used exclusively by the render thread.
//! Implementations live outside this crate (cpal on desktop); the engine only
//! sees this trait and the [`DeviceFactory`] that creates it.

use crate::config::{OutputConfig, OutputMode};
use crate::error::DeviceError;
use tracing::{info, warn};

/// Channel count of every buffer handed to a device
pub const RENDER_CHANNELS: u16 = 2;

/// Sample rate used when nothing else asks for one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// PCM format negotiated with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl DeviceFormat {
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: RENDER_CHANNELS,
        }
    }
}

impl Default for DeviceFormat {
    fn default() -> Self {
        Self::stereo(DEFAULT_SAMPLE_RATE)
    }
}

/// An open audio sink
///
/// Buffers are interleaved stereo `f32`; implementations map them to the
/// hardware channel layout and sample format.
pub trait DeviceBackend {
    /// Format actually granted by the device
    fn format(&self) -> DeviceFormat;

    /// Mode the device was opened in (after any fallback)
    fn mode(&self) -> OutputMode;

    /// Queue a buffer, blocking until the device has room for it
    ///
    /// Returns [`DeviceError::Lost`] if the device went away.
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError>;

    /// Drop anything queued but not yet played
    fn flush(&mut self);

    /// Release the hardware. Safe to call more than once.
    fn close(&mut self);
}

/// Creates device backends for a configuration
pub trait DeviceFactory: Send {
    fn open(
        &mut self,
        config: &OutputConfig,
        format: DeviceFormat,
    ) -> Result<Box<dyn DeviceBackend>, DeviceError>;
}

/// Open a device, falling back to Standard mode when the requested
/// exclusive/driver mode cannot be granted
pub fn open_with_fallback(
    factory: &mut dyn DeviceFactory,
    config: &OutputConfig,
    format: DeviceFormat,
) -> Result<Box<dyn DeviceBackend>, DeviceError> {
    match factory.open(config, format) {
        Ok(device) => {
            info!(
                mode = ?device.mode(),
                sample_rate = device.format().sample_rate,
                "Audio device opened"
            );
            Ok(device)
        }
        Err(DeviceError::Unavailable(reason)) if config.mode != OutputMode::Standard => {
            warn!(
                mode = ?config.mode,
                "Requested output mode unavailable ({}), falling back to standard",
                reason
            );
            let device = factory.open(&config.as_standard(), format)?;
            info!(
                sample_rate = device.format().sample_rate,
                "Audio device opened in standard mode"
            );
            Ok(device)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDevice {
        mode: OutputMode,
        format: DeviceFormat,
    }

    impl DeviceBackend for NullDevice {
        fn format(&self) -> DeviceFormat {
            self.format
        }
        fn mode(&self) -> OutputMode {
            self.mode
        }
        fn write(&mut self, _samples: &[f32]) -> Result<(), DeviceError> {
            Ok(())
        }
        fn flush(&mut self) {}
        fn close(&mut self) {}
    }

    /// Grants only the modes listed
    struct PickyFactory {
        granted: Vec<OutputMode>,
        attempts: Vec<OutputMode>,
    }

    impl DeviceFactory for PickyFactory {
        fn open(
            &mut self,
            config: &OutputConfig,
            format: DeviceFormat,
        ) -> Result<Box<dyn DeviceBackend>, DeviceError> {
            self.attempts.push(config.mode);
            if self.granted.contains(&config.mode) {
                Ok(Box::new(NullDevice {
                    mode: config.mode,
                    format,
                }))
            } else {
                Err(DeviceError::Unavailable(format!("{:?} refused", config.mode)))
            }
        }
    }

    #[test]
    fn test_exclusive_falls_back_to_standard() {
        let mut factory = PickyFactory {
            granted: vec![OutputMode::Standard],
            attempts: Vec::new(),
        };
        let config = OutputConfig {
            mode: OutputMode::Exclusive,
            ..Default::default()
        };
        let device = open_with_fallback(&mut factory, &config, DeviceFormat::default()).unwrap();
        assert_eq!(device.mode(), OutputMode::Standard);
        assert_eq!(factory.attempts, vec![OutputMode::Exclusive, OutputMode::Standard]);
    }

    #[test]
    fn test_granted_mode_is_used() {
        let mut factory = PickyFactory {
            granted: vec![OutputMode::Asio, OutputMode::Standard],
            attempts: Vec::new(),
        };
        let config = OutputConfig {
            mode: OutputMode::Asio,
            ..Default::default()
        };
        let device = open_with_fallback(&mut factory, &config, DeviceFormat::stereo(96000)).unwrap();
        assert_eq!(device.mode(), OutputMode::Asio);
        assert_eq!(device.format().sample_rate, 96000);
        assert_eq!(factory.attempts.len(), 1);
    }

    #[test]
    fn test_standard_failure_is_reported() {
        let mut factory = PickyFactory {
            granted: vec![],
            attempts: Vec::new(),
        };
        let result = open_with_fallback(&mut factory, &OutputConfig::default(), DeviceFormat::default());
        assert!(matches!(result, Err(DeviceError::Unavailable(_))));
        assert_eq!(factory.attempts, vec![OutputMode::Standard]);
    }
}
