//! Engine configuration
//!
//! Loaded from an optional TOML file plus `CADENCE_`-prefixed environment
//! variables (nested keys use `__`, e.g. `CADENCE_OUTPUT__MODE=exclusive`).
//! Everything has a default, so an empty configuration is valid.

use crate::eq::{semitones_to_q, EqBand, EqParams, DEFAULT_BAND_FREQUENCIES, MAX_BAND_GAIN_DB, MIN_BAND_GAIN_DB};
use crate::error::{EngineError, Result};
use crate::gain::{db_to_linear, GainMode, GainParams, LimiterMode, MAX_PREAMP_DB, MIN_PREAMP_DB};
use crate::levels::DEFAULT_VU_DECAY;
use crate::settings::PlaybackSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Exclusive mode buffer length bounds (ms)
pub const MIN_BUFFER_LENGTH_MS: u32 = 10;
pub const MAX_BUFFER_LENGTH_MS: u32 = 1000;

/// Lead-in bound for exclusive and ASIO modes (ms)
pub const MAX_LEAD_IN_MS: u32 = 5000;

/// Device sharing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Shared mode, mixed by the OS
    #[default]
    Standard,
    /// Fixed buffer length and lead-in, optionally the device's own format
    Exclusive,
    /// Dedicated low-latency driver with a user-selected sample rate
    Asio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusiveSettings {
    pub use_device_default_format: bool,
    pub buffer_length_ms: u32,
    pub lead_in_ms: u32,
}

impl Default for ExclusiveSettings {
    fn default() -> Self {
        Self {
            use_device_default_format: false,
            buffer_length_ms: 100,
            lead_in_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsioSettings {
    pub use_default_sample_rate: bool,
    pub sample_rate: u32,
    pub lead_in_ms: u32,
}

impl Default for AsioSettings {
    fn default() -> Self {
        Self {
            use_default_sample_rate: true,
            sample_rate: 44100,
            lead_in_ms: 0,
        }
    }
}

/// Everything a device backend needs to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name, empty for the system default
    pub device: String,
    pub mode: OutputMode,
    /// Frames rendered per buffer cycle
    pub buffer_frames: u32,
    pub open_timeout_ms: u64,
    pub exclusive: ExclusiveSettings,
    pub asio: AsioSettings,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            mode: OutputMode::Standard,
            buffer_frames: 1024,
            open_timeout_ms: 3000,
            exclusive: ExclusiveSettings::default(),
            asio: AsioSettings::default(),
        }
    }
}

impl OutputConfig {
    /// Same settings in Standard mode
    pub fn as_standard(&self) -> Self {
        Self {
            mode: OutputMode::Standard,
            ..self.clone()
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Lead-in for the configured mode (Standard has none)
    pub fn lead_in(&self) -> Duration {
        let ms = match self.mode {
            OutputMode::Standard => 0,
            OutputMode::Exclusive => self.exclusive.lead_in_ms,
            OutputMode::Asio => self.asio.lead_in_ms,
        };
        Duration::from_millis(u64::from(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    pub mode: GainMode,
    pub limiter: LimiterMode,
    pub preamp_db: f32,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            mode: GainMode::Disabled,
            limiter: LimiterMode::Soft,
            preamp_db: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    pub enabled: bool,
    pub preamp_db: f32,
    pub bandwidth_semitones: f32,
    pub bands: Vec<EqBand>,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            preamp_db: 0.0,
            bandwidth_semitones: 12.0,
            bands: DEFAULT_BAND_FREQUENCIES
                .iter()
                .map(|&frequency| EqBand {
                    frequency,
                    gain_db: 0.0,
                })
                .collect(),
        }
    }
}

/// Fade lengths (ms)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub crossfade_ms: u64,
    pub fade_out_ms: u64,
    pub fade_to_next_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 5000,
            fade_out_ms: 5000,
            fade_to_next_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VuConfig {
    /// Display fall per 15 ms tick
    pub decay: f32,
}

impl Default for VuConfig {
    fn default() -> Self {
        Self {
            decay: DEFAULT_VU_DECAY,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub output: OutputConfig,
    pub gain: GainConfig,
    pub eq: EqConfig,
    pub transition: TransitionConfig,
    pub vu: VuConfig,
    pub playback: PlaybackSettings,
}

/// Configuration with every dB value already converted to linear
#[derive(Debug, Clone, PartialEq)]
pub struct MixParams {
    pub gain: GainParams,
    pub eq: EqParams,
    pub crossfade: Duration,
    pub fade_out: Duration,
    pub fade_to_next: Duration,
}

impl Default for MixParams {
    fn default() -> Self {
        EngineConfig::default().resolve()
    }
}

impl EngineConfig {
    /// Load from an optional file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            settings = settings.add_source(config::File::from(path.to_path_buf()));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("CADENCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Clamp soft limits, reject values the engine cannot run with
    pub fn validate(&mut self) -> Result<()> {
        if self.output.buffer_frames == 0 {
            return Err(EngineError::Config("output.buffer_frames must be > 0".into()));
        }
        if self.output.open_timeout_ms == 0 {
            return Err(EngineError::Config("output.open_timeout_ms must be > 0".into()));
        }
        if self.output.mode == OutputMode::Asio
            && !self.output.asio.use_default_sample_rate
            && self.output.asio.sample_rate == 0
        {
            return Err(EngineError::Config("asio.sample_rate must be > 0".into()));
        }

        let exclusive = &mut self.output.exclusive;
        exclusive.buffer_length_ms = exclusive
            .buffer_length_ms
            .clamp(MIN_BUFFER_LENGTH_MS, MAX_BUFFER_LENGTH_MS);
        exclusive.lead_in_ms = exclusive.lead_in_ms.min(MAX_LEAD_IN_MS);
        self.output.asio.lead_in_ms = self.output.asio.lead_in_ms.min(MAX_LEAD_IN_MS);

        self.gain.preamp_db = self.gain.preamp_db.clamp(MIN_PREAMP_DB, MAX_PREAMP_DB);
        self.eq.preamp_db = self.eq.preamp_db.clamp(MIN_PREAMP_DB, MAX_PREAMP_DB);
        self.eq.bandwidth_semitones = self.eq.bandwidth_semitones.clamp(1.0, 36.0);
        for band in &mut self.eq.bands {
            band.gain_db = band.gain_db.clamp(MIN_BAND_GAIN_DB, MAX_BAND_GAIN_DB);
        }

        self.vu.decay = self.vu.decay.clamp(0.0, 1.0);
        self.playback.sanitize();
        Ok(())
    }

    /// Convert to the values the mixer works with
    pub fn resolve(&self) -> MixParams {
        MixParams {
            gain: GainParams {
                mode: self.gain.mode,
                limiter: self.gain.limiter,
                preamp: db_to_linear(self.gain.preamp_db),
            },
            eq: EqParams {
                enabled: self.eq.enabled,
                preamp: db_to_linear(self.eq.preamp_db),
                q: semitones_to_q(self.eq.bandwidth_semitones),
                bands: self.eq.bands.clone(),
            },
            crossfade: Duration::from_millis(self.transition.crossfade_ms),
            fade_out: Duration::from_millis(self.transition.fade_out_ms),
            fade_to_next: Duration::from_millis(self.transition.fade_to_next_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output.mode, OutputMode::Standard);
        assert_eq!(config.eq.bands.len(), 9);
        assert_eq!(config.transition.crossfade_ms, 5000);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = EngineConfig::default();
        config.output.exclusive.buffer_length_ms = 5;
        config.output.asio.lead_in_ms = 60_000;
        config.gain.preamp_db = 40.0;
        config.eq.bands[0].gain_db = -99.0;
        config.playback.volume = 3.0;

        config.validate().unwrap();
        assert_eq!(config.output.exclusive.buffer_length_ms, MIN_BUFFER_LENGTH_MS);
        assert_eq!(config.output.asio.lead_in_ms, MAX_LEAD_IN_MS);
        assert_eq!(config.gain.preamp_db, MAX_PREAMP_DB);
        assert_eq!(config.eq.bands[0].gain_db, MIN_BAND_GAIN_DB);
        assert_eq!(config.playback.volume, 1.0);
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = EngineConfig::default();
        config.output.buffer_frames = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_resolve_converts_db_once() {
        let mut config = EngineConfig::default();
        config.gain.preamp_db = -6.0;
        config.eq.preamp_db = 6.0;
        let params = config.resolve();
        assert!((params.gain.preamp - 0.501).abs() < 0.001);
        assert!((params.eq.preamp - 1.995).abs() < 0.001);
        assert_eq!(params.fade_to_next, Duration::from_secs(3));
    }

    #[test]
    fn test_lead_in_by_mode() {
        let mut output = OutputConfig::default();
        output.exclusive.lead_in_ms = 200;
        output.asio.lead_in_ms = 50;
        assert_eq!(output.lead_in(), Duration::ZERO);
        output.mode = OutputMode::Exclusive;
        assert_eq!(output.lead_in(), Duration::from_millis(200));
        assert_eq!(output.as_standard().lead_in(), Duration::ZERO);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[output]
device = "Speakers"
mode = "exclusive"

[output.exclusive]
buffer_length_ms = 40
lead_in_ms = 120

[gain]
mode = "album"
limiter = "hard"
preamp_db = 3.5

[[eq.bands]]
frequency = 100.0
gain_db = 4.0

[playback]
volume = 0.6
repeat_playlist = true
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.output.device, "Speakers");
        assert_eq!(config.output.mode, OutputMode::Exclusive);
        assert_eq!(config.output.exclusive.buffer_length_ms, 40);
        assert_eq!(config.output.exclusive.lead_in_ms, 120);
        assert_eq!(config.gain.mode, GainMode::Album);
        assert_eq!(config.gain.limiter, LimiterMode::Hard);
        assert_eq!(config.eq.bands.len(), 1);
        assert!(config.playback.repeat_playlist);
        assert!((config.playback.volume - 0.6).abs() < 1e-6);
        // Untouched sections keep their defaults
        assert_eq!(config.transition, TransitionConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = EngineConfig::load(Some(Path::new("/nonexistent/cadence.toml")));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
