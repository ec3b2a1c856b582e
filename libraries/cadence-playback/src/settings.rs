//! Runtime playback settings mutated by UI commands

use serde::{Deserialize, Serialize};

/// Step applied by volume up/down
pub const VOLUME_STEP: f32 = 0.01;

/// Named pitch adjustment range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchRange {
    /// ±8%
    #[default]
    Small,
    /// ±16%
    Medium,
    /// ±50%
    Large,
}

impl PitchRange {
    /// Maximum deviation from 1.0
    pub fn factor(self) -> f32 {
        match self {
            Self::Small => 0.08,
            Self::Medium => 0.16,
            Self::Large => 0.5,
        }
    }

    pub fn min(self) -> f32 {
        1.0 - self.factor()
    }

    pub fn max(self) -> f32 {
        1.0 + self.factor()
    }

    pub fn clamp(self, pitch: f32) -> f32 {
        if pitch.is_nan() {
            return 1.0;
        }
        pitch.clamp(self.min(), self.max())
    }

    /// Pitch up/down increment (one hundredth of the range)
    pub fn step(self) -> f32 {
        self.factor() / 100.0
    }

    /// Carry a pitch over to another range keeping its relative deviation
    pub fn rescale(self, pitch: f32, to: PitchRange) -> f32 {
        let updated = 1.0 + (pitch - 1.0) * (to.factor() / self.factor());
        to.clamp(updated)
    }
}

/// Settings read by the transport before each decision and by the mixer
/// once per rendered buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Master volume, linear `[0.0, 1.0]`
    pub volume: f32,
    /// Playback speed factor, 1.0 = unmodified
    pub pitch: f32,
    pub pitch_range: PitchRange,
    pub crossfade: bool,
    pub random_play: bool,
    pub repeat_track: bool,
    pub repeat_playlist: bool,
    pub stop_at_track_end: bool,
    pub muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 1.0,
            pitch_range: PitchRange::default(),
            crossfade: false,
            random_play: false,
            repeat_track: false,
            repeat_playlist: false,
            stop_at_track_end: false,
            muted: false,
        }
    }
}

impl PlaybackSettings {
    /// Clamp volume into `[0.0, 1.0]`
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    /// Clamp pitch into the active range
    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = self.pitch_range.clamp(pitch);
    }

    /// Switch range, rescaling the current pitch
    pub fn set_pitch_range(&mut self, range: PitchRange) {
        if range != self.pitch_range {
            self.pitch = self.pitch_range.rescale(self.pitch, range);
            self.pitch_range = range;
        }
    }

    /// Bring loaded values back into range
    pub fn sanitize(&mut self) {
        self.set_volume(self.volume);
        self.set_pitch(self.pitch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PlaybackSettings::default();
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.pitch, 1.0);
        assert!(!settings.crossfade);
        assert!(!settings.muted);
    }

    #[test]
    fn test_volume_clamped() {
        let mut settings = PlaybackSettings::default();
        settings.set_volume(1.7);
        assert_eq!(settings.volume, 1.0);
        settings.set_volume(-0.3);
        assert_eq!(settings.volume, 0.0);
        settings.set_volume(0.42);
        assert_eq!(settings.volume, 0.42);
    }

    #[test]
    fn test_pitch_clamped_to_range() {
        let mut settings = PlaybackSettings::default();
        settings.set_pitch(2.0);
        assert!((settings.pitch - 1.08).abs() < 1e-6);
        settings.set_pitch(0.1);
        assert!((settings.pitch - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_pitch_range_rescale() {
        let mut settings = PlaybackSettings::default();
        settings.set_pitch(1.04);
        settings.set_pitch_range(PitchRange::Medium);
        assert!((settings.pitch - 1.08).abs() < 1e-5);
        settings.set_pitch_range(PitchRange::Small);
        assert!((settings.pitch - 1.04).abs() < 1e-5);
    }

    #[test]
    fn test_pitch_step() {
        assert!((PitchRange::Large.step() - 0.005).abs() < 1e-7);
    }
}
