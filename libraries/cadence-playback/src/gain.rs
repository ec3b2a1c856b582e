//! Per-track gain and output limiting
//!
//! Gain is resolved once per stream from the item's stored loudness metadata.
//! The limiter runs on the mixed buffer, after EQ and before master volume.

use crate::types::GainInfo;
use serde::{Deserialize, Serialize};

/// Preamp bounds (dB)
pub const MIN_PREAMP_DB: f32 = -15.0;
pub const MAX_PREAMP_DB: f32 = 15.0;

/// Level above which the soft limiter starts bending the curve
const SOFT_KNEE_THRESHOLD: f32 = 0.8;

/// Which stored gain value to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainMode {
    #[default]
    Disabled,
    Track,
    Album,
}

/// Peak handling after gain is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterMode {
    /// No limiting, the applied gain is capped by the stored peak instead
    #[default]
    None,
    /// Clip at full scale
    Hard,
    /// Smooth knee approaching full scale
    Soft,
}

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Resolved gain settings (preamp already linear)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainParams {
    pub mode: GainMode,
    pub limiter: LimiterMode,
    pub preamp: f32,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            mode: GainMode::Disabled,
            limiter: LimiterMode::None,
            preamp: 1.0,
        }
    }
}

impl GainParams {
    /// Linear gain to apply to a stream with the given metadata
    ///
    /// Album mode falls back to track values. Items without metadata only get
    /// the preamp. With the limiter off the result is capped at `1 / peak`.
    pub fn item_gain(&self, info: &GainInfo) -> f32 {
        let (gain_db, peak) = match self.mode {
            GainMode::Disabled => return 1.0,
            GainMode::Track => (info.track_gain_db, info.track_peak),
            GainMode::Album => (
                info.album_gain_db.or(info.track_gain_db),
                info.album_peak.or(info.track_peak),
            ),
        };

        let mut gain = gain_db.map_or(1.0, db_to_linear) * self.preamp;

        if self.limiter == LimiterMode::None {
            if let Some(peak) = peak.filter(|p| *p > 0.0) {
                gain = gain.min(1.0 / peak);
            }
        }

        gain
    }
}

/// Stateless sample limiter
#[derive(Debug, Clone, Copy, Default)]
pub struct Limiter {
    mode: LimiterMode,
}

impl Limiter {
    pub fn new(mode: LimiterMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LimiterMode {
        self.mode
    }

    /// Process buffer in place
    pub fn process(&self, buffer: &mut [f32]) {
        match self.mode {
            LimiterMode::None => {}
            LimiterMode::Hard => {
                for sample in buffer.iter_mut() {
                    *sample = sample.clamp(-1.0, 1.0);
                }
            }
            LimiterMode::Soft => {
                for sample in buffer.iter_mut() {
                    *sample = soft_knee(*sample);
                }
            }
        }
    }
}

/// Identity below the threshold, tanh knee above it. Never reaches full scale.
#[inline]
fn soft_knee(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= SOFT_KNEE_THRESHOLD {
        return sample;
    }
    let headroom = 1.0 - SOFT_KNEE_THRESHOLD;
    let bent = SOFT_KNEE_THRESHOLD + headroom * ((magnitude - SOFT_KNEE_THRESHOLD) / headroom).tanh();
    bent.copysign(sample)
}
