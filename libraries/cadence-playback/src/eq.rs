//! Graphic equalizer
//!
//! One peaking biquad per band per channel. Band gains stay in dB because
//! that is what the peaking coefficients take; the EQ preamp is linear.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default band centers (Hz)
pub const DEFAULT_BAND_FREQUENCIES: [f32; 9] = [
    80.0, 140.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 14000.0,
];

/// Band gain bounds (dB)
pub const MIN_BAND_GAIN_DB: f32 = -15.0;
pub const MAX_BAND_GAIN_DB: f32 = 15.0;

/// Bands above this fraction of the sample rate are skipped
const MAX_RELATIVE_FREQUENCY: f32 = 0.45;

/// A single EQ band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    /// Center frequency (Hz)
    pub frequency: f32,
    /// Gain (dB)
    pub gain_db: f32,
}

/// Convert a bandwidth in semitones to a filter Q
pub fn semitones_to_q(semitones: f32) -> f32 {
    let octaves = semitones / 12.0;
    let ratio = 2.0_f32.powf(octaves);
    ratio.sqrt() / (ratio - 1.0)
}

/// Resolved EQ settings
#[derive(Debug, Clone, PartialEq)]
pub struct EqParams {
    pub enabled: bool,
    /// Linear preamp
    pub preamp: f32,
    pub q: f32,
    pub bands: Vec<EqBand>,
}

impl Default for EqParams {
    fn default() -> Self {
        Self {
            enabled: false,
            preamp: 1.0,
            q: semitones_to_q(12.0),
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

struct BandFilter {
    left: DirectForm2Transposed<f32>,
    right: DirectForm2Transposed<f32>,
}

/// Stereo graphic EQ bound to one sample rate
pub struct GraphicEq {
    filters: Vec<BandFilter>,
    preamp: f32,
    sample_rate: u32,
}

impl GraphicEq {
    /// Build filters for the given output rate
    ///
    /// Flat bands and bands too close to Nyquist are left out.
    pub fn new(params: &EqParams, sample_rate: u32) -> Self {
        let fs = sample_rate as f32;
        let mut filters = Vec::with_capacity(params.bands.len());

        for band in &params.bands {
            let gain_db = band.gain_db.clamp(MIN_BAND_GAIN_DB, MAX_BAND_GAIN_DB);
            if gain_db == 0.0 || band.frequency <= 0.0 || band.frequency > fs * MAX_RELATIVE_FREQUENCY
            {
                continue;
            }

            match Coefficients::<f32>::from_params(
                Type::PeakingEQ(gain_db),
                fs.hz(),
                band.frequency.hz(),
                params.q,
            ) {
                Ok(coefficients) => filters.push(BandFilter {
                    left: DirectForm2Transposed::<f32>::new(coefficients),
                    right: DirectForm2Transposed::<f32>::new(coefficients),
                }),
                Err(e) => warn!(frequency = band.frequency, "Skipping EQ band: {:?}", e),
            }
        }

        Self {
            filters,
            preamp: params.preamp,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of active (non-flat) bands
    pub fn active_bands(&self) -> usize {
        self.filters.len()
    }

    /// Process interleaved stereo in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        if self.filters.is_empty() && self.preamp == 1.0 {
            return;
        }

        for frame in buffer.chunks_exact_mut(2) {
            let mut left = frame[0] * self.preamp;
            let mut right = frame[1] * self.preamp;
            for band in &mut self.filters {
                left = band.left.run(left);
                right = band.right.run(right);
            }
            frame[0] = flush_denormal(left);
            frame[1] = flush_denormal(right);
        }
    }
}

#[inline]
fn flush_denormal(x: f32) -> f32 {
    if x.abs() < 1e-20 {
        0.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        let mut buffer = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin() * 0.25;
            buffer.push(s);
            buffer.push(s);
        }
        buffer
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().fold(0.0_f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_semitones_to_q() {
        // One octave
        assert!((semitones_to_q(12.0) - std::f32::consts::SQRT_2).abs() < 1e-4);
        // Narrower bandwidth means higher Q
        assert!(semitones_to_q(6.0) > semitones_to_q(12.0));
    }

    #[test]
    fn test_default_bands() {
        let params = EqParams::default();
        assert_eq!(params.bands.len(), 9);
        assert_eq!(params.bands[0].frequency, 80.0);
        assert_eq!(params.bands[8].frequency, 14000.0);
    }

    #[test]
    fn test_flat_eq_is_passthrough() {
        let mut eq = GraphicEq::new(&EqParams::default(), 44100);
        assert_eq!(eq.active_bands(), 0);
        let input = sine(1000.0, 44100, 256);
        let mut buffer = input.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_boost_raises_band_level() {
        let mut params = EqParams::default();
        params.bands[4].gain_db = 12.0; // 1 kHz

        let mut eq = GraphicEq::new(&params, 44100);
        assert_eq!(eq.active_bands(), 1);

        let mut buffer = sine(1000.0, 44100, 8192);
        eq.process(&mut buffer);
        // Skip the settling period
        let settled = peak(&buffer[8192..]);
        assert!(settled > 0.25 * 3.0, "expected ~4x boost, got peak {}", settled);
    }

    #[test]
    fn test_band_above_nyquist_limit_is_skipped() {
        let mut params = EqParams::default();
        params.bands[8].gain_db = 6.0; // 14 kHz
        let eq = GraphicEq::new(&params, 22050);
        assert_eq!(eq.active_bands(), 0);
    }

    #[test]
    fn test_preamp_scales() {
        let params = EqParams {
            preamp: 0.5,
            ..Default::default()
        };
        let mut eq = GraphicEq::new(&params, 48000);
        let mut buffer = vec![0.8, -0.8];
        eq.process(&mut buffer);
        assert!((buffer[0] - 0.4).abs() < 1e-6);
        assert!((buffer[1] + 0.4).abs() < 1e-6);
    }
}
