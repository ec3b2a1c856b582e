//! Notification chimes
//!
//! Short synthesized sounds mixed on top of the engine output after master
//! volume. They ignore mute, fades and per-item gain.

use std::f32::consts::TAU;
use std::time::Duration;

/// Attack ramp to avoid a click at onset
const ATTACK_SECS: f32 = 0.005;

/// Output level of a chime before partial weighting
const CHIME_LEVEL: f32 = 0.3;

struct Variant {
    /// (frequency Hz, relative amplitude)
    partials: &'static [(f32, f32)],
    length: Duration,
    /// Exponential decay rate (1/s)
    decay: f32,
}

const VARIANTS: [Variant; 4] = [
    Variant {
        partials: &[(880.0, 1.0), (1760.0, 0.3)],
        length: Duration::from_millis(400),
        decay: 9.0,
    },
    Variant {
        partials: &[(659.25, 0.8), (987.77, 0.6), (1318.5, 0.3)],
        length: Duration::from_millis(700),
        decay: 6.0,
    },
    Variant {
        partials: &[(523.25, 0.7), (659.25, 0.5), (783.99, 0.5), (1046.5, 0.25)],
        length: Duration::from_millis(1000),
        decay: 4.0,
    },
    Variant {
        partials: &[(392.0, 1.0), (1176.0, 0.4), (1960.0, 0.15)],
        length: Duration::from_millis(1500),
        decay: 3.0,
    },
];

/// One chime being played
#[derive(Debug, Clone)]
pub struct Chime {
    partials: &'static [(f32, f32)],
    length_secs: f32,
    decay: f32,
    norm: f32,
    elapsed_secs: f32,
}

impl Chime {
    /// Chime variant `n` (1..=4), `None` for anything else
    pub fn new(n: u8) -> Option<Self> {
        let variant = VARIANTS.get(usize::from(n).checked_sub(1)?)?;
        let total: f32 = variant.partials.iter().map(|(_, amp)| amp).sum();
        Some(Self {
            partials: variant.partials,
            length_secs: variant.length.as_secs_f32(),
            decay: variant.decay,
            norm: CHIME_LEVEL / total,
            elapsed_secs: 0.0,
        })
    }

    pub fn length(&self) -> Duration {
        Duration::from_secs_f32(self.length_secs)
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed_secs >= self.length_secs
    }

    /// Add the next `buffer.len() / 2` frames to an interleaved stereo buffer
    ///
    /// Returns `false` once the chime has finished.
    pub fn mix_into(&mut self, buffer: &mut [f32], sample_rate: u32) -> bool {
        if sample_rate == 0 {
            return false;
        }
        let dt = 1.0 / sample_rate as f32;

        for frame in buffer.chunks_exact_mut(2) {
            if self.is_finished() {
                break;
            }
            let t = self.elapsed_secs;
            let envelope = (t / ATTACK_SECS).min(1.0) * (-self.decay * t).exp();
            let value: f32 = self
                .partials
                .iter()
                .map(|(frequency, amp)| (TAU * frequency * t).sin() * amp)
                .sum::<f32>()
                * envelope
                * self.norm;
            frame[0] += value;
            frame[1] += value;
            self.elapsed_secs += dt;
        }
        !self.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_in_range() {
        for n in 1..=4 {
            assert!(Chime::new(n).is_some(), "variant {}", n);
        }
        assert!(Chime::new(0).is_none());
        assert!(Chime::new(5).is_none());
    }

    #[test]
    fn test_chime_lengths_differ() {
        let lengths: Vec<Duration> = (1..=4).filter_map(Chime::new).map(|c| c.length()).collect();
        assert!(lengths.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_chime_runs_out_and_stays_bounded() {
        let mut chime = Chime::new(1).unwrap();
        let mut buffer = vec![0.0; 2048];
        let mut buffers = 0;
        while chime.mix_into(&mut buffer, 44100) {
            assert!(buffer.iter().all(|s| s.abs() <= CHIME_LEVEL + 1e-3));
            buffer.fill(0.0);
            buffers += 1;
            assert!(buffers < 100);
        }
        // 400 ms at 44.1 kHz in 1024-frame buffers
        assert!((16..=18).contains(&buffers), "buffers {}", buffers);
        assert!(chime.is_finished());
    }

    #[test]
    fn test_chime_adds_to_existing_signal() {
        let mut chime = Chime::new(2).unwrap();
        let mut buffer = vec![0.5; 512];
        chime.mix_into(&mut buffer, 48000);
        assert!(buffer.iter().any(|&s| s != 0.5));
        // Starts from silence
        assert_eq!(buffer[0], 0.5);
    }
}
