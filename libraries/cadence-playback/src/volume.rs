//! Master volume and mute
//!
//! Volume is linear in `[0.0, 1.0]` and scales the final mix. A change between
//! two buffers is ramped across the next buffer instead of stepping.

use crate::settings::PlaybackSettings;

/// Master gain stage at the end of the mix chain
#[derive(Debug, Clone)]
pub struct MasterVolume {
    /// Gain applied at the end of the previous buffer
    current: f32,
}

impl MasterVolume {
    pub fn new(settings: &PlaybackSettings) -> Self {
        Self {
            current: Self::target(settings),
        }
    }

    /// Linear gain the settings ask for (0.0 when muted)
    pub fn target(settings: &PlaybackSettings) -> f32 {
        if settings.muted {
            0.0
        } else {
            settings.volume
        }
    }

    pub fn gain(&self) -> f32 {
        self.current
    }

    /// Apply volume to an interleaved stereo buffer (in-place)
    pub fn apply(&mut self, buffer: &mut [f32], settings: &PlaybackSettings) {
        let target = Self::target(settings);
        let start = self.current;
        self.current = target;

        if start == target {
            if target == 0.0 {
                buffer.fill(0.0);
            } else if target != 1.0 {
                for sample in buffer.iter_mut() {
                    *sample *= target;
                }
            }
            return;
        }

        let frames = buffer.len() / 2;
        if frames == 0 {
            return;
        }
        let step = (target - start) / frames as f32;
        for (i, frame) in buffer.chunks_exact_mut(2).enumerate() {
            let gain = start + step * (i + 1) as f32;
            frame[0] *= gain;
            frame[1] *= gain;
        }
    }
}
