//! Varispeed stage
//!
//! One rubato resampler per stream covers both the pitch factor and the
//! source-to-device rate conversion. Output is always a fixed number of
//! stereo frames per call; the input side pulls as many frames as the
//! resampler asks for.

use crate::error::{EngineError, Result};
use rubato::{FastFixedOut, PolynomialDegree, Resampler};

/// Ratio headroom a resampler is built with before it must be rebuilt
const MAX_RATIO_RELATIVE: f64 = 3.0;

const CHANNELS: usize = 2;

/// Resample ratio (output rate / input rate) for a source played at `pitch`
pub fn resample_ratio(source_rate: u32, device_rate: u32, pitch: f32) -> f64 {
    let pitch = if pitch > 0.0 { f64::from(pitch) } else { 1.0 };
    f64::from(device_rate) / f64::from(source_rate.max(1)) / pitch
}

/// `true` when no resampling is needed
pub fn is_unity(ratio: f64) -> bool {
    (ratio - 1.0).abs() < f64::EPSILON
}

pub struct Varispeed {
    resampler: Option<FastFixedOut<f32>>,
    /// Ratio the current resampler was constructed with
    base_ratio: f64,
    chunk_frames: usize,
    pull: Vec<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl Default for Varispeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Varispeed {
    pub fn new() -> Self {
        Self {
            resampler: None,
            base_ratio: 1.0,
            chunk_frames: 0,
            pull: Vec::new(),
            input: vec![Vec::new(); CHANNELS],
            output: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.resampler.is_some()
    }

    /// Fill `out` (interleaved stereo) at `ratio`
    ///
    /// `pull` fills an interleaved stereo buffer from the source and returns
    /// the number of frames it wrote; the rest must be left zeroed.
    pub fn process<F>(&mut self, out: &mut [f32], ratio: f64, mut pull: F) -> Result<()>
    where
        F: FnMut(&mut [f32]) -> usize,
    {
        let frames = out.len() / CHANNELS;

        if is_unity(ratio) {
            // Drop the resampler so a later ratio change starts from a clean state
            self.resampler = None;
            pull(out);
            return Ok(());
        }

        self.prepare(ratio, frames)?;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        let needed = resampler.input_frames_next();
        self.pull.clear();
        self.pull.resize(needed * CHANNELS, 0.0);
        pull(&mut self.pull);

        for (channel, samples) in self.input.iter_mut().enumerate() {
            samples.clear();
            samples.extend(self.pull.iter().skip(channel).step_by(CHANNELS));
        }

        let (_, produced) = resampler
            .process_into_buffer(&self.input, &mut self.output, None)
            .map_err(|e| EngineError::Decode(format!("resampler: {}", e)))?;

        for (i, frame) in out.chunks_exact_mut(CHANNELS).enumerate() {
            if i < produced {
                frame[0] = self.output[0][i];
                frame[1] = self.output[1][i];
            } else {
                frame.fill(0.0);
            }
        }
        Ok(())
    }

    /// Build or retune the resampler for `ratio` and `frames` per call
    fn prepare(&mut self, ratio: f64, frames: usize) -> Result<()> {
        let in_range =
            ratio >= self.base_ratio / MAX_RATIO_RELATIVE && ratio <= self.base_ratio * MAX_RATIO_RELATIVE;

        if let Some(resampler) = self.resampler.as_mut() {
            if self.chunk_frames == frames && in_range {
                return resampler
                    .set_resample_ratio(ratio, true)
                    .map_err(|e| EngineError::Decode(format!("resampler: {}", e)));
            }
        }

        let resampler = FastFixedOut::<f32>::new(
            ratio,
            MAX_RATIO_RELATIVE,
            PolynomialDegree::Linear,
            frames,
            CHANNELS,
        )
        .map_err(|e| EngineError::Decode(format!("resampler: {}", e)))?;

        tracing::trace!(ratio, frames, "Varispeed resampler built");
        self.output = resampler.output_buffer_allocate(true);
        self.resampler = Some(resampler);
        self.base_ratio = ratio;
        self.chunk_frames = frames;
        Ok(())
    }

    /// Forget buffered input (after a seek)
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}
