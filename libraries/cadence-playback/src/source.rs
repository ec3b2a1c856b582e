//! Decoder source abstraction
//!
//! The engine does not decode anything itself. Sources are produced by a
//! [`MediaOpener`] (symphonia on desktop, in-memory generators in tests) and
//! pulled by the mixer one buffer at a time.

use crate::error::Result;
use crate::types::PlaybackItem;
use std::time::Duration;

/// PCM frame producer for one item
pub trait AudioSource: Send {
    /// Native sample rate of the produced frames
    fn sample_rate(&self) -> u32;

    /// Channels per interleaved frame
    fn channels(&self) -> u16;

    /// Fill `buffer` with interleaved frames
    ///
    /// Returns the number of samples written (a multiple of `channels()`).
    /// `Ok(0)` means end of stream.
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize>;

    /// Seek to a time offset from the start
    fn seek(&mut self, position: Duration) -> Result<()>;

    /// Current decode position
    fn position(&self) -> Duration;

    /// Title announced by a network stream
    fn stream_title(&self) -> Option<String> {
        None
    }
}

/// Opens sources for playlist items
pub trait MediaOpener: Send + Sync {
    fn open(&self, item: &PlaybackItem) -> Result<Box<dyn AudioSource>>;
}

impl<F> MediaOpener for F
where
    F: Fn(&PlaybackItem) -> Result<Box<dyn AudioSource>> + Send + Sync,
{
    fn open(&self, item: &PlaybackItem) -> Result<Box<dyn AudioSource>> {
        self(item)
    }
}

/// Sine tone source
///
/// Used by tests and as a stand-in media type (`tone:<hz>`).
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    channels: u16,
    total_frames: Option<u64>,
    frame: u64,
}

impl ToneSource {
    pub fn new(frequency: f32, sample_rate: u32, duration: Option<Duration>) -> Self {
        Self {
            frequency,
            amplitude: 0.5,
            sample_rate,
            channels: 2,
            total_frames: duration.map(|d| (d.as_secs_f64() * f64::from(sample_rate)) as u64),
            frame: 0,
        }
    }
}

impl AudioSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let channels = usize::from(self.channels);
        let mut frames = buffer.len() / channels;
        if let Some(total) = self.total_frames {
            frames = frames.min(total.saturating_sub(self.frame) as usize);
        }

        let step = std::f32::consts::TAU * self.frequency / self.sample_rate as f32;
        for frame in buffer.chunks_exact_mut(channels).take(frames) {
            let value = (step * self.frame as f32).sin() * self.amplitude;
            frame.fill(value);
            self.frame += 1;
        }
        Ok(frames * channels)
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let frame = (position.as_secs_f64() * f64::from(self.sample_rate)) as u64;
        self.frame = match self.total_frames {
            Some(total) => frame.min(total),
            None => frame,
        };
        Ok(())
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.frame as f64 / f64::from(self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_source_ends() {
        let mut source = ToneSource::new(440.0, 1000, Some(Duration::from_millis(10)));
        let mut buffer = vec![0.0; 64];
        assert_eq!(source.read(&mut buffer).unwrap(), 20);
        assert_eq!(source.read(&mut buffer).unwrap(), 0);
        assert_eq!(source.position(), Duration::from_millis(10));
    }

    #[test]
    fn test_tone_source_seek_clamps() {
        let mut source = ToneSource::new(440.0, 1000, Some(Duration::from_secs(1)));
        source.seek(Duration::from_secs(5)).unwrap();
        assert_eq!(source.position(), Duration::from_secs(1));
        source.seek(Duration::from_millis(250)).unwrap();
        assert_eq!(source.position(), Duration::from_millis(250));
    }

    #[test]
    fn test_closure_opener() {
        let opener = |item: &PlaybackItem| -> Result<Box<dyn AudioSource>> {
            Ok(Box::new(ToneSource::new(220.0, 8000, item.duration())))
        };
        let item = PlaybackItem::new(1, "tone:220", Duration::from_secs(1));
        let source = opener.open(&item).unwrap();
        assert_eq!(source.sample_rate(), 8000);
    }
}
