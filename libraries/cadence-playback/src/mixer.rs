//! Mixing & effects stage
//!
//! Signal chain per rendered buffer:
//!
//! ```text
//! source -> stereo fold -> varispeed (pitch + rate) -> item gain * fade ramp ─┐
//! source -> ...                                                               ├─ sum -> EQ -> limiter -> master volume
//! ```
//!
//! A [`Stream`] is one open source plus its per-stream state. The [`Mixer`]
//! owns the stages that run on the summed signal.

use crate::config::MixParams;
use crate::crossfade::Ramp;
use crate::eq::GraphicEq;
use crate::error::Result;
use crate::gain::{GainParams, Limiter};
use crate::pitch::{resample_ratio, Varispeed};
use crate::settings::PlaybackSettings;
use crate::source::AudioSource;
use crate::types::PlaybackItem;
use crate::volume::MasterVolume;
use std::time::Duration;
use tracing::warn;

/// Result of rendering one buffer from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// More frames may follow
    Playing,
    /// Source reached its end during this buffer
    Ended,
    /// Source failed; treated as end of stream
    Failed(String),
}

/// An open source being rendered
pub struct Stream {
    item: PlaybackItem,
    source: Box<dyn AudioSource>,
    /// Linear per-item gain, fixed for the stream's lifetime
    gain: f32,
    varispeed: Varispeed,
    /// Native-layout samples straight from the source
    decode: Vec<f32>,
    /// Rendered stereo before gain
    render: Vec<f32>,
    ended: bool,
}

impl Stream {
    pub fn new(item: PlaybackItem, source: Box<dyn AudioSource>, gain: &GainParams) -> Self {
        let gain = gain.item_gain(item.gain());
        Self {
            item,
            source,
            gain,
            varispeed: Varispeed::new(),
            decode: Vec::new(),
            render: Vec::new(),
            ended: false,
        }
    }

    pub fn item(&self) -> &PlaybackItem {
        &self.item
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn position(&self) -> Duration {
        self.source.position()
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    pub fn stream_title(&self) -> Option<String> {
        self.source.stream_title()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn seek(&mut self, position: Duration) -> Result<()> {
        self.source.seek(position)?;
        self.varispeed.reset();
        self.ended = false;
        Ok(())
    }

    /// Render `output.len() / 2` frames and add them to `output` under `ramp`
    pub fn mix_into(&mut self, output: &mut [f32], device_rate: u32, pitch: f32, ramp: Ramp) -> StreamStatus {
        let Self {
            source,
            varispeed,
            decode,
            render,
            ended,
            gain,
            ..
        } = self;

        render.clear();
        render.resize(output.len(), 0.0);

        if *ended {
            return StreamStatus::Ended;
        }

        let mut failure = None;
        let mut short = false;
        let ratio = resample_ratio(source.sample_rate(), device_rate, pitch);
        let processed = varispeed.process(render, ratio, |buf| {
            if short || failure.is_some() {
                return 0;
            }
            match read_stereo(source.as_mut(), decode, buf) {
                Ok(frames) => {
                    short = frames < buf.len() / 2;
                    frames
                }
                Err(e) => {
                    failure = Some(e.to_string());
                    0
                }
            }
        });
        if let Err(e) = processed {
            failure = Some(e.to_string());
        }

        let frames = output.len() / 2;
        let ramp = ramp.scaled(*gain);
        if !ramp.is_silent() {
            for (i, (out, rendered)) in output
                .chunks_exact_mut(2)
                .zip(render.chunks_exact(2))
                .enumerate()
            {
                let g = ramp.gain_at(i, frames);
                out[0] += rendered[0] * g;
                out[1] += rendered[1] * g;
            }
        }

        if let Some(message) = failure {
            warn!(item = self.item.id(), "Decode failed: {}", message);
            self.ended = true;
            return StreamStatus::Failed(message);
        }
        if short {
            self.ended = true;
            return StreamStatus::Ended;
        }
        StreamStatus::Playing
    }
}

/// Read up to `out.len() / 2` frames as stereo, zero-filling the rest
///
/// Returns the number of frames read; fewer than requested means end of stream.
fn read_stereo(source: &mut dyn AudioSource, decode: &mut Vec<f32>, out: &mut [f32]) -> Result<usize> {
    let channels = usize::from(source.channels().max(1));
    let wanted = out.len() / 2;
    let mut filled = 0;

    while filled < wanted {
        let samples = (wanted - filled) * channels;
        if decode.len() < samples {
            decode.resize(samples, 0.0);
        }
        let read = source.read(&mut decode[..samples])?;
        let frames = read / channels;
        if frames == 0 {
            break;
        }
        fold_to_stereo(
            &decode[..frames * channels],
            channels,
            &mut out[filled * 2..(filled + frames) * 2],
        );
        filled += frames;
    }

    out[filled * 2..].fill(0.0);
    Ok(filled)
}

/// Map any channel layout to stereo
///
/// Mono is duplicated. With more than two channels, even channels average
/// into left and odd channels into right.
pub fn fold_to_stereo(input: &[f32], channels: usize, output: &mut [f32]) {
    match channels {
        1 => {
            for (sample, frame) in input.iter().zip(output.chunks_exact_mut(2)) {
                frame[0] = *sample;
                frame[1] = *sample;
            }
        }
        2 => output[..input.len()].copy_from_slice(input),
        _ => {
            let left_count = channels.div_ceil(2) as f32;
            let right_count = (channels / 2) as f32;
            for (frame_in, frame_out) in input.chunks_exact(channels).zip(output.chunks_exact_mut(2)) {
                let left: f32 = frame_in.iter().step_by(2).sum();
                let right: f32 = frame_in.iter().skip(1).step_by(2).sum();
                frame_out[0] = left / left_count;
                frame_out[1] = right / right_count;
            }
        }
    }
}

/// Stages run on the summed signal
pub struct Mixer {
    params: MixParams,
    eq: Option<GraphicEq>,
    limiter: Limiter,
    volume: MasterVolume,
}

impl Mixer {
    pub fn new(params: MixParams, settings: &PlaybackSettings) -> Self {
        Self {
            limiter: Limiter::new(params.gain.limiter),
            volume: MasterVolume::new(settings),
            eq: None,
            params,
        }
    }

    pub fn params(&self) -> &MixParams {
        &self.params
    }

    /// Open a stream with this mixer's gain settings
    pub fn stream(&self, item: PlaybackItem, source: Box<dyn AudioSource>) -> Stream {
        Stream::new(item, source, &self.params.gain)
    }

    /// EQ, limiter and master volume over the mixed buffer
    pub fn finish(&mut self, buffer: &mut [f32], sample_rate: u32, settings: &PlaybackSettings) {
        if self.params.eq.enabled {
            let rebuild = self.eq.as_ref().map_or(true, |eq| eq.sample_rate() != sample_rate);
            if rebuild {
                self.eq = Some(GraphicEq::new(&self.params.eq, sample_rate));
            }
            if let Some(eq) = self.eq.as_mut() {
                eq.process(buffer);
            }
        }
        self.limiter.process(buffer);
        self.volume.apply(buffer, settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::{GainMode, LimiterMode};
    use crate::source::ToneSource;
    use crate::types::GainInfo;

    /// Constant-value source
    struct Dc {
        value: f32,
        channels: u16,
        remaining: usize,
        fail: bool,
    }

    impl AudioSource for Dc {
        fn sample_rate(&self) -> u32 {
            44100
        }
        fn channels(&self) -> u16 {
            self.channels
        }
        fn read(&mut self, buffer: &mut [f32]) -> Result<usize> {
            if self.fail {
                return Err(crate::error::EngineError::Decode("corrupt frame".into()));
            }
            let frames = (buffer.len() / usize::from(self.channels)).min(self.remaining);
            let samples = frames * usize::from(self.channels);
            buffer[..samples].fill(self.value);
            self.remaining -= frames;
            Ok(samples)
        }
        fn seek(&mut self, _position: Duration) -> Result<()> {
            Ok(())
        }
        fn position(&self) -> Duration {
            Duration::ZERO
        }
    }

    fn dc(value: f32, channels: u16, frames: usize) -> Box<dyn AudioSource> {
        Box::new(Dc {
            value,
            channels,
            remaining: frames,
            fail: false,
        })
    }

    fn item() -> PlaybackItem {
        PlaybackItem::new(1, "dc", Duration::from_secs(1))
    }

    #[test]
    fn test_fold_mono_and_surround() {
        let mut out = vec![0.0; 4];
        fold_to_stereo(&[0.5, -0.5], 1, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);

        let mut out = vec![0.0; 2];
        fold_to_stereo(&[0.2, 0.4, 0.6, 0.8, 1.0, 0.0], 6, &mut out);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_stream_applies_gain_and_ramp() {
        let gain = GainParams {
            mode: GainMode::Track,
            limiter: LimiterMode::Soft,
            preamp: 1.0,
        };
        let item = item().with_gain(GainInfo::track(-6.0206, 1.0));
        let mut stream = Stream::new(item, dc(1.0, 2, 1000), &gain);
        assert!((stream.gain() - 0.5).abs() < 1e-3);

        let mut out = vec![0.0; 8];
        let status = stream.mix_into(&mut out, 44100, 1.0, Ramp { from: 1.0, to: 0.0 });
        assert_eq!(status, StreamStatus::Playing);
        // Last frame reaches the ramp target
        assert!(out[7].abs() < 1e-6);
        assert!((out[0] - 0.375).abs() < 1e-3);
    }

    #[test]
    fn test_stream_mixes_additively() {
        let mut out = vec![0.25; 4];
        let mut stream = Stream::new(item(), dc(0.5, 1, 100), &GainParams::default());
        stream.mix_into(&mut out, 44100, 1.0, Ramp::UNITY);
        assert!(out.iter().all(|s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_stream_end_zero_fills() {
        let mut out = vec![0.0; 8];
        let mut stream = Stream::new(item(), dc(0.5, 2, 2), &GainParams::default());
        assert_eq!(stream.mix_into(&mut out, 44100, 1.0, Ramp::UNITY), StreamStatus::Ended);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert!(stream.is_ended());
        assert_eq!(stream.mix_into(&mut out, 44100, 1.0, Ramp::UNITY), StreamStatus::Ended);
    }

    #[test]
    fn test_stream_decode_failure() {
        let source = Box::new(Dc {
            value: 0.0,
            channels: 2,
            remaining: 10,
            fail: true,
        });
        let mut stream = Stream::new(item(), source, &GainParams::default());
        let mut out = vec![0.0; 8];
        assert!(matches!(
            stream.mix_into(&mut out, 44100, 1.0, Ramp::UNITY),
            StreamStatus::Failed(_)
        ));
        assert!(stream.is_ended());
    }

    #[test]
    fn test_stream_resamples_to_device_rate() {
        let source = Box::new(ToneSource::new(100.0, 22050, Some(Duration::from_secs(2))));
        let mut stream = Stream::new(item(), source, &GainParams::default());
        let mut out = vec![0.0; 2048];
        for _ in 0..10 {
            out.fill(0.0);
            assert_eq!(stream.mix_into(&mut out, 44100, 1.0, Ramp::UNITY), StreamStatus::Playing);
        }
        // 10 buffers of 1024 frames at 44.1 kHz consume about half that at 22.05 kHz
        let consumed = stream.position().as_secs_f32();
        assert!((consumed - 10240.0 / 44100.0).abs() < 0.01, "consumed {}", consumed);
    }

    #[test]
    fn test_mixer_finish_volume_and_limiter() {
        let mut params = MixParams::default();
        params.gain.limiter = LimiterMode::Hard;
        let settings = PlaybackSettings {
            volume: 0.5,
            ..Default::default()
        };
        let mut mixer = Mixer::new(params, &settings);
        let mut buffer = vec![1.5, -1.5, 0.5, -0.5];
        mixer.finish(&mut buffer, 44100, &settings);
        assert_eq!(buffer, vec![0.5, -0.5, 0.25, -0.25]);

        let muted = PlaybackSettings {
            muted: true,
            ..settings
        };
        let mut buffer = vec![0.5; 4];
        mixer.finish(&mut buffer, 44100, &muted);
        // Ramped to zero across the buffer
        assert_eq!(buffer[3], 0.0);
    }
}
