//! cpal output device
//!
//! The render thread writes interleaved stereo `f32` into an `rtrb` ring;
//! the cpal callback drains it, maps stereo onto the hardware channel layout
//! and converts to the device sample format. The callback never blocks and
//! plays silence on underrun.

use crate::backend::AudioBackend;
use crate::device::{device_name, resolve_device};
use crate::error::{OutputError, Result};
use cadence_playback::{DeviceBackend, DeviceError, DeviceFactory, DeviceFormat, OutputConfig, OutputMode};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Render buffers the ring holds on top of the device's own buffer
const RING_BUFFERS: usize = 4;

/// Sleep while the ring is full
const WRITE_PARK: Duration = Duration::from_millis(2);

/// A write that makes no progress for this long means the device stalled
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Flags shared with the cpal callbacks
#[derive(Default)]
struct StreamFlags {
    /// Set by the error callback when the device disappears
    lost: AtomicBool,
    /// Set by `flush`, cleared by the data callback once the ring is empty
    flush: AtomicBool,
}

pub struct CpalDevice {
    stream: Option<cpal::Stream>,
    producer: Producer<f32>,
    flags: Arc<StreamFlags>,
    format: DeviceFormat,
    mode: OutputMode,
}

impl CpalDevice {
    /// Open the configured device and start its stream
    ///
    /// `requested` is the rate the engine would like; Standard and Exclusive
    /// modes use it when the device supports it, ASIO uses its own setting.
    pub fn open(config: &OutputConfig, requested: DeviceFormat) -> Result<Self> {
        let backend = AudioBackend::for_mode(config.mode);
        let device = resolve_device(backend, &config.device)?;
        let (stream_config, sample_format) = select_config(&device, config, requested.sample_rate)?;
        let sample_rate = stream_config.sample_rate;

        let lead_in_frames = frames_for(config.lead_in(), sample_rate);
        let device_frames = match stream_config.buffer_size {
            BufferSize::Fixed(frames) => frames as usize,
            BufferSize::Default => 0,
        };
        let ring_frames = (config.buffer_frames as usize * RING_BUFFERS).max(device_frames * 2)
            + lead_in_frames;
        let (mut producer, consumer) = RingBuffer::<f32>::new(ring_frames * 2);

        // Lead-in: the device starts by playing silence
        if lead_in_frames > 0 {
            if let Ok(chunk) = producer.write_chunk_uninit(lead_in_frames * 2) {
                chunk.fill_from_iter(std::iter::repeat(0.0));
            }
        }

        let flags = Arc::new(StreamFlags::default());
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, consumer, &flags)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, consumer, &flags)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, consumer, &flags)?,
            SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, consumer, &flags)?,
            SampleFormat::F64 => build_stream::<f64>(&device, &stream_config, consumer, &flags)?,
            other => {
                return Err(OutputError::Config(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream.play()?;

        info!(
            device = %device_name(&device).unwrap_or_default(),
            backend = backend.name(),
            mode = ?config.mode,
            sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            buffer = ?stream_config.buffer_size,
            "Output stream started"
        );

        Ok(Self {
            stream: Some(stream),
            producer,
            flags,
            format: DeviceFormat::stereo(sample_rate),
            mode: config.mode,
        })
    }
}

impl DeviceBackend for CpalDevice {
    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn mode(&self) -> OutputMode {
        self.mode
    }

    fn write(&mut self, samples: &[f32]) -> std::result::Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::Unavailable("device is closed".into()));
        }

        let mut offset = 0;
        let mut last_progress = Instant::now();
        while offset < samples.len() {
            if self.flags.lost.load(Ordering::Acquire) {
                return Err(DeviceError::Lost("device no longer available".into()));
            }

            // Whole stereo frames only, and nothing until a pending flush is done
            let free = if self.flags.flush.load(Ordering::Acquire) {
                0
            } else {
                self.producer.slots() & !1
            };
            let n = free.min(samples.len() - offset);
            if n == 0 {
                if last_progress.elapsed() >= WRITE_TIMEOUT {
                    return Err(DeviceError::Timeout(format!(
                        "no room in output buffer for {:?}",
                        WRITE_TIMEOUT
                    )));
                }
                thread::sleep(WRITE_PARK);
                continue;
            }

            if let Ok(chunk) = self.producer.write_chunk_uninit(n) {
                chunk.fill_from_iter(samples[offset..offset + n].iter().copied());
                offset += n;
                last_progress = Instant::now();
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        if self.stream.is_some() {
            self.flags.flush.store(true, Ordering::Release);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Pausing stream before close failed: {}", e);
            }
            drop(stream);
            debug!("Output stream closed");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`CpalDevice`]s for the engine's render thread
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDeviceFactory;

impl CpalDeviceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceFactory for CpalDeviceFactory {
    fn open(
        &mut self,
        config: &OutputConfig,
        format: DeviceFormat,
    ) -> std::result::Result<Box<dyn DeviceBackend>, DeviceError> {
        let device = CpalDevice::open(config, format)?;
        Ok(Box::new(device))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: Consumer<f32>,
    flags: &Arc<StreamFlags>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let data_flags = Arc::clone(flags);
    let error_flags = Arc::clone(flags);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if data_flags.flush.load(Ordering::Acquire) {
                let pending = consumer.slots();
                if let Ok(chunk) = consumer.read_chunk(pending) {
                    chunk.commit_all();
                }
                data_flags.flush.store(false, Ordering::Release);
            }

            for frame in data.chunks_mut(channels) {
                let (left, right) = if consumer.slots() >= 2 {
                    match (consumer.pop(), consumer.pop()) {
                        (Ok(left), Ok(right)) => (left, right),
                        _ => (0.0, 0.0),
                    }
                } else {
                    (0.0, 0.0)
                };
                map_frame(frame, left, right);
            }
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                error_flags.lost.store(true, Ordering::Release);
            }
            other => warn!("Audio stream error: {}", other),
        },
        None,
    )?;
    Ok(stream)
}

/// Write one stereo frame into a device frame of any width
fn map_frame<T>(frame: &mut [T], left: f32, right: f32)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    match frame {
        [mono] => *mono = T::from_sample((left + right) * 0.5),
        [l, r, rest @ ..] => {
            *l = T::from_sample(left);
            *r = T::from_sample(right);
            for sample in rest {
                *sample = T::from_sample(0.0f32);
            }
        }
        [] => {}
    }
}

fn frames_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

/// Pick a stream configuration for the output mode
fn select_config(
    device: &cpal::Device,
    config: &OutputConfig,
    requested_rate: u32,
) -> Result<(StreamConfig, SampleFormat)> {
    let default = device.default_output_config()?;

    let chosen = match config.mode {
        OutputMode::Standard => config_at_rate(device, &default, requested_rate)?.unwrap_or(default),
        OutputMode::Exclusive => {
            let base = if config.exclusive.use_device_default_format {
                default
            } else {
                config_at_rate(device, &default, requested_rate)?.unwrap_or(default)
            };
            let frames = fixed_buffer_frames(
                config.exclusive.buffer_length_ms,
                base.sample_rate(),
                base.buffer_size(),
            );
            let mut stream = base.config();
            stream.buffer_size = BufferSize::Fixed(frames);
            return Ok((stream, base.sample_format()));
        }
        OutputMode::Asio => {
            let rate = if config.asio.use_default_sample_rate {
                default.sample_rate()
            } else {
                config.asio.sample_rate
            };
            config_at_rate(device, &default, rate)?.ok_or_else(|| {
                OutputError::Config(format!("sample rate {} Hz not supported by the driver", rate))
            })?
        }
    };

    let format = chosen.sample_format();
    Ok((chosen.config(), format))
}

/// Supported config matching the default's layout at `rate`, if any
fn config_at_rate(
    device: &cpal::Device,
    default: &SupportedStreamConfig,
    rate: u32,
) -> Result<Option<SupportedStreamConfig>> {
    if rate == default.sample_rate() {
        return Ok(Some(default.clone()));
    }
    let found = device
        .supported_output_configs()?
        .filter(|range| range.channels() == default.channels())
        .filter(|range| rate_in_range(rate, range.min_sample_rate(), range.max_sample_rate()))
        .max_by_key(|range| range.sample_format() == default.sample_format())
        .map(|range| range.with_sample_rate(rate));
    Ok(found)
}

fn rate_in_range(rate: u32, min: u32, max: u32) -> bool {
    rate >= min && rate <= max
}

/// Fixed device buffer for an exclusive stream, clamped to what the device accepts
fn fixed_buffer_frames(buffer_length_ms: u32, sample_rate: u32, supported: &SupportedBufferSize) -> u32 {
    let frames = frames_for(Duration::from_millis(u64::from(buffer_length_ms)), sample_rate).max(1) as u32;
    match supported {
        SupportedBufferSize::Range { min, max } => frames.clamp(*min, (*max).max(*min)),
        SupportedBufferSize::Unknown => frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_buffer_from_length() {
        let frames = fixed_buffer_frames(100, 48000, &SupportedBufferSize::Unknown);
        assert_eq!(frames, 4800);
    }

    #[test]
    fn test_fixed_buffer_clamped_to_device_range() {
        let range = SupportedBufferSize::Range { min: 64, max: 2048 };
        assert_eq!(fixed_buffer_frames(1000, 44100, &range), 2048);
        assert_eq!(fixed_buffer_frames(1, 44100, &range), 64);
        assert_eq!(fixed_buffer_frames(20, 44100, &range), 882);
    }

    #[test]
    fn test_rate_in_range() {
        assert!(rate_in_range(44100, 8000, 192000));
        assert!(rate_in_range(48000, 48000, 48000));
        assert!(!rate_in_range(96000, 44100, 48000));
    }

    #[test]
    fn test_frames_for_lead_in() {
        assert_eq!(frames_for(Duration::from_millis(250), 44100), 11025);
        assert_eq!(frames_for(Duration::ZERO, 96000), 0);
    }

    #[test]
    fn test_map_frame_layouts() {
        let mut mono = [0.0f32];
        map_frame(&mut mono, 0.5, 0.25);
        assert!((mono[0] - 0.375).abs() < 1e-6);

        let mut surround = [1.0f32; 6];
        map_frame(&mut surround, 0.5, -0.5);
        assert_eq!(surround, [0.5, -0.5, 0.0, 0.0, 0.0, 0.0]);

        let mut ints = [0i16; 2];
        map_frame(&mut ints, 1.0, -1.0);
        assert!(ints[0] > 32000);
        assert!(ints[1] < -32000);
    }

    #[test]
    fn test_open_default_device() {
        // Skip on machines without an output device
        let Ok(mut device) = CpalDevice::open(&OutputConfig::default(), DeviceFormat::default())
        else {
            return;
        };
        assert_eq!(device.mode(), OutputMode::Standard);
        assert!(device.format().sample_rate > 0);
        assert_eq!(device.format().channels, 2);

        let silence = vec![0.0f32; 512];
        assert!(device.write(&silence).is_ok());
        device.flush();
        device.close();
        assert!(device.write(&silence).is_err());
        device.close();
    }

    #[test]
    fn test_factory_asio_without_driver_is_unavailable() {
        if AudioBackend::Asio.is_available() {
            return;
        }
        let config = OutputConfig {
            mode: OutputMode::Asio,
            ..Default::default()
        };
        let result = CpalDeviceFactory::new().open(&config, DeviceFormat::default());
        assert!(matches!(result, Err(DeviceError::Unavailable(_))));
    }
}
