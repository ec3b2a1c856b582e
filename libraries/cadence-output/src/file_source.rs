//! Local file source using the Symphonia decoder
//!
//! Decodes packet by packet at the file's native rate and channel count;
//! rate conversion and channel folding happen in the engine's mixer.
//!
//! Supported containers and codecs are whatever Symphonia's default
//! registry provides (MP3, FLAC, OGG/Vorbis, WAV, AAC/M4A, ...).

use crate::error::{OutputError, Result};
use cadence_playback::{AudioSource, EngineError, GainInfo, MediaOpener, PlaybackItem, ToneSource};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, warn};

/// Sample rate used for `tone:` items
const TONE_SAMPLE_RATE: u32 = 44100;

pub struct FileSource {
    path: PathBuf,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    channels: u16,
    duration: Option<Duration>,
    gain: GainInfo,

    // Decoded samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    sample_buf: Option<SampleBuffer<f32>>,

    /// Frames to drop after an accurate seek landed early
    skip_frames: u64,
    frames_read: u64,
    eof: bool,
}

impl FileSource {
    /// Open and probe a file
    ///
    /// Only the container header is read here; packets are decoded on demand.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut gain = GainInfo::default();
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            read_gain_tags(revision, &mut gain);
        }
        let mut reader = probed.format;
        if let Some(revision) = reader.metadata().current() {
            read_gain_tags(revision, &mut gain);
        }

        let track = reader
            .default_track()
            .ok_or_else(|| OutputError::Decode("no audio track found".into()))?;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| OutputError::Decode("unknown sample rate".into()))?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(2).max(1) as u16;
        let duration = params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / f64::from(sample_rate)));
        let track_id = track.id;
        let time_base = params.time_base;

        let decoder = symphonia::default::get_codecs().make(params, &DecoderOptions::default())?;

        debug!(
            path = %path.display(),
            sample_rate,
            channels,
            duration = ?duration,
            "Opened file source"
        );

        Ok(Self {
            path,
            reader,
            decoder,
            track_id,
            time_base,
            sample_rate,
            channels,
            duration,
            gain,
            pending: Vec::new(),
            pending_pos: 0,
            sample_buf: None,
            skip_frames: 0,
            frames_read: 0,
            eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total length, when the container reports a frame count
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// ReplayGain tags found in the file
    pub fn gain(&self) -> GainInfo {
        self.gain
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns `false` at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // A corrupt packet is skipped, not fatal
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(path = %self.path.display(), "Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let needed = decoded.capacity() * decoded.spec().channels.count();
            if !matches!(&self.sample_buf, Some(buf) if buf.capacity() >= needed) {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let channels = usize::from(self.channels);
            let mut samples = buf.samples();
            if self.skip_frames > 0 {
                let frames = (samples.len() / channels) as u64;
                let skip = self.skip_frames.min(frames);
                self.skip_frames -= skip;
                samples = &samples[skip as usize * channels..];
            }

            self.pending.clear();
            self.pending.extend_from_slice(samples);
            self.pending_pos = 0;
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl AudioSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn read(&mut self, buffer: &mut [f32]) -> cadence_playback::Result<usize> {
        let channels = usize::from(self.channels);
        let wanted = buffer.len() - buffer.len() % channels;
        let mut written = 0;

        while written < wanted {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.decode_next_packet()? {
                    self.eof = true;
                    break;
                }
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(wanted - written);
            buffer[written..written + n].copy_from_slice(&available[..n]);
            self.pending_pos += n;
            written += n;
        }

        self.frames_read += (written / channels) as u64;
        Ok(written)
    }

    fn seek(&mut self, position: Duration) -> cadence_playback::Result<()> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: position.into(),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Decode(format!("seek failed: {}", e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.eof = false;

        // The reader may land before the target; decode and drop up to it
        self.skip_frames = match self.time_base {
            Some(tb) if seeked.required_ts > seeked.actual_ts => {
                let seconds = (seeked.required_ts - seeked.actual_ts) as f64 * f64::from(tb.numer)
                    / f64::from(tb.denom);
                (seconds * f64::from(self.sample_rate)).round() as u64
            }
            _ => 0,
        };
        self.frames_read = (position.as_secs_f64() * f64::from(self.sample_rate)).round() as u64;
        Ok(())
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.frames_read as f64 / f64::from(self.sample_rate))
    }
}

fn read_gain_tags(revision: &MetadataRevision, gain: &mut GainInfo) {
    for tag in revision.tags() {
        let Some(key) = tag.std_key else { continue };
        let value = parse_gain_value(&tag.value.to_string());
        match key {
            StandardTagKey::ReplayGainTrackGain => gain.track_gain_db = value.or(gain.track_gain_db),
            StandardTagKey::ReplayGainTrackPeak => gain.track_peak = value.or(gain.track_peak),
            StandardTagKey::ReplayGainAlbumGain => gain.album_gain_db = value.or(gain.album_gain_db),
            StandardTagKey::ReplayGainAlbumPeak => gain.album_peak = value.or(gain.album_peak),
            _ => {}
        }
    }
}

/// Parse a ReplayGain tag value such as `-6.48 dB` or `0.988525`
fn parse_gain_value(raw: &str) -> Option<f32> {
    let trimmed = raw.trim();
    let number = trimmed
        .strip_suffix("dB")
        .or_else(|| trimmed.strip_suffix("db"))
        .unwrap_or(trimmed)
        .trim();
    number.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Opens playlist items for the engine
///
/// Media strings are file paths, or `tone:<hz>` for a generated sine.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOpener;

impl FileOpener {
    pub fn new() -> Self {
        Self
    }

    /// Build a playlist item from a file, reading its length and gain tags
    pub fn probe(id: cadence_playback::ItemId, path: impl AsRef<Path>) -> Result<PlaybackItem> {
        let path = path.as_ref();
        let source = FileSource::open(path)?;
        let media = path.to_string_lossy().into_owned();
        let item = match source.duration() {
            Some(duration) => PlaybackItem::new(id, media, duration),
            None => PlaybackItem::stream(id, media),
        };
        Ok(item.with_gain(source.gain()))
    }
}

impl MediaOpener for FileOpener {
    fn open(&self, item: &PlaybackItem) -> cadence_playback::Result<Box<dyn AudioSource>> {
        let media = item.media();
        if let Some(frequency) = media.strip_prefix("tone:") {
            let frequency: f32 = frequency
                .trim()
                .parse()
                .map_err(|_| EngineError::Decode(format!("bad tone frequency '{}'", frequency)))?;
            return Ok(Box::new(ToneSource::new(
                frequency,
                TONE_SAMPLE_RATE,
                item.duration(),
            )));
        }
        if media.contains("://") {
            return Err(EngineError::Decode(format!(
                "network streams are not supported: {}",
                media
            )));
        }

        let source = FileSource::open(media)?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_gain_value() {
        assert_eq!(parse_gain_value("-6.48 dB"), Some(-6.48));
        assert_eq!(parse_gain_value(" +2.5 db "), Some(2.5));
        assert_eq!(parse_gain_value("0.988525"), Some(0.988525));
        assert_eq!(parse_gain_value("loud"), None);
        assert_eq!(parse_gain_value("NaN"), None);
    }

    #[test]
    fn test_tone_media() {
        let item = PlaybackItem::new(1, "tone:440", Duration::from_millis(100));
        let mut source = FileOpener::new().open(&item).unwrap();
        assert_eq!(source.sample_rate(), TONE_SAMPLE_RATE);

        let mut buffer = vec![0.0; 44100];
        assert_eq!(source.read(&mut buffer).unwrap(), 4410 * 2);
        assert_eq!(source.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_bad_media_is_decode_error() {
        let opener = FileOpener::new();
        let tone = PlaybackItem::new(1, "tone:abc", Duration::from_secs(1));
        assert!(matches!(opener.open(&tone), Err(EngineError::Decode(_))));

        let url = PlaybackItem::stream(2, "http://radio.example/stream");
        assert!(matches!(opener.open(&url), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let item = PlaybackItem::new(1, "/nonexistent/track.flac", Duration::from_secs(1));
        assert!(matches!(FileOpener::new().open(&item), Err(EngineError::Io(_))));
    }
}
