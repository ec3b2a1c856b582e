//! Core types shared by the transport, mixer and UI snapshot

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable playlist entry identifier. `0` is never a valid item.
pub type ItemId = u64;

/// Stored loudness metadata (ReplayGain style)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GainInfo {
    /// Track gain in dB
    pub track_gain_db: Option<f32>,
    /// Track peak, linear amplitude
    pub track_peak: Option<f32>,
    /// Album gain in dB
    pub album_gain_db: Option<f32>,
    /// Album peak, linear amplitude
    pub album_peak: Option<f32>,
}

impl GainInfo {
    /// Track-only metadata
    pub fn track(gain_db: f32, peak: f32) -> Self {
        Self {
            track_gain_db: Some(gain_db),
            track_peak: Some(peak),
            ..Default::default()
        }
    }

    /// Add album metadata
    pub fn with_album(mut self, gain_db: f32, peak: f32) -> Self {
        self.album_gain_db = Some(gain_db);
        self.album_peak = Some(peak);
        self
    }
}

/// A playlist entry
///
/// Immutable once created: when metadata changes the item is replaced,
/// so clones handed to the UI never go stale mid-read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackItem {
    id: ItemId,
    media: String,
    duration: Option<Duration>,
    gain: GainInfo,
}

impl PlaybackItem {
    /// Create an item with a known duration
    pub fn new(id: ItemId, media: impl Into<String>, duration: Duration) -> Self {
        Self {
            id,
            media: media.into(),
            duration: Some(duration),
            gain: GainInfo::default(),
        }
    }

    /// Create a network stream item (no known duration)
    pub fn stream(id: ItemId, url: impl Into<String>) -> Self {
        Self {
            id,
            media: url.into(),
            duration: None,
            gain: GainInfo::default(),
        }
    }

    /// Replace the loudness metadata
    pub fn with_gain(mut self, gain: GainInfo) -> Self {
        self.gain = gain;
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Media reference (file path or URL)
    pub fn media(&self) -> &str {
        &self.media
    }

    /// Cached duration, `None` for streams
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn gain(&self) -> &GainInfo {
        &self.gain
    }

    pub fn is_stream(&self) -> bool {
        self.duration.is_none()
    }

    /// `false` for the reserved id 0
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }
}

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputState {
    /// Nothing is rendering
    #[default]
    Stopped,
    /// Frames are being delivered to the device
    Playing,
    /// Decode position and any transition are frozen
    Paused,
}

/// What the UI reads once per timer tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSnapshot {
    pub state: OutputState,
    pub item: Option<PlaybackItem>,
    pub position: Duration,
    /// Title reported by network sources
    pub stream_title: Option<String>,
}

impl OutputSnapshot {
    /// Id of the current item, `0` when stopped
    pub fn item_id(&self) -> ItemId {
        self.item.as_ref().map_or(0, PlaybackItem::id)
    }
}

/// Peak output level per channel, each in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSample {
    pub left: f32,
    pub right: f32,
}

impl LevelSample {
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
        }
    }

    /// Collapse to a single channel (max of left/right)
    pub fn mono(&self) -> f32 {
        self.left.max(self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_validity() {
        let item = PlaybackItem::new(1, "/music/a.flac", Duration::from_secs(10));
        assert!(item.is_valid());
        assert!(!item.is_stream());

        let invalid = PlaybackItem::new(0, "/music/b.flac", Duration::from_secs(10));
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_stream_item_has_no_duration() {
        let item = PlaybackItem::stream(7, "http://radio.example/stream");
        assert!(item.is_stream());
        assert_eq!(item.duration(), None);
    }

    #[test]
    fn test_level_sample_clamps_and_mono() {
        let level = LevelSample::new(1.4, -0.2);
        assert_eq!(level.left, 1.0);
        assert_eq!(level.right, 0.0);
        assert_eq!(LevelSample::new(0.3, 0.6).mono(), 0.6);
    }

    #[test]
    fn test_snapshot_item_id() {
        let mut snapshot = OutputSnapshot::default();
        assert_eq!(snapshot.item_id(), 0);
        snapshot.item = Some(PlaybackItem::new(4, "x", Duration::from_secs(1)));
        assert_eq!(snapshot.item_id(), 4);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = OutputSnapshot {
            state: OutputState::Paused,
            item: Some(PlaybackItem::new(3, "/music/c.mp3", Duration::from_secs(90))),
            position: Duration::from_secs(12),
            stream_title: None,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: OutputSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
