//! Transitions between streams
//!
//! A [`TransitionContext`] exists only while a fade is running. Progress is
//! advanced per rendered buffer from the buffer duration and the configured
//! fade length, so fade timing does not depend on how often anyone polls.
//!
//! Gains are linear: the outgoing stream follows `1 - progress`, scaled by
//! the level it had when the fade began. The incoming stream follows
//! `progress`. Within a buffer the gain is interpolated per frame between the
//! progress at the start and at the end of the buffer.

use crate::mixer::Stream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROGRESS_EPSILON: f32 = 1e-5;

/// What a transition does when it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Automatic or Play-triggered overlap with the next item
    Crossfade,
    /// User-requested fade into the next item
    FadeToNext,
    /// Fade the current item to silence, then stop
    FadeOut,
}

/// Linear gain ramp across one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub from: f32,
    pub to: f32,
}

impl Ramp {
    pub const UNITY: Ramp = Ramp { from: 1.0, to: 1.0 };

    pub fn constant(gain: f32) -> Self {
        Self { from: gain, to: gain }
    }

    /// Gain for frame `index` of `frames`, reaching `to` on the last frame
    #[inline]
    pub fn gain_at(&self, index: usize, frames: usize) -> f32 {
        if frames == 0 {
            return self.to;
        }
        let t = (index + 1) as f32 / frames as f32;
        self.from + (self.to - self.from) * t
    }

    pub fn scaled(&self, gain: f32) -> Self {
        Self {
            from: self.from * gain,
            to: self.to * gain,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.from == 0.0 && self.to == 0.0
    }
}

/// Fade position in `[0.0, 1.0]`, only ever moving forward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeProgress {
    progress: f32,
    duration_secs: f32,
}

impl FadeProgress {
    pub fn new(duration: Duration) -> Self {
        Self {
            progress: 0.0,
            duration_secs: duration.as_secs_f32(),
        }
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.duration_secs)
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Advance by one buffer, returning progress before and after
    pub fn advance(&mut self, frames: usize, sample_rate: u32) -> (f32, f32) {
        let start = self.progress;
        self.progress = if self.duration_secs <= 0.0 || sample_rate == 0 {
            1.0
        } else {
            let next = start + frames as f32 / sample_rate as f32 / self.duration_secs;
            // Accumulated rounding must not leave a fade one buffer short
            if next >= 1.0 - PROGRESS_EPSILON {
                1.0
            } else {
                next
            }
        };
        (start, self.progress)
    }
}

/// A fade in progress
pub struct TransitionContext {
    kind: TransitionKind,
    fade: FadeProgress,
    /// Level the fading stream starts from
    start_level: f32,
    outgoing: Option<Stream>,
}

impl TransitionContext {
    /// Fade `outgoing` down while the new current stream fades up
    pub fn overlap(kind: TransitionKind, duration: Duration, outgoing: Stream) -> Self {
        Self {
            kind,
            fade: FadeProgress::new(duration),
            start_level: 1.0,
            outgoing: Some(outgoing),
        }
    }

    /// Start the fading stream at `level` instead of full gain
    pub fn with_start_level(mut self, level: f32) -> Self {
        self.start_level = level.clamp(0.0, 1.0);
        self
    }

    /// Fade the current stream down with nothing following
    pub fn fade_out(duration: Duration) -> Self {
        Self {
            kind: TransitionKind::FadeOut,
            fade: FadeProgress::new(duration),
            start_level: 1.0,
            outgoing: None,
        }
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn progress(&self) -> f32 {
        self.fade.progress()
    }

    pub fn duration(&self) -> Duration {
        self.fade.duration()
    }

    pub fn is_complete(&self) -> bool {
        self.fade.is_complete()
    }

    /// Current gain of the stream being faded down
    pub fn fading_level(&self) -> f32 {
        self.start_level * (1.0 - self.fade.progress())
    }

    /// Advance by one buffer and return `(outgoing, incoming)` ramps
    ///
    /// For a fade-out the first ramp applies to the current stream and the
    /// second is unused.
    pub fn advance(&mut self, frames: usize, sample_rate: u32) -> (Ramp, Ramp) {
        let (start, end) = self.fade.advance(frames, sample_rate);
        (
            Ramp {
                from: self.start_level * (1.0 - start),
                to: self.start_level * (1.0 - end),
            },
            Ramp { from: start, to: end },
        )
    }

    pub fn outgoing_mut(&mut self) -> Option<&mut Stream> {
        self.outgoing.as_mut()
    }

    pub fn outgoing(&self) -> Option<&Stream> {
        self.outgoing.as_ref()
    }

    /// Give up the outgoing stream (completion or cancellation)
    pub fn into_outgoing(self) -> Option<Stream> {
        self.outgoing
    }
}

impl std::fmt::Debug for TransitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionContext")
            .field("kind", &self.kind)
            .field("progress", &self.fade.progress())
            .field("outgoing", &self.outgoing.as_ref().map(|s| s.item().id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reaches_exactly_one() {
        let mut fade = FadeProgress::new(Duration::from_millis(100));
        let mut last = 0.0;
        for _ in 0..20 {
            let (start, end) = fade.advance(1000, 44100);
            assert_eq!(start, last);
            assert!(end >= start);
            last = end;
        }
        assert_eq!(fade.progress(), 1.0);
        assert!(fade.is_complete());
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let mut fade = FadeProgress::new(Duration::ZERO);
        assert_eq!(fade.advance(1, 44100), (0.0, 1.0));
    }

    #[test]
    fn test_progress_step_matches_buffer_duration() {
        // 441 frames at 44.1 kHz is 10 ms of a 1 s fade
        let mut fade = FadeProgress::new(Duration::from_secs(1));
        let (_, end) = fade.advance(441, 44100);
        assert!((end - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_interpolation() {
        let ramp = Ramp { from: 1.0, to: 0.5 };
        assert!((ramp.gain_at(0, 4) - 0.875).abs() < 1e-6);
        assert_eq!(ramp.gain_at(3, 4), 0.5);
        assert_eq!(Ramp::UNITY.gain_at(7, 8), 1.0);
        assert!(Ramp::constant(0.0).is_silent());
        assert_eq!(Ramp { from: 1.0, to: 0.5 }.scaled(0.5), Ramp { from: 0.5, to: 0.25 });
    }

    #[test]
    fn test_fade_out_ramps_complement() {
        let mut context = TransitionContext::fade_out(Duration::from_secs(1));
        let (down, up) = context.advance(22050, 44100);
        assert_eq!(down, Ramp { from: 1.0, to: 0.5 });
        assert_eq!(up, Ramp { from: 0.0, to: 0.5 });
        assert_eq!(context.kind(), TransitionKind::FadeOut);
        assert!(context.outgoing().is_none());
    }

    #[test]
    fn test_start_level_scales_fading_ramp() {
        let mut context = TransitionContext::fade_out(Duration::from_secs(1)).with_start_level(0.5);
        assert_eq!(context.fading_level(), 0.5);
        let (down, up) = context.advance(22050, 44100);
        assert_eq!(down, Ramp { from: 0.5, to: 0.25 });
        assert_eq!(up, Ramp { from: 0.0, to: 0.5 });
        assert_eq!(context.fading_level(), 0.25);
    }
}
