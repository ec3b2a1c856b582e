//! Transport state machine
//!
//! Owns the playback state, the current stream, any transition in progress,
//! the playlist cursor and the runtime settings. One `Transport` sits behind
//! the engine's mutex; the UI thread mutates it through commands and the
//! render thread drives it one buffer at a time through [`Transport::render`].
//!
//! Opening a source can be slow, so the transport never does it itself. When
//! it needs the next item it returns an [`AdvancePlan::Open`] request; the
//! caller opens the source without holding the lock and hands the result to
//! [`Transport::finish_advance`]. Until then the request is outstanding and
//! rendering does not ask for another one. A generation counter detects
//! requests made stale by a command issued in between.
//!
//! # Precedence
//!
//! When several end-of-item behaviours are enabled at once:
//!
//! 1. Explicit commands (Play, Stop, Next, Previous, Seek) cancel any fade.
//! 2. A running fade-out wins: end of stream stops, no automatic crossfade.
//! 3. Fade-to-next runs to completion even with stop-at-track-end set.
//! 4. Stop-at-track-end: end of stream stops, no automatic crossfade.
//! 5. Otherwise crossfade (if enabled) or a plain advance.

use crate::config::MixParams;
use crate::crossfade::{Ramp, TransitionContext, TransitionKind};
use crate::cursor::{CursorPolicy, Playlist, PlaylistCursor};
use crate::device::DeviceFormat;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventQueue};
use crate::mixer::{Mixer, Stream, StreamStatus};
use crate::settings::{PitchRange, PlaybackSettings, VOLUME_STEP};
use crate::source::AudioSource;
use crate::types::{ItemId, OutputSnapshot, OutputState, PlaybackItem};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Previous restarts the current item once this much of it has played
pub const PREVIOUS_RESTART_THRESHOLD: Duration = Duration::from_secs(3);

/// Skip forward/backward step
pub const SKIP_STEP: Duration = Duration::from_secs(5);

/// Why the transport wants another item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Current item ended
    EndOfStream,
    /// Current item is within the crossfade length of its end
    CrossfadeDue,
    /// User asked to fade into the next item
    FadeToNext,
}

/// An item the transport wants opened
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    generation: u64,
    reason: AdvanceReason,
    item: PlaybackItem,
}

impl AdvanceRequest {
    pub fn item(&self) -> &PlaybackItem {
        &self.item
    }

    pub fn reason(&self) -> AdvanceReason {
        self.reason
    }
}

/// What the caller has to do next
#[derive(Debug)]
pub enum AdvancePlan {
    Idle,
    Open(AdvanceRequest),
}

/// Where a skip lands
#[derive(Debug, Clone, PartialEq)]
pub enum SkipTarget {
    Seek(Duration),
    Play(PlaybackItem),
    Nothing,
}

pub struct Transport {
    state: OutputState,
    current: Option<Stream>,
    transition: Option<TransitionContext>,
    settings: PlaybackSettings,
    cursor: PlaylistCursor,
    mixer: Mixer,
    /// Bumped whenever the current stream is replaced or removed
    generation: u64,
    /// Cleared once a crossfade found no successor for the current item
    crossfade_armed: bool,
    /// Generation an advance request is outstanding for
    advance_pending: Option<u64>,
    /// Consecutive items that failed to open during an advance
    failures: usize,
    events: EventQueue,
    last_error: Option<EngineError>,
}

impl Transport {
    pub fn new(params: MixParams, settings: PlaybackSettings, cursor: PlaylistCursor) -> Self {
        Self {
            state: OutputState::Stopped,
            current: None,
            transition: None,
            mixer: Mixer::new(params, &settings),
            settings,
            cursor,
            generation: 0,
            crossfade_armed: false,
            advance_pending: None,
            failures: 0,
            events: EventQueue::new(),
            last_error: None,
        }
    }

    // ===== Queries =====

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    pub fn params(&self) -> &MixParams {
        self.mixer.params()
    }

    pub fn playlist(&self) -> &Arc<Playlist> {
        self.cursor.playlist()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_item(&self) -> Option<&PlaybackItem> {
        self.current.as_ref().map(Stream::item)
    }

    pub fn current_id(&self) -> Option<ItemId> {
        self.current_item().map(PlaybackItem::id)
    }

    pub fn position(&self) -> Duration {
        self.current.as_ref().map_or(Duration::ZERO, Stream::position)
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            state: self.state,
            item: self.current_item().cloned(),
            position: self.position(),
            stream_title: self.current.as_ref().and_then(Stream::stream_title),
        }
    }

    pub fn transition_kind(&self) -> Option<TransitionKind> {
        self.transition.as_ref().map(TransitionContext::kind)
    }

    pub fn transition_progress(&self) -> Option<f32> {
        self.transition.as_ref().map(TransitionContext::progress)
    }

    pub fn is_fade_out(&self) -> bool {
        self.transition_kind() == Some(TransitionKind::FadeOut)
    }

    pub fn is_fade_to_next(&self) -> bool {
        self.transition_kind() == Some(TransitionKind::FadeToNext)
    }

    /// Device format matching the current source
    pub fn preferred_format(&self) -> DeviceFormat {
        self.current
            .as_ref()
            .map_or_else(DeviceFormat::default, |s| DeviceFormat::stereo(s.sample_rate()))
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain()
    }

    pub fn take_error(&mut self) -> Option<EngineError> {
        self.last_error.take()
    }

    // ===== Transport commands =====

    /// Start rendering `item` from an already opened and positioned source
    ///
    /// While playing with crossfade enabled the current stream becomes the
    /// outgoing side of a crossfade instead of being cut.
    pub fn play(&mut self, item: PlaybackItem, source: Box<dyn AudioSource>) {
        let stream = self.mixer.stream(item, source);
        let crossfade = self.state == OutputState::Playing
            && self.settings.crossfade
            && !self.params().crossfade.is_zero();

        let previous_id = self.current_id();
        let level = self.current_level();
        self.drop_transition(true);
        if let Some(outgoing) = self.current.take() {
            if crossfade {
                self.begin_overlap(TransitionKind::Crossfade, outgoing, level);
            }
        }

        self.failures = 0;
        self.install(stream, previous_id);
        self.set_state(OutputState::Playing);
    }

    pub fn pause(&mut self) -> bool {
        if self.state != OutputState::Playing {
            return false;
        }
        self.set_state(OutputState::Paused);
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != OutputState::Paused {
            return false;
        }
        self.set_state(OutputState::Playing);
        true
    }

    /// Tear down every stream and any fade. Idempotent.
    pub fn stop(&mut self) {
        self.drop_transition(true);
        if self.current.take().is_some() {
            self.generation += 1;
        }
        self.set_state(OutputState::Stopped);
    }

    /// Stop and report `error`
    pub fn fail(&mut self, error: EngineError) {
        self.stop();
        self.record_error(error);
    }

    pub fn record_error(&mut self, error: EngineError) {
        self.events.push(EngineEvent::Error {
            message: error.to_string(),
        });
        self.last_error = Some(error);
    }

    /// Seek within the current item
    ///
    /// Ignored when stopped or when `position` lies beyond the item's duration.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        if self.state == OutputState::Stopped {
            return Ok(());
        }
        if self
            .current_item()
            .and_then(PlaybackItem::duration)
            .is_some_and(|duration| position > duration)
        {
            debug!(?position, "Seek beyond duration ignored");
            return Ok(());
        }

        self.cancel_transition();
        if let Some(stream) = self.current.as_mut() {
            stream.seek(position)?;
            self.crossfade_armed = true;
        }
        Ok(())
    }

    /// Item Next should play, `None` at the end of a non-repeating playlist
    pub fn resolve_next(&mut self) -> Option<PlaybackItem> {
        let policy = CursorPolicy::from(&self.settings);
        self.cursor.next(self.current_id(), policy)
    }

    /// Where Previous should go
    ///
    /// Restarts the current item when it has played past the threshold or has
    /// no predecessor.
    pub fn resolve_previous(&mut self) -> SkipTarget {
        let current = self.current_id();
        if self.position() > PREVIOUS_RESTART_THRESHOLD {
            return SkipTarget::Seek(Duration::ZERO);
        }
        let policy = CursorPolicy::from(&self.settings);
        match self.cursor.previous(current, policy) {
            Some(item) => SkipTarget::Play(item),
            None if current.is_some() => SkipTarget::Seek(Duration::ZERO),
            None => SkipTarget::Nothing,
        }
    }

    pub fn skip_forward_target(&mut self) -> SkipTarget {
        if self.state == OutputState::Stopped {
            return SkipTarget::Nothing;
        }
        let Some(duration) = self.current_item().and_then(PlaybackItem::duration) else {
            return SkipTarget::Nothing;
        };
        let target = self.position() + SKIP_STEP;
        if target <= duration {
            return SkipTarget::Seek(target);
        }
        self.resolve_next().map_or(SkipTarget::Nothing, SkipTarget::Play)
    }

    pub fn skip_backward_target(&mut self) -> SkipTarget {
        if self.state == OutputState::Stopped || self.current.is_none() {
            return SkipTarget::Nothing;
        }
        let position = self.position();
        if position >= SKIP_STEP {
            return SkipTarget::Seek(position - SKIP_STEP);
        }
        let policy = CursorPolicy::from(&self.settings);
        match self.cursor.previous(self.current_id(), policy) {
            Some(item) => SkipTarget::Play(item),
            None => SkipTarget::Seek(Duration::ZERO),
        }
    }

    /// Replace the active playlist, returning `true` if its identity changed
    pub fn set_playlist(&mut self, playlist: Arc<Playlist>) -> bool {
        let id = playlist.id();
        let changed = self.cursor.set_playlist(playlist);
        if changed {
            debug!(playlist = id, "Playlist changed");
            self.events.push(EngineEvent::PlaylistChanged { playlist_id: id });
        }
        changed
    }

    // ===== Fades =====

    /// Start or cancel a fade-out of the current item
    ///
    /// Returns `false` when the request is not allowed in the current state.
    pub fn toggle_fade_out(&mut self) -> bool {
        match self.transition_kind() {
            Some(TransitionKind::FadeOut) => {
                self.cancel_transition();
                true
            }
            Some(_) => false,
            None if self.state == OutputState::Playing && self.current.is_some() => {
                self.begin_fade_out();
                true
            }
            None => false,
        }
    }

    /// Start or cancel a fade into the next item
    ///
    /// Starting returns the item to open; with no successor the current item
    /// fades out instead.
    pub fn toggle_fade_to_next(&mut self) -> AdvancePlan {
        match self.transition_kind() {
            Some(TransitionKind::FadeToNext) => {
                self.cancel_transition();
                AdvancePlan::Idle
            }
            Some(_) => AdvancePlan::Idle,
            None => {
                let allowed = self.state == OutputState::Playing
                    && self.current_item().is_some_and(|item| !item.is_stream());
                if allowed {
                    self.plan_next(AdvanceReason::FadeToNext)
                } else {
                    AdvancePlan::Idle
                }
            }
        }
    }

    // ===== Settings =====

    pub fn set_volume(&mut self, volume: f32) {
        self.settings.set_volume(volume);
        self.volume_changed();
    }

    pub fn volume_up(&mut self) {
        self.set_volume(self.settings.volume + VOLUME_STEP);
    }

    pub fn volume_down(&mut self) {
        self.set_volume(self.settings.volume - VOLUME_STEP);
    }

    pub fn toggle_muted(&mut self) {
        self.settings.muted = !self.settings.muted;
        self.volume_changed();
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.settings.set_pitch(pitch);
    }

    pub fn pitch_up(&mut self) {
        self.set_pitch(self.settings.pitch + self.settings.pitch_range.step());
    }

    pub fn pitch_down(&mut self) {
        self.set_pitch(self.settings.pitch - self.settings.pitch_range.step());
    }

    pub fn set_pitch_range(&mut self, range: PitchRange) {
        self.settings.set_pitch_range(range);
    }

    pub fn set_crossfade(&mut self, enabled: bool) {
        self.settings.crossfade = enabled;
    }

    pub fn set_random_play(&mut self, enabled: bool) {
        self.settings.random_play = enabled;
    }

    pub fn set_repeat_track(&mut self, enabled: bool) {
        self.settings.repeat_track = enabled;
    }

    pub fn set_repeat_playlist(&mut self, enabled: bool) {
        self.settings.repeat_playlist = enabled;
    }

    pub fn toggle_stop_at_track_end(&mut self) {
        self.settings.stop_at_track_end = !self.settings.stop_at_track_end;
    }

    fn volume_changed(&mut self) {
        self.events.push(EngineEvent::VolumeChanged {
            volume: self.settings.volume,
            muted: self.settings.muted,
        });
    }

    // ===== Render path =====

    /// Render one interleaved stereo buffer at `device_rate`
    ///
    /// Produces silence unless Playing. Settings are read once per call.
    pub fn render(&mut self, buffer: &mut [f32], device_rate: u32) -> AdvancePlan {
        buffer.fill(0.0);
        if self.state != OutputState::Playing {
            return AdvancePlan::Idle;
        }

        let settings = self.settings;
        let frames = buffer.len() / 2;
        let kind = self.transition_kind();

        let (down, up) = match self.transition.as_mut() {
            Some(transition) => transition.advance(frames, device_rate),
            None => (Ramp::UNITY, Ramp::UNITY),
        };

        if let Some(outgoing) = self.transition.as_mut().and_then(TransitionContext::outgoing_mut) {
            // An outgoing stream that ends early just renders silence
            outgoing.mix_into(buffer, device_rate, settings.pitch, down);
        }

        let ramp = match kind {
            None => Ramp::UNITY,
            Some(TransitionKind::FadeOut) => down,
            Some(_) => up,
        };
        let status = match self.current.as_mut() {
            Some(stream) => stream.mix_into(buffer, device_rate, settings.pitch, ramp),
            None => StreamStatus::Ended,
        };

        self.mixer.finish(buffer, device_rate, &settings);

        if self.transition.as_ref().is_some_and(TransitionContext::is_complete) {
            self.drop_transition(false);
            if kind == Some(TransitionKind::FadeOut) {
                debug!("Fade-out complete");
                self.stop();
                return AdvancePlan::Idle;
            }
        }

        match status {
            StreamStatus::Playing => {}
            StreamStatus::Ended => return self.end_of_stream(),
            StreamStatus::Failed(message) => {
                self.record_error(EngineError::Decode(message));
                return self.end_of_stream();
            }
        }

        if self.crossfade_due(&settings) {
            return self.plan_next(AdvanceReason::CrossfadeDue);
        }
        AdvancePlan::Idle
    }

    /// Complete a request returned by [`render`](Self::render) or
    /// [`toggle_fade_to_next`](Self::toggle_fade_to_next)
    pub fn finish_advance(
        &mut self,
        request: AdvanceRequest,
        result: Result<Box<dyn AudioSource>>,
    ) -> AdvancePlan {
        if self.advance_pending == Some(request.generation) {
            self.advance_pending = None;
        }
        if request.generation != self.generation || self.state == OutputState::Stopped {
            debug!(item = request.item.id(), "Dropping stale advance");
            return AdvancePlan::Idle;
        }
        if self.is_fade_out() {
            debug!(item = request.item.id(), "Fade-out running, dropping advance");
            return AdvancePlan::Idle;
        }

        match result {
            Ok(source) => {
                self.failures = 0;
                let previous_id = self.current_id();
                // The current item may have run out while the source was opening
                let reason = if self.current.as_ref().map_or(true, Stream::is_ended) {
                    AdvanceReason::EndOfStream
                } else {
                    request.reason
                };
                let stream = self.mixer.stream(request.item, source);
                match reason {
                    AdvanceReason::EndOfStream => {
                        self.drop_transition(false);
                        self.current = None;
                    }
                    AdvanceReason::CrossfadeDue | AdvanceReason::FadeToNext => {
                        let kind = if reason == AdvanceReason::CrossfadeDue {
                            TransitionKind::Crossfade
                        } else {
                            TransitionKind::FadeToNext
                        };
                        let level = self.current_level();
                        self.drop_transition(true);
                        if let Some(outgoing) = self.current.take() {
                            self.begin_overlap(kind, outgoing, level);
                        }
                    }
                }
                self.install(stream, previous_id);
                AdvancePlan::Idle
            }
            Err(e) => {
                warn!(item = request.item.id(), "Could not open next item: {}", e);
                self.record_error(e);
                self.failures += 1;
                if self.failures >= self.cursor.playlist().len().max(1) {
                    warn!("Every item failed to open, stopping");
                    self.failures = 0;
                    self.stop();
                    return AdvancePlan::Idle;
                }
                // Skip past the failed item, never repeating it
                let policy = CursorPolicy {
                    repeat_track: false,
                    ..CursorPolicy::from(&self.settings)
                };
                match self.cursor.next(Some(request.item.id()), policy) {
                    Some(item) => self.request_advance(request.reason, item),
                    None => self.no_successor(request.reason),
                }
            }
        }
    }

    fn end_of_stream(&mut self) -> AdvancePlan {
        match self.transition_kind() {
            Some(TransitionKind::FadeOut) => {
                self.stop();
                return AdvancePlan::Idle;
            }
            // The incoming item ended before the fade finished
            Some(_) => self.drop_transition(false),
            None => {}
        }

        if self.settings.stop_at_track_end {
            debug!("Stopping at track end");
            self.stop();
            return AdvancePlan::Idle;
        }
        self.plan_next(AdvanceReason::EndOfStream)
    }

    fn crossfade_due(&self, settings: &PlaybackSettings) -> bool {
        if !settings.crossfade
            || settings.stop_at_track_end
            || !self.crossfade_armed
            || self.transition.is_some()
        {
            return false;
        }
        let Some(stream) = self.current.as_ref() else {
            return false;
        };
        let Some(duration) = stream.item().duration() else {
            return false;
        };
        let length = self.params().crossfade.min(duration / 2);
        if length.is_zero() {
            return false;
        }
        // Remaining wall-clock time depends on the playback speed
        let remaining = duration.saturating_sub(stream.position()).as_secs_f32() / settings.pitch;
        remaining <= length.as_secs_f32()
    }

    fn plan_next(&mut self, reason: AdvanceReason) -> AdvancePlan {
        if self.advance_pending == Some(self.generation) {
            return AdvancePlan::Idle;
        }
        match self.resolve_next() {
            Some(item) => self.request_advance(reason, item),
            None => self.no_successor(reason),
        }
    }

    fn request_advance(&mut self, reason: AdvanceReason, item: PlaybackItem) -> AdvancePlan {
        self.advance_pending = Some(self.generation);
        AdvancePlan::Open(AdvanceRequest {
            generation: self.generation,
            reason,
            item,
        })
    }

    fn no_successor(&mut self, reason: AdvanceReason) -> AdvancePlan {
        match reason {
            AdvanceReason::EndOfStream => {
                debug!("End of playlist");
                self.stop();
            }
            AdvanceReason::CrossfadeDue => self.crossfade_armed = false,
            AdvanceReason::FadeToNext => self.begin_fade_out(),
        }
        AdvancePlan::Idle
    }

    // ===== Internals =====

    fn install(&mut self, stream: Stream, previous_id: Option<ItemId>) {
        let item_id = stream.item().id();
        self.cursor.mark_played(item_id);
        self.current = Some(stream);
        self.generation += 1;
        self.crossfade_armed = true;
        debug!(item = item_id, "Track changed");
        self.events.push(EngineEvent::TrackChanged { item_id, previous_id });
    }

    /// Gain the current stream is rendered at right now
    fn current_level(&self) -> f32 {
        match self.transition.as_ref() {
            None => 1.0,
            Some(transition) if transition.kind() == TransitionKind::FadeOut => {
                transition.fading_level()
            }
            Some(transition) => transition.progress(),
        }
    }

    fn begin_overlap(&mut self, kind: TransitionKind, outgoing: Stream, level: f32) {
        let duration = match kind {
            TransitionKind::FadeToNext => self.params().fade_to_next,
            _ => self.params().crossfade,
        };
        debug!(?kind, from = outgoing.item().id(), level, "Transition started");
        self.transition =
            Some(TransitionContext::overlap(kind, duration, outgoing).with_start_level(level));
        self.transition_started(kind, duration);
    }

    fn begin_fade_out(&mut self) {
        let duration = self.params().fade_out;
        debug!("Fade-out started");
        self.transition = Some(TransitionContext::fade_out(duration));
        self.transition_started(TransitionKind::FadeOut, duration);
    }

    fn transition_started(&mut self, kind: TransitionKind, duration: Duration) {
        self.events.push(EngineEvent::TransitionStarted {
            kind,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
    }

    /// Remove any transition, releasing the outgoing stream
    fn drop_transition(&mut self, cancelled: bool) {
        if let Some(transition) = self.transition.take() {
            let kind = transition.kind();
            drop(transition.into_outgoing());
            self.events.push(EngineEvent::TransitionCompleted { kind, cancelled });
        }
    }

    /// Undo a fade: a cancelled fade-to-next returns to the outgoing item
    fn cancel_transition(&mut self) {
        let Some(transition) = self.transition.take() else {
            return;
        };
        let kind = transition.kind();
        if kind == TransitionKind::FadeToNext {
            if let Some(outgoing) = transition.into_outgoing() {
                let item_id = outgoing.item().id();
                let previous_id = self.current_id();
                self.current = Some(outgoing);
                self.generation += 1;
                self.events.push(EngineEvent::TrackChanged { item_id, previous_id });
            }
        }
        debug!(?kind, "Transition cancelled");
        self.events.push(EngineEvent::TransitionCompleted { kind, cancelled: true });
    }

    fn set_state(&mut self, state: OutputState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Transport state");
            self.state = state;
            self.events.push(EngineEvent::StateChanged { state });
        }
    }
}
