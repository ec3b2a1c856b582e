//! Engine handle
//!
//! [`Engine`] is what a UI holds. Commands lock the transport, apply the
//! change and return; the render thread picks the change up on its next
//! buffer. Queries read the same transport (or the lock-free level monitor)
//! and never wait on the device.

use crate::bling::Chime;
use crate::config::EngineConfig;
use crate::cursor::{Playlist, PlaylistCursor};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, PlaylistListener};
use crate::levels::{LevelMonitor, VuMeter, VuMeterThread};
use crate::render::{self, RenderRequest, Shared};
use crate::settings::{PitchRange, PlaybackSettings};
use crate::source::{AudioSource, MediaOpener};
use crate::transport::{AdvancePlan, SkipTarget, Transport};
use crate::types::{ItemId, LevelSample, OutputSnapshot, OutputState, PlaybackItem};
use crate::device::DeviceFactory;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Render thread request queue depth
const REQUEST_QUEUE_DEPTH: usize = 64;

/// Playback engine
///
/// Owns the render thread. Dropping the engine stops playback, closes the
/// device and joins the thread.
pub struct Engine {
    shared: Arc<Shared>,
    opener: Arc<dyn MediaOpener>,
    requests: Sender<RenderRequest>,
    listeners: Mutex<Vec<Arc<dyn PlaylistListener>>>,
    open_timeout: Duration,
    vu_decay: f32,
    render_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Validate `config` and start the render thread
    ///
    /// No device is opened until something needs to play.
    pub fn new(
        mut config: EngineConfig,
        factory: Box<dyn DeviceFactory>,
        opener: Arc<dyn MediaOpener>,
    ) -> Result<Self> {
        config.validate()?;

        let cursor = PlaylistCursor::new(Arc::new(Playlist::empty()));
        let transport = Transport::new(config.resolve(), config.playback, cursor);
        let shared = Arc::new(Shared::new(transport));

        let (requests, request_rx) = bounded(REQUEST_QUEUE_DEPTH);
        let render_thread = render::spawn(
            Arc::clone(&shared),
            Arc::clone(&opener),
            factory,
            config.output.clone(),
            request_rx,
        )?;

        info!(
            mode = ?config.output.mode,
            buffer_frames = config.output.buffer_frames,
            "Playback engine started"
        );

        Ok(Self {
            shared,
            opener,
            requests,
            listeners: Mutex::new(Vec::new()),
            open_timeout: config.output.open_timeout(),
            vu_decay: config.vu.decay,
            render_thread: Some(render_thread),
        })
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.shared.lock()
    }

    fn wake(&self) {
        // A full queue already has a wake-up pending
        let _ = self.requests.try_send(RenderRequest::Wake);
    }

    // ===== Transport commands =====

    /// Play `item` from `position`
    ///
    /// An invalid item or a position past the item's duration is ignored.
    /// If the item cannot be opened or positioned the error is reported and
    /// returned, and whatever was playing carries on.
    /// Returns once the device is open and rendering has started.
    pub fn play(&self, item: PlaybackItem, position: Duration) -> Result<()> {
        if !item.is_valid() {
            debug!("Ignoring play of invalid item");
            return Ok(());
        }
        if item.duration().is_some_and(|duration| position > duration) {
            debug!(item = item.id(), ?position, "Ignoring play beyond item duration");
            return Ok(());
        }

        let source = match self.open_source(&item, position) {
            Ok(source) => source,
            Err(e) => {
                warn!(item = item.id(), "Could not open item: {}", e);
                self.transport().record_error(EngineError::Decode(e.to_string()));
                return Err(e);
            }
        };

        debug!(item = item.id(), ?position, "Play");
        self.transport().play(item, source);
        self.ensure_output()
    }

    /// Switch to `playlist` and play its item `item_id` from the start
    pub fn play_from(&self, playlist: Arc<Playlist>, item_id: ItemId) -> Result<()> {
        let item = playlist.get(item_id).cloned();
        self.set_playlist(playlist);
        match item {
            Some(item) => self.play(item, Duration::ZERO),
            None => Err(EngineError::InvalidCommand(format!(
                "item {} is not in the playlist",
                item_id
            ))),
        }
    }

    pub fn pause(&self) {
        if self.transport().pause() {
            self.wake();
        }
    }

    pub fn resume(&self) {
        if self.transport().resume() {
            self.wake();
        }
    }

    pub fn stop(&self) {
        self.transport().stop();
        self.wake();
    }

    /// Play the item the cursor resolves next; no-op at the end of the playlist
    pub fn next(&self) -> Result<()> {
        let item = self.transport().resolve_next();
        match item {
            Some(item) => self.play(item, Duration::ZERO),
            None => {
                debug!("No next item");
                Ok(())
            }
        }
    }

    /// Restart the current item or play the previous one
    pub fn previous(&self) -> Result<()> {
        let target = self.transport().resolve_previous();
        self.go_to(target)
    }

    pub fn skip_forward(&self) -> Result<()> {
        let target = self.transport().skip_forward_target();
        self.go_to(target)
    }

    pub fn skip_backward(&self) -> Result<()> {
        let target = self.transport().skip_backward_target();
        self.go_to(target)
    }

    pub fn seek(&self, position: Duration) -> Result<()> {
        self.transport().seek(position)
    }

    fn go_to(&self, target: SkipTarget) -> Result<()> {
        match target {
            SkipTarget::Seek(position) => self.seek(position),
            SkipTarget::Play(item) => self.play(item, Duration::ZERO),
            SkipTarget::Nothing => Ok(()),
        }
    }

    /// Start or cancel a fade-out; returns whether the request was honoured
    pub fn toggle_fade_out(&self) -> bool {
        self.transport().toggle_fade_out()
    }

    /// Start or cancel a fade into the next item
    pub fn toggle_fade_to_next(&self) {
        let plan = self.transport().toggle_fade_to_next();
        self.complete_advance(plan);
    }

    /// Play notification chime `n` (1..=4); other values are ignored
    pub fn bling(&self, n: u8) {
        match Chime::new(n) {
            Some(chime) => {
                if self.requests.try_send(RenderRequest::Bling(chime)).is_err() {
                    warn!("Render thread busy, chime dropped");
                }
            }
            None => debug!(n, "Ignoring unknown chime"),
        }
    }

    // ===== Playlist =====

    /// Replace the active playlist
    ///
    /// Listeners are called on this thread when the playlist identity changes.
    pub fn set_playlist(&self, playlist: Arc<Playlist>) {
        let changed = self.transport().set_playlist(Arc::clone(&playlist));
        if changed {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in listeners {
                listener.on_playlist_changed(&playlist);
            }
        }
    }

    pub fn add_playlist_listener(&self, listener: Arc<dyn PlaylistListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn playlist(&self) -> Arc<Playlist> {
        Arc::clone(self.transport().playlist())
    }

    // ===== Settings =====

    pub fn set_volume(&self, volume: f32) {
        self.transport().set_volume(volume);
    }

    pub fn volume_up(&self) {
        self.transport().volume_up();
    }

    pub fn volume_down(&self) {
        self.transport().volume_down();
    }

    pub fn toggle_muted(&self) {
        self.transport().toggle_muted();
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.transport().set_pitch(pitch);
    }

    pub fn pitch_up(&self) {
        self.transport().pitch_up();
    }

    pub fn pitch_down(&self) {
        self.transport().pitch_down();
    }

    pub fn pitch_reset(&self) {
        self.transport().set_pitch(1.0);
    }

    pub fn set_pitch_range(&self, range: PitchRange) {
        self.transport().set_pitch_range(range);
    }

    pub fn set_crossfade(&self, enabled: bool) {
        self.transport().set_crossfade(enabled);
    }

    pub fn set_random_play(&self, enabled: bool) {
        self.transport().set_random_play(enabled);
    }

    pub fn set_repeat_track(&self, enabled: bool) {
        self.transport().set_repeat_track(enabled);
    }

    pub fn set_repeat_playlist(&self, enabled: bool) {
        self.transport().set_repeat_playlist(enabled);
    }

    pub fn toggle_stop_at_track_end(&self) {
        self.transport().toggle_stop_at_track_end();
    }

    // ===== Queries =====

    pub fn state(&self) -> OutputState {
        self.transport().state()
    }

    pub fn current_playing(&self) -> OutputSnapshot {
        self.transport().snapshot()
    }

    /// Peak levels of the last rendered buffer
    pub fn levels(&self) -> LevelSample {
        self.shared.levels.levels()
    }

    pub fn level_monitor(&self) -> Arc<LevelMonitor> {
        Arc::clone(&self.shared.levels)
    }

    /// Start a VU meter polling thread using the configured decay
    pub fn spawn_vu_meter<F>(&self, stereo: bool, on_update: F) -> Result<VuMeterThread>
    where
        F: FnMut(LevelSample) + Send + 'static,
    {
        let meter = VuMeter::new(self.vu_decay, stereo);
        Ok(VuMeterThread::spawn(self.level_monitor(), meter, on_update)?)
    }

    pub fn settings(&self) -> PlaybackSettings {
        *self.transport().settings()
    }

    pub fn volume(&self) -> f32 {
        self.settings().volume
    }

    pub fn pitch(&self) -> f32 {
        self.settings().pitch
    }

    pub fn pitch_range(&self) -> PitchRange {
        self.settings().pitch_range
    }

    pub fn crossfade(&self) -> bool {
        self.settings().crossfade
    }

    pub fn random_play(&self) -> bool {
        self.settings().random_play
    }

    pub fn repeat_track(&self) -> bool {
        self.settings().repeat_track
    }

    pub fn repeat_playlist(&self) -> bool {
        self.settings().repeat_playlist
    }

    pub fn stop_at_track_end(&self) -> bool {
        self.settings().stop_at_track_end
    }

    pub fn muted(&self) -> bool {
        self.settings().muted
    }

    pub fn fade_out(&self) -> bool {
        self.transport().is_fade_out()
    }

    pub fn fade_to_next(&self) -> bool {
        self.transport().is_fade_to_next()
    }

    /// Events queued since the last call, oldest first
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.transport().drain_events()
    }

    /// Most recent error, cleared by reading
    pub fn take_error(&self) -> Option<EngineError> {
        self.transport().take_error()
    }

    // ===== Internals =====

    fn open_source(&self, item: &PlaybackItem, position: Duration) -> Result<Box<dyn AudioSource>> {
        let mut source = self.opener.open(item)?;
        if !position.is_zero() {
            source.seek(position)?;
        }
        Ok(source)
    }

    /// Ask the render thread for a device and wait up to the open timeout
    fn ensure_output(&self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .requests
            .send(RenderRequest::Open { reply: reply_tx })
            .is_err()
        {
            let error = EngineError::DeviceUnavailable("render thread is not running".into());
            self.transport().stop();
            return Err(error);
        }

        match reply_rx.recv_timeout(self.open_timeout) {
            Ok(Ok(format)) => {
                debug!(sample_rate = format.sample_rate, "Output ready");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => {
                warn!("Audio device did not open within {:?}", self.open_timeout);
                self.transport()
                    .fail(EngineError::OpenTimeout(self.open_timeout));
                Err(EngineError::OpenTimeout(self.open_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.transport().stop();
                Err(EngineError::DeviceUnavailable("render thread exited".into()))
            }
        }
    }

    /// Open sources requested by the transport outside its lock
    fn complete_advance(&self, mut plan: AdvancePlan) {
        while let AdvancePlan::Open(request) = plan {
            let result = self.opener.open(request.item());
            plan = self.transport().finish_advance(request, result);
        }
        self.wake();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.transport().stop();
        let _ = self.requests.send(RenderRequest::Shutdown);
        if let Some(handle) = self.render_thread.take() {
            if handle.join().is_err() {
                warn!("Render thread panicked during shutdown");
            }
        }
        debug!("Playback engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputConfig, OutputMode};
    use crate::device::{DeviceBackend, DeviceFormat};
    use crate::error::DeviceError;
    use crate::source::ToneSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    const RATE: u32 = 8000;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        flushed: AtomicUsize,
        buffers: AtomicUsize,
    }

    struct TestDevice {
        counters: Arc<Counters>,
        mode: OutputMode,
    }

    impl DeviceBackend for TestDevice {
        fn format(&self) -> DeviceFormat {
            DeviceFormat::stereo(RATE)
        }

        fn mode(&self) -> OutputMode {
            self.mode
        }

        fn write(&mut self, _samples: &[f32]) -> std::result::Result<(), DeviceError> {
            self.counters.buffers.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Ok(())
        }

        fn flush(&mut self) {
            self.counters.flushed.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestFactory {
        counters: Arc<Counters>,
        fail: bool,
    }

    impl DeviceFactory for TestFactory {
        fn open(
            &mut self,
            config: &OutputConfig,
            _format: DeviceFormat,
        ) -> std::result::Result<Box<dyn DeviceBackend>, DeviceError> {
            if self.fail {
                return Err(DeviceError::Unavailable("no hardware".into()));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestDevice {
                counters: Arc::clone(&self.counters),
                mode: config.mode,
            }))
        }
    }

    fn tone_opener() -> Arc<dyn MediaOpener> {
        Arc::new(|item: &PlaybackItem| -> Result<Box<dyn AudioSource>> {
            Ok(Box::new(ToneSource::new(440.0, RATE, item.duration())))
        })
    }

    fn engine(fail: bool) -> (Engine, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let mut config = EngineConfig::default();
        config.output.buffer_frames = 80;
        config.output.open_timeout_ms = 1000;
        let engine = Engine::new(
            config,
            Box::new(TestFactory {
                counters: Arc::clone(&counters),
                fail,
            }),
            tone_opener(),
        )
        .unwrap();
        (engine, counters)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_play_opens_device_and_renders() {
        let (engine, counters) = engine(false);
        engine
            .play(PlaybackItem::new(1, "tone", Duration::from_secs(5)), Duration::ZERO)
            .unwrap();

        assert_eq!(engine.state(), OutputState::Playing);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert!(wait_for(|| counters.buffers.load(Ordering::SeqCst) > 3));
        assert!(wait_for(|| engine.levels().mono() > 0.0));
        assert_eq!(engine.current_playing().item_id(), 1);
    }

    #[test]
    fn test_invalid_play_is_ignored() {
        let (engine, counters) = engine(false);
        engine
            .play(PlaybackItem::new(0, "tone", Duration::from_secs(5)), Duration::ZERO)
            .unwrap();
        engine
            .play(
                PlaybackItem::new(1, "tone", Duration::from_secs(5)),
                Duration::from_secs(6),
            )
            .unwrap();

        assert_eq!(engine.state(), OutputState::Stopped);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_device_failure_stops_and_reports() {
        let (engine, _) = engine(true);
        let result = engine.play(PlaybackItem::new(1, "tone", Duration::from_secs(5)), Duration::ZERO);

        assert!(matches!(result, Err(EngineError::DeviceUnavailable(_))));
        assert_eq!(engine.state(), OutputState::Stopped);
        assert!(engine.take_error().is_some());
    }

    #[test]
    fn test_stop_closes_device() {
        let (engine, counters) = engine(false);
        engine
            .play(PlaybackItem::new(1, "tone", Duration::from_secs(5)), Duration::ZERO)
            .unwrap();
        engine.stop();
        engine.stop();

        assert_eq!(engine.state(), OutputState::Stopped);
        assert!(wait_for(|| counters.closed.load(Ordering::SeqCst) == 1));
        assert!(wait_for(|| engine.levels() == LevelSample::default()));
    }

    #[test]
    fn test_pause_stops_delivery() {
        let (engine, counters) = engine(false);
        engine
            .play(PlaybackItem::new(1, "tone", Duration::from_secs(5)), Duration::ZERO)
            .unwrap();
        engine.pause();
        assert_eq!(engine.state(), OutputState::Paused);

        // Let an in-flight buffer finish
        thread::sleep(Duration::from_millis(20));
        let written = counters.buffers.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.buffers.load(Ordering::SeqCst), written);

        engine.resume();
        assert_eq!(engine.state(), OutputState::Playing);
        assert!(wait_for(|| counters.buffers.load(Ordering::SeqCst) > written));
    }

    #[test]
    fn test_bling_while_stopped_uses_standard_device() {
        let (engine, counters) = engine(false);
        engine.bling(1);
        assert!(wait_for(|| counters.opened.load(Ordering::SeqCst) == 1));
        // The 400 ms chime ends and the device is released
        assert!(wait_for(|| counters.closed.load(Ordering::SeqCst) == 1));
        assert_eq!(engine.state(), OutputState::Stopped);

        engine.bling(9);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_under_chime_flushes_device() {
        let (engine, counters) = engine(false);
        engine
            .play(PlaybackItem::new(1, "tone", Duration::from_secs(5)), Duration::ZERO)
            .unwrap();
        assert!(wait_for(|| counters.buffers.load(Ordering::SeqCst) > 3));

        // The longest chime, picked up by the render thread before the stop
        engine.bling(4);
        thread::sleep(Duration::from_millis(10));
        engine.stop();

        // Flushed on stop while the chime keeps the device open
        assert!(wait_for(|| counters.flushed.load(Ordering::SeqCst) == 1));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);

        // And once more when the chime ends and the device closes
        assert!(wait_for(|| counters.closed.load(Ordering::SeqCst) == 1));
        assert_eq!(counters.flushed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_playlist_listener_fires_on_identity_change() {
        let (engine, _) = engine(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&calls);
        engine.add_playlist_listener(Arc::new(move |_: &Playlist| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        let playlist = Arc::new(Playlist::new(
            7,
            "mix",
            vec![PlaybackItem::new(1, "tone", Duration::from_secs(5))],
        ));
        engine.set_playlist(Arc::clone(&playlist));
        engine.set_playlist(playlist);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.playlist().id(), 7);
    }

    #[test]
    fn test_play_from_unknown_item() {
        let (engine, _) = engine(false);
        let playlist = Arc::new(Playlist::new(3, "a", Vec::new()));
        assert!(matches!(
            engine.play_from(playlist, 42),
            Err(EngineError::InvalidCommand(_))
        ));
        assert_eq!(engine.playlist().id(), 3);
    }

    #[test]
    fn test_settings_queries() {
        let (engine, _) = engine(false);
        engine.set_volume(1.7);
        engine.volume_down();
        engine.toggle_muted();
        engine.set_crossfade(true);
        engine.set_pitch(5.0);

        assert!((engine.volume() - 0.99).abs() < 1e-6);
        assert!(engine.muted());
        assert!(engine.crossfade());
        assert_eq!(engine.pitch(), engine.pitch_range().max());

        engine.pitch_reset();
        assert_eq!(engine.pitch(), 1.0);
        assert!(!engine.fade_out());
        assert!(!engine.fade_to_next());
    }
}
