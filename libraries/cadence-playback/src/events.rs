//! Engine events
//!
//! Events are queued by the transport and drained by the UI on its own
//! schedule. Nothing here is pushed across threads while a lock is held.
//!
//! Playlist changes are the one exception to polling: registered
//! [`PlaylistListener`]s are called synchronously from whichever thread made
//! the change.

use crate::crossfade::TransitionKind;
use crate::cursor::{Playlist, PlaylistId};
use crate::types::{ItemId, OutputState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Events kept before the oldest are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Transport state changed
    StateChanged {
        /// The new state
        state: OutputState,
    },

    /// A different item became current
    ///
    /// For a crossfade this is emitted when the incoming stream starts,
    /// not when the outgoing one is released.
    TrackChanged {
        /// New current item
        item_id: ItemId,
        /// Item that was current before, if any
        previous_id: Option<ItemId>,
    },

    /// A fade began
    TransitionStarted {
        kind: TransitionKind,
        duration_ms: u64,
    },

    /// A fade reached full progress (or was cancelled)
    TransitionCompleted {
        kind: TransitionKind,
        cancelled: bool,
    },

    /// The active playlist identity changed
    PlaylistChanged { playlist_id: PlaylistId },

    /// Master volume or mute changed
    VolumeChanged { volume: f32, muted: bool },

    /// Recoverable error on any path
    Error { message: String },
}

/// Bounded FIFO of events
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<EngineEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EngineEvent) {
        if self.events.len() == EVENT_QUEUE_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Take everything queued so far, oldest first
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Observer for playlist identity changes
///
/// Called synchronously. Implementations must not block and must not call
/// back into the engine.
pub trait PlaylistListener: Send + Sync {
    fn on_playlist_changed(&self, playlist: &Playlist);
}

impl<F> PlaylistListener for F
where
    F: Fn(&Playlist) + Send + Sync,
{
    fn on_playlist_changed(&self, playlist: &Playlist) {
        self(playlist);
    }
}
