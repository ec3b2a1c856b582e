//! Playlist cursor
//!
//! Resolves the next/previous item under the repeat and random policies.
//! Random play draws uniformly from the items not yet played in the current
//! playlist; the unplayed set refills when it runs dry or the playlist changes.

use crate::settings::PlaybackSettings;
use crate::types::{ItemId, PlaybackItem};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

pub type PlaylistId = u64;

/// An ordered set of items
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    id: PlaylistId,
    name: String,
    items: Vec<PlaybackItem>,
}

impl Playlist {
    pub fn new(id: PlaylistId, name: impl Into<String>, items: Vec<PlaybackItem>) -> Self {
        Self {
            id,
            name: name.into(),
            items,
        }
    }

    /// Placeholder used before the UI hands over a real playlist
    pub fn empty() -> Self {
        Self::new(0, "", Vec::new())
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[PlaybackItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn get(&self, id: ItemId) -> Option<&PlaybackItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn first(&self) -> Option<&PlaybackItem> {
        self.items.first()
    }
}

/// Policy flags the cursor cares about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorPolicy {
    pub random: bool,
    pub repeat_track: bool,
    pub repeat_playlist: bool,
}

impl From<&PlaybackSettings> for CursorPolicy {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            random: settings.random_play,
            repeat_track: settings.repeat_track,
            repeat_playlist: settings.repeat_playlist,
        }
    }
}

/// Next/previous resolution over one playlist
pub struct PlaylistCursor {
    playlist: Arc<Playlist>,
    unplayed: HashSet<ItemId>,
    rng: StdRng,
}

impl PlaylistCursor {
    pub fn new(playlist: Arc<Playlist>) -> Self {
        Self::with_rng(playlist, StdRng::from_entropy())
    }

    /// Deterministic random order (tests, reproducible sessions)
    pub fn with_seed(playlist: Arc<Playlist>, seed: u64) -> Self {
        Self::with_rng(playlist, StdRng::seed_from_u64(seed))
    }

    fn with_rng(playlist: Arc<Playlist>, rng: StdRng) -> Self {
        let unplayed = playlist.items().iter().map(PlaybackItem::id).collect();
        Self {
            playlist,
            unplayed,
            rng,
        }
    }

    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.playlist
    }

    /// Replace the playlist and refill the unplayed set
    ///
    /// Returns `true` when the playlist identity changed.
    pub fn set_playlist(&mut self, playlist: Arc<Playlist>) -> bool {
        let changed = playlist.id() != self.playlist.id();
        self.playlist = playlist;
        self.refill(None);
        changed
    }

    /// Remove an item from the unplayed set
    pub fn mark_played(&mut self, id: ItemId) {
        self.unplayed.remove(&id);
    }

    pub fn unplayed_count(&self) -> usize {
        self.unplayed.len()
    }

    /// Item after `current`, or `None` at the end of a non-repeating playlist
    pub fn next(&mut self, current: Option<ItemId>, policy: CursorPolicy) -> Option<PlaybackItem> {
        if let Some(item) = self.repeated(current, policy) {
            return Some(item);
        }
        if policy.random {
            return self.random(current);
        }

        let items = self.playlist.items();
        let next_index = match current.and_then(|id| self.playlist.index_of(id)) {
            None => 0,
            Some(index) if index + 1 < items.len() => index + 1,
            Some(_) if policy.repeat_playlist => 0,
            Some(_) => return None,
        };
        items.get(next_index).cloned()
    }

    /// Item before `current`, or `None` at the start of a non-repeating playlist
    pub fn previous(&mut self, current: Option<ItemId>, policy: CursorPolicy) -> Option<PlaybackItem> {
        if let Some(item) = self.repeated(current, policy) {
            return Some(item);
        }
        if policy.random {
            return self.random(current);
        }

        let items = self.playlist.items();
        let previous_index = match current.and_then(|id| self.playlist.index_of(id)) {
            None => 0,
            Some(0) if policy.repeat_playlist => items.len().checked_sub(1)?,
            Some(0) => return None,
            Some(index) => index - 1,
        };
        items.get(previous_index).cloned()
    }

    fn repeated(&self, current: Option<ItemId>, policy: CursorPolicy) -> Option<PlaybackItem> {
        if !policy.repeat_track {
            return None;
        }
        current.and_then(|id| self.playlist.get(id)).cloned()
    }

    fn random(&mut self, current: Option<ItemId>) -> Option<PlaybackItem> {
        if let Some(id) = current {
            self.unplayed.remove(&id);
        }
        if self.unplayed.is_empty() {
            self.refill(current);
        }

        let candidates: Vec<&PlaybackItem> = self
            .playlist
            .items()
            .iter()
            .filter(|item| self.unplayed.contains(&item.id()))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let chosen = candidates[self.rng.gen_range(0..candidates.len())].clone();
        self.unplayed.remove(&chosen.id());
        Some(chosen)
    }

    /// Refill with every item, leaving out `exclude` unless it is the only one
    fn refill(&mut self, exclude: Option<ItemId>) {
        self.unplayed = self.playlist.items().iter().map(PlaybackItem::id).collect();
        if let Some(id) = exclude {
            if self.unplayed.len() > 1 {
                self.unplayed.remove(&id);
            }
        }
    }
}
