//! # Queue Model
//!
//! Ordered tracks plus the shuffle and repeat metadata that decide how the
//! session moves through them.
//!
//! Tracks are kept in *storage order* (the order the caller supplied).
//! Traversal follows the *playback order*, a permutation of storage indices
//! that is either the identity or a shuffle. The *cursor* is a position in
//! the playback order, so "next" is always `cursor + 1` regardless of
//! shuffle. The engine's own queue mirrors the playback order, which makes
//! a cursor position directly usable as an engine queue index.
//!
//! Invariants:
//! - `order` is a permutation of `0..tracks.len()`
//! - `cursor` is `Some(p)` with `p < tracks.len()` iff the queue is non-empty

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{PlaybackError, Result};
use crate::track::{Track, TrackId};

/// What happens when playback reaches the end of a track or of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop after the last track.
    #[default]
    Off,
    /// Replay the current track.
    Track,
    /// Wrap around to the first track.
    Queue,
}

impl RepeatMode {
    /// Next mode in the player's repeat button cycle: off, queue, track.
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Queue,
            RepeatMode::Queue => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::Track => "track",
            RepeatMode::Queue => "queue",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Result of moving through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Playback continues at this playback-order position.
    At(usize),
    /// Repeat is off and the boundary was reached.
    Ended,
}

/// Outcome of [`Queue::remove_track`].
#[derive(Debug, Clone)]
pub struct Removal {
    pub track: Arc<Track>,
    /// Playback-order position the track occupied.
    pub position: usize,
    pub was_current: bool,
}

pub struct Queue {
    tracks: Vec<Arc<Track>>,
    order: Vec<usize>,
    cursor: Option<usize>,
    shuffled: bool,
    repeat: RepeatMode,
    rng: StdRng,
}

impl Queue {
    /// Empty queue with an entropy-seeded shuffle RNG.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Empty queue with a reproducible shuffle order.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            order: Vec::new(),
            cursor: None,
            shuffled: false,
            repeat: RepeatMode::Off,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Current position in playback order.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    /// Replace the queue, positioning the cursor on `tracks[start_index]`.
    ///
    /// An empty list clears the queue. With shuffle on, the new queue is
    /// shuffled with the start track first.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidQueueOperation`] if `start_index` is out of
    /// bounds; the queue is left untouched.
    pub fn set_queue(&mut self, tracks: Vec<Arc<Track>>, start_index: usize) -> Result<()> {
        if tracks.is_empty() {
            self.clear();
            return Ok(());
        }
        if start_index >= tracks.len() {
            return Err(PlaybackError::invalid(format!(
                "start index {} out of bounds for {} tracks",
                start_index,
                tracks.len()
            )));
        }

        self.order = (0..tracks.len()).collect();
        self.tracks = tracks;
        self.cursor = Some(start_index);
        if self.shuffled {
            self.reshuffle();
        }
        Ok(())
    }

    /// Drop all tracks. Shuffle and repeat settings are kept.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.order.clear();
        self.cursor = None;
    }

    pub fn current_track(&self) -> Option<&Arc<Track>> {
        self.cursor.and_then(|pos| self.track_at(pos))
    }

    /// Track at a playback-order position.
    pub fn track_at(&self, position: usize) -> Option<&Arc<Track>> {
        self.order.get(position).map(|&index| &self.tracks[index])
    }

    /// Playback-order position of the first track with this id.
    pub fn position_of(&self, id: &TrackId) -> Option<usize> {
        self.order
            .iter()
            .position(|&index| &self.tracks[index].id == id)
    }

    /// Tracks in playback order.
    pub fn tracks_in_order(&self) -> Vec<Arc<Track>> {
        self.order
            .iter()
            .map(|&index| Arc::clone(&self.tracks[index]))
            .collect()
    }

    /// Tracks in the order they were supplied.
    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }

    /// Where automatic progression would go from the cursor, without moving.
    ///
    /// Repeat `Track` stays put, `Queue` wraps at either end and `Off`
    /// reports [`Advance::Ended`] at the boundary.
    pub fn peek(&self, direction: Direction) -> Option<Advance> {
        let cursor = self.cursor?;
        let last = self.len() - 1;

        let advance = match (self.repeat, direction) {
            (RepeatMode::Track, _) => Advance::At(cursor),
            (_, Direction::Next) if cursor < last => Advance::At(cursor + 1),
            (_, Direction::Previous) if cursor > 0 => Advance::At(cursor - 1),
            (RepeatMode::Queue, Direction::Next) => Advance::At(0),
            (RepeatMode::Queue, Direction::Previous) => Advance::At(last),
            (RepeatMode::Off, _) => Advance::Ended,
        };
        Some(advance)
    }

    /// Move the cursor the way automatic progression would.
    ///
    /// The cursor is unchanged when the result is [`Advance::Ended`].
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidQueueOperation`] on an empty queue.
    pub fn advance(&mut self, direction: Direction) -> Result<Advance> {
        let advance = self
            .peek(direction)
            .ok_or_else(|| PlaybackError::invalid("cannot advance an empty queue"))?;
        if let Advance::At(position) = advance {
            self.cursor = Some(position);
        }
        Ok(advance)
    }

    /// Target of a user-initiated skip, without moving the cursor.
    ///
    /// Unlike [`Queue::peek`], repeat `Track` does not pin the cursor: a
    /// manual skip always leaves the track and wraps at the ends. With repeat
    /// `Off` skipping past either end is rejected.
    pub fn skip_target(&self, direction: Direction) -> Result<usize> {
        let cursor = self
            .cursor
            .ok_or_else(|| PlaybackError::invalid("cannot skip in an empty queue"))?;
        let last = self.len() - 1;

        match (direction, self.repeat) {
            (Direction::Next, _) if cursor < last => Ok(cursor + 1),
            (Direction::Previous, _) if cursor > 0 => Ok(cursor - 1),
            (_, RepeatMode::Off) => Err(PlaybackError::invalid(match direction {
                Direction::Next => "already at the last track",
                Direction::Previous => "already at the first track",
            })),
            (Direction::Next, _) => Ok(0),
            (Direction::Previous, _) => Ok(last),
        }
    }

    /// Put the cursor on a playback-order position.
    pub fn select(&mut self, position: usize) -> Result<&Arc<Track>> {
        if position >= self.len() {
            return Err(PlaybackError::invalid(format!(
                "position {} out of bounds for {} tracks",
                position,
                self.len()
            )));
        }
        self.cursor = Some(position);
        Ok(&self.tracks[self.order[position]])
    }

    /// Turn shuffle on or off.
    ///
    /// Enabling always draws a fresh permutation with the current track
    /// first, even when shuffle was already on. Disabling restores storage
    /// order and moves the cursor to the current track's original index.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled {
            self.shuffled = true;
            self.reshuffle();
        } else {
            self.shuffled = false;
            let current = self.cursor.map(|pos| self.order[pos]);
            self.order = (0..self.tracks.len()).collect();
            self.cursor = current;
        }
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    /// Remove the first track with this id.
    ///
    /// If it was the current track the cursor falls back one position
    /// (`max(old - 1, 0)`); an emptied queue has no cursor.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::InvalidQueueOperation`] if no queued track has this id.
    pub fn remove_track(&mut self, id: &TrackId) -> Result<Removal> {
        let position = self
            .position_of(id)
            .ok_or_else(|| PlaybackError::invalid(format!("track {} is not queued", id)))?;
        let index = self.order.remove(position);
        let track = self.tracks.remove(index);
        for slot in self.order.iter_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }

        let old = self.cursor;
        let was_current = old == Some(position);
        self.cursor = match old {
            _ if self.tracks.is_empty() => None,
            Some(cursor) if cursor == position => Some(cursor.saturating_sub(1)),
            Some(cursor) if cursor > position => Some(cursor - 1),
            other => other,
        };

        Ok(Removal {
            track,
            position,
            was_current,
        })
    }

    fn reshuffle(&mut self) {
        let current = self.cursor.map(|pos| self.order[pos]);
        let mut rest: Vec<usize> = (0..self.tracks.len())
            .filter(|&index| Some(index) != current)
            .collect();
        rest.shuffle(&mut self.rng);

        self.order = current.into_iter().chain(rest).collect();
        if current.is_some() {
            self.cursor = Some(0);
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.tracks.len())
            .field("order", &self.order)
            .field("cursor", &self.cursor)
            .field("shuffled", &self.shuffled)
            .field("repeat", &self.repeat)
            .finish()
    }
}
