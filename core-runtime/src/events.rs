//! # Event Bus System
//!
//! Typed notifications published by the playback session core over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The session controller publishes its canonical state on a `watch`
//! channel; the event bus complements it with discrete, ordered transitions
//! that UI layers turn into toasts, analytics or accessibility
//! announcements. It consists of:
//! - **Event Types**: `CoreEvent` wrapping playback, queue and remote-sync events
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │  Reconciler  ├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│  UI layer  │
//!                                │ (broadcast│                  └────────────┘
//! ┌──────────────┐     emit      │  channel) │     subscribe    ┌────────────┐
//! │ Remote sync  ├──────────────>│           ├─────────────────>│ Analytics  │
//! └──────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, RemoteEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new(32);
//! let mut failures = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Remote(RemoteEvent::SyncFailed { .. })));
//!
//! bus.emit(CoreEvent::Remote(RemoteEvent::SyncFailed {
//!     track_id: Some("t-1".to_string()),
//!     operation: "like".to_string(),
//!     message: "HTTP 503".to_string(),
//! }))
//! .ok();
//!
//! let event = failures.recv().await.unwrap();
//! assert_eq!(event.description(), "Backend sync failed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal;
//!   re-read the session view to resynchronize.
//! - **`RecvError::Closed`**: the controller shut down.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Position updates arrive once per poll, so a subscriber has to stall for
/// well over a minute before it lags.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Everything published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session state transitions
    Playback(PlaybackEvent),
    /// Queue edits and mode changes
    Queue(QueueEvent),
    /// Backend telemetry and like sync
    Remote(RemoteEvent),
}

impl CoreEvent {
    /// Short label suitable for logs and toasts.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
            CoreEvent::Remote(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Remote(RemoteEvent::SyncFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::Loading { .. }) => EventSeverity::Info,
            CoreEvent::Remote(RemoteEvent::PlayRegistered { .. }) => EventSeverity::Info,
            CoreEvent::Queue(QueueEvent::Replaced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Track the event refers to, when there is one.
    pub fn track_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Playback(PlaybackEvent::Loading { track_id, .. })
            | CoreEvent::Playback(PlaybackEvent::Ready { track_id })
            | CoreEvent::Playback(PlaybackEvent::Playing { track_id, .. })
            | CoreEvent::Playback(PlaybackEvent::Paused { track_id, .. })
            | CoreEvent::Playback(PlaybackEvent::PositionChanged { track_id, .. })
            | CoreEvent::Queue(QueueEvent::TrackRemoved { track_id, .. })
            | CoreEvent::Remote(RemoteEvent::PlayRegistered { track_id, .. })
            | CoreEvent::Remote(RemoteEvent::LikeStatusChanged { track_id, .. }) => {
                Some(track_id)
            }
            CoreEvent::Playback(PlaybackEvent::Error { track_id, .. })
            | CoreEvent::Remote(RemoteEvent::SyncFailed { track_id, .. }) => track_id.as_deref(),
            _ => None,
        }
    }
}

/// Ordered so `EventStream::min_severity` can compare levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Transitions of the canonical session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A track is being loaded into the engine.
    Loading {
        track_id: String,
        title: String,
    },
    /// The track is loaded and paused at its start, waiting for `play`.
    Ready { track_id: String },
    /// The engine confirmed playback.
    Playing {
        track_id: String,
        /// Position when playback was confirmed (milliseconds).
        position_ms: u64,
    },
    /// Playback paused, by the user or externally.
    Paused {
        track_id: String,
        /// Position when paused (milliseconds).
        position_ms: u64,
    },
    /// Nothing is loaded.
    Idle,
    /// A skip was requested and the engine has not reported the new track yet.
    Busy { busy: bool },
    /// Position reported by the latest engine snapshot.
    PositionChanged {
        track_id: String,
        position_ms: u64,
        /// Track duration, when the engine knows it (milliseconds).
        duration_ms: Option<u64>,
    },
    /// The engine failed to play. `play` retries the current track.
    Error {
        track_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Loading { .. } => "Loading track",
            PlaybackEvent::Ready { .. } => "Track ready",
            PlaybackEvent::Playing { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Idle => "Playback idle",
            PlaybackEvent::Busy { .. } => "Skip in progress",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Changes to the play queue and its modes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// The queue contents were replaced.
    Replaced {
        track_count: usize,
        /// Storage index the new queue starts at.
        start_index: usize,
    },
    /// The queue was emptied.
    Cleared,
    /// A single track was removed.
    TrackRemoved { track_id: String, remaining: usize },
    /// Shuffle was turned on or off.
    ShuffleChanged { enabled: bool },
    /// Repeat mode changed; one of `"off"`, `"track"`, `"queue"`.
    RepeatModeChanged { mode: String },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Replaced { .. } => "Queue replaced",
            QueueEvent::Cleared => "Queue cleared",
            QueueEvent::TrackRemoved { .. } => "Track removed from queue",
            QueueEvent::ShuffleChanged { .. } => "Shuffle changed",
            QueueEvent::RepeatModeChanged { .. } => "Repeat mode changed",
        }
    }
}

// ============================================================================
// Remote Sync Events
// ============================================================================

/// Outcomes of best-effort backend calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RemoteEvent {
    /// The backend recorded a play and returned the track's like status.
    PlayRegistered { track_id: String, liked: bool },
    /// The like status of the current track changed, locally or from the backend.
    LikeStatusChanged { track_id: String, liked: bool },
    /// A backend call failed. Playback is unaffected.
    SyncFailed {
        track_id: Option<String>,
        /// `"play-event"`, `"like"` or `"unlike"`.
        operation: String,
        message: String,
    },
}

impl RemoteEvent {
    fn description(&self) -> &str {
        match self {
            RemoteEvent::PlayRegistered { .. } => "Play registered",
            RemoteEvent::LikeStatusChanged { .. } => "Like status changed",
            RemoteEvent::SyncFailed { .. } => "Backend sync failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast hub shared by the session tasks.
///
/// Clones publish into the same channel. A receiver only sees events sent
/// after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may fall behind before it
    /// observes `RecvError::Lagged`. Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Fails only when there are no subscribers; publishers usually ignore
    /// that case.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ============================================================================
// Filtered Subscription
// ============================================================================

type Predicate = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Subscription that drops events a predicate rejects.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    predicate: Option<Predicate>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            predicate: None,
        }
    }

    /// Keep only events for which `predicate` returns `true`. Replaces any
    /// earlier predicate.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Box::new(predicate)),
            ..self
        }
    }

    /// Keep only events at `min` severity or above.
    pub fn min_severity(self, min: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= min)
    }

    /// Wait for the next accepted event.
    ///
    /// Lag and closure are reported as-is; rejected events are skipped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.wants(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already buffered, or `None` if there is none yet.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(missed)) => return Some(Err(RecvError::Lagged(missed))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.wants(&event) {
                return Some(Ok(event));
            }
        }
    }

    fn wants(&self, event: &CoreEvent) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
