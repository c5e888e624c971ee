//! Audio engine bridge.
//!
//! The host owns the native playback engine (media session, decoder, output
//! route). The core drives it through the narrow command surface below and
//! learns about changes through [`EngineEvent`]s plus periodic
//! [`PlaybackSnapshot`] reads. Events may be delayed, coalesced or dropped by
//! the host, so snapshots are the source of truth for reconciliation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Track descriptor handed to the engine's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTrack {
    /// Opaque track identifier, echoed back in snapshots and events.
    pub id: String,
    /// Playable media URL.
    pub url: String,
    pub title: String,
    pub artist: String,
    /// Artwork URL shown by the platform media session.
    pub artwork: Option<String>,
    /// Duration when already known from the catalogue.
    pub duration: Option<Duration>,
}

/// Point-in-time report of what the engine is doing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    /// Identifier of the active track, `None` when the engine queue is empty
    /// or has run past its last item.
    pub active_track: Option<String>,
    /// Elapsed position in the active track.
    pub position: Duration,
    /// Total duration, `None` while the engine has not resolved it yet.
    pub duration: Option<Duration>,
    /// Whether audio is currently being rendered.
    pub playing: bool,
}

impl PlaybackSnapshot {
    /// Snapshot of an engine with nothing loaded.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Snapshot of an engine positioned on `track_id`.
    pub fn active(track_id: impl Into<String>, position: Duration, playing: bool) -> Self {
        Self {
            active_track: Some(track_id.into()),
            position,
            duration: None,
            playing,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_active(&self, track_id: &str) -> bool {
        self.active_track.as_deref() == Some(track_id)
    }
}

/// Notifications pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EngineEvent {
    /// The engine moved to another queue item (or to none).
    ActiveTrackChanged(Option<String>),
    /// The engine played past the last item of its queue.
    QueueEnded,
    /// Rendering failed; the payload is a human-readable reason.
    PlaybackError(String),
    /// Lock-screen or headset "play" control.
    RemotePlay,
    /// Lock-screen or headset "pause" control.
    RemotePause,
    /// Lock-screen "stop" control.
    RemoteStop,
}

/// Command surface of a host audio engine.
///
/// The core never issues two commands concurrently against the same engine;
/// implementations do not need their own locking for that. Every command may
/// fail and the core treats failures as transient.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Stop playback and drop the engine's queue.
    async fn reset(&self) -> Result<()>;

    /// Append tracks to the engine's queue, in order.
    async fn enqueue(&self, tracks: Vec<EngineTrack>) -> Result<()>;

    /// Start or resume rendering the active track.
    async fn play(&self) -> Result<()>;

    /// Pause rendering, keeping position.
    async fn pause(&self) -> Result<()>;

    /// Seek within the active track.
    async fn seek_to(&self, position: Duration) -> Result<()>;

    /// Move to the next queue item.
    async fn skip_next(&self) -> Result<()>;

    /// Move to the previous queue item.
    async fn skip_previous(&self) -> Result<()>;

    /// Jump to the queue item at `index`.
    async fn skip_to(&self, index: usize) -> Result<()>;

    /// Report the engine's current state.
    async fn snapshot(&self) -> Result<PlaybackSnapshot>;
}
