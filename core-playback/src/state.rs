//! Session state and the read-only view published to the UI.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::RepeatMode;
use crate::track::Track;

/// Canonical playback state, owned by the reconciler.
///
/// Every variant except `Idle` and `Error` carries the current track, which
/// is always the queue's current track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// A load sequence was issued; waiting for the engine to confirm.
    Loading(Arc<Track>),
    /// Loaded and paused at the start, waiting for `play`.
    Ready(Arc<Track>),
    Playing(Arc<Track>, Duration),
    Paused(Arc<Track>, Duration),
    /// The engine failed. The queue keeps its cursor so `play` can retry.
    Error(String),
}

impl SessionState {
    pub fn track(&self) -> Option<&Arc<Track>> {
        match self {
            SessionState::Loading(track)
            | SessionState::Ready(track)
            | SessionState::Playing(track, _)
            | SessionState::Paused(track, _) => Some(track),
            SessionState::Idle | SessionState::Error(_) => None,
        }
    }

    pub fn position(&self) -> Duration {
        match self {
            SessionState::Playing(_, position) | SessionState::Paused(_, position) => *position,
            _ => Duration::ZERO,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, SessionState::Playing(..))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading(_) => "loading",
            SessionState::Ready(_) => "ready",
            SessionState::Playing(..) => "playing",
            SessionState::Paused(..) => "paused",
            SessionState::Error(_) => "error",
        }
    }
}

/// Whether the current user likes the current track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LikeStatus {
    #[default]
    Unknown,
    Liked,
    NotLiked,
}

impl LikeStatus {
    pub fn from_liked(liked: bool) -> Self {
        if liked {
            LikeStatus::Liked
        } else {
            LikeStatus::NotLiked
        }
    }

    /// Status after the user taps the like button. `Unknown` counts as not liked.
    pub fn toggled(self) -> Self {
        match self {
            LikeStatus::Liked => LikeStatus::NotLiked,
            LikeStatus::NotLiked | LikeStatus::Unknown => LikeStatus::Liked,
        }
    }

    pub fn is_liked(self) -> bool {
        self == LikeStatus::Liked
    }
}

/// Like status plus the token correlating it with in-flight backend calls.
///
/// The token increases whenever the like context changes (new current track,
/// new toggle). A backend response carries the token it was issued with and
/// is applied only if the token is still current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LikeState {
    pub status: LikeStatus,
    pub token: u64,
}

impl LikeState {
    /// Start a new like context and return its token.
    pub fn bump(&mut self) -> u64 {
        self.token += 1;
        self.token
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.token == token
    }
}

/// Immutable snapshot of the session published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    /// Engine-reported duration of the current track, falling back to the
    /// catalogue duration.
    pub duration: Option<Duration>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub like: LikeStatus,
    /// A skip was requested and the engine has not reported the new track yet.
    pub busy: bool,
    /// Queue in playback order.
    pub queue: Vec<Arc<Track>>,
    /// Cursor into `queue`.
    pub queue_position: Option<usize>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            duration: None,
            shuffle: false,
            repeat: RepeatMode::Off,
            like: LikeStatus::Unknown,
            busy: false,
            queue: Vec::new(),
            queue_position: None,
        }
    }
}

impl SessionView {
    /// The loaded track. In `Error` this is the queue's current track, the
    /// one `play` retries.
    pub fn current_track(&self) -> Option<&Arc<Track>> {
        match self.state {
            SessionState::Error(_) => self.queue_position.and_then(|at| self.queue.get(at)),
            _ => self.state.track(),
        }
    }

    pub fn position(&self) -> Duration {
        self.state.position()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Playback progress in `[0, 1]`. An unknown or zero duration counts as
    /// one millisecond so the ratio is always defined.
    pub fn progress(&self) -> f64 {
        let position = self.position().as_millis() as f64;
        let duration = self
            .duration
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0)
            .max(1.0);
        (position / duration).clamp(0.0, 1.0)
    }

    /// Human-readable state, e.g. for accessibility labels.
    pub fn status_label(&self) -> &'static str {
        self.state.label()
    }

    /// Elapsed time as `m:ss`.
    pub fn elapsed_label(&self) -> String {
        format_clock(self.position())
    }

    /// Total time as `m:ss`, or `--:--` while unknown.
    pub fn duration_label(&self) -> String {
        self.duration
            .map(format_clock)
            .unwrap_or_else(|| "--:--".to_string())
    }
}

/// Format a duration as `m:ss`.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
