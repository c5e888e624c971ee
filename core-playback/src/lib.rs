//! # Playback Session Core
//!
//! Keeps a queue of tracks, a host audio engine and the music backend in
//! agreement about what is playing.
//!
//! ## Overview
//!
//! - [`queue`] - ordered tracks with shuffle and repeat
//! - [`engine`] - serializing shim in front of the host [`AudioEngine`](bridge_traits::AudioEngine)
//! - [`remote`] - play registration and like/unlike calls
//! - [`reconciler`] - the single task that owns session state
//! - [`session`] - [`SessionController`], the handle UI code uses
//!
//! The reconciler applies user commands, engine events, polled engine
//! snapshots and backend responses one at a time. Observers read the
//! published [`SessionView`] or subscribe to
//! [`CoreEvent`](core_runtime::events::CoreEvent)s.

pub mod engine;
pub mod error;
mod poller;
pub mod queue;
mod reconciler;
mod remote;
pub mod session;
pub mod state;
pub mod track;

pub use engine::EngineEventSink;
pub use error::{PlaybackError, Result};
pub use queue::{Direction, Queue, RepeatMode};
pub use session::SessionController;
pub use state::{format_clock, LikeStatus, SessionState, SessionView};
pub use track::{Track, TrackId};
