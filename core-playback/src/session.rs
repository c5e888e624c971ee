//! # Session Facade
//!
//! [`SessionController`] is the only type UI code talks to. Every command is
//! forwarded to the reconciler task and resolves once it has been applied,
//! so awaiting a command and then reading [`SessionController::view`]
//! always observes its effect.
//!
//! ## Example
//!
//! ```ignore
//! use core_playback::{SessionController, Track};
//! use core_runtime::config::SessionConfig;
//!
//! let config = SessionConfig::builder()
//!     .engine(engine)
//!     .credentials(credentials)
//!     .backend_url("https://api.example.com")
//!     .build()?;
//! let session = SessionController::start(config)?;
//!
//! // Host wires native engine callbacks into the session.
//! let sink = session.engine_events();
//!
//! session.set_queue(album_tracks, 0).await?;
//! session.play().await?;
//!
//! let mut view = session.watch();
//! while view.changed().await.is_ok() {
//!     render(&view.borrow());
//! }
//! ```

use core_runtime::config::SessionConfig;
use core_runtime::events::{CoreEvent, EventBus};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{EngineAdapter, EngineEventSink};
use crate::error::{PlaybackError, Result};
use crate::poller::spawn_poller;
use crate::queue::{Queue, RepeatMode};
use crate::reconciler::{Intent, Message, Reconciler};
use crate::remote::RemoteSyncGateway;
use crate::state::SessionView;
use crate::track::{Track, TrackId};

/// Handle to a running playback session.
///
/// Cheap to clone; all clones drive the same session. The session stops when
/// [`shutdown`](Self::shutdown) is called or when every handle and
/// [`EngineEventSink`] has been dropped.
#[derive(Clone)]
pub struct SessionController {
    inbox: mpsc::UnboundedSender<Message>,
    view: watch::Receiver<SessionView>,
    events: EventBus,
    shutdown: CancellationToken,
}

impl SessionController {
    /// Validate `config` and spawn the session tasks on the current Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Config`] if the configuration is invalid or no Tokio
    /// runtime is running.
    pub fn start(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PlaybackError::Config("session must be started inside a Tokio runtime".to_string())
        })?;

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(SessionView::default());
        let events = EventBus::new(config.event_buffer_size);
        let shutdown = CancellationToken::new();

        let queue = match config.shuffle_seed {
            Some(seed) => Queue::with_seed(seed),
            None => Queue::new(),
        };
        let adapter = Arc::new(EngineAdapter::new(
            Arc::clone(&config.engine),
            config.engine_command_timeout,
        ));
        let gateway = Arc::new(RemoteSyncGateway::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.credentials),
            Arc::clone(&config.clock),
            config.backend_url.clone(),
            config.backend_timeout,
        ));

        let reconciler = Reconciler::new(
            queue,
            Arc::clone(&adapter),
            gateway,
            events.clone(),
            view_tx,
            inbox.downgrade(),
        );
        runtime.spawn(reconciler.run(inbox_rx, shutdown.clone()));
        spawn_poller(
            adapter,
            inbox.downgrade(),
            config.poll_interval,
            shutdown.clone(),
        );

        info!(
            backend_url = %config.backend_url,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Session controller started"
        );

        Ok(Self {
            inbox,
            view,
            events,
            shutdown,
        })
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified after every change to the view.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Subscribe to session events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Sink for the host's native engine callbacks.
    pub fn engine_events(&self) -> EngineEventSink {
        EngineEventSink::new(self.inbox.clone())
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Play `track` now.
    ///
    /// A track that is already queued becomes current; otherwise the queue
    /// is replaced by this single track.
    pub async fn set_current_track(&self, track: Track) -> Result<()> {
        self.request(Intent::SetCurrentTrack(track)).await
    }

    /// Replace the queue and load `tracks[start_index]` without playing it.
    ///
    /// An empty list clears the queue. An out-of-range index is rejected
    /// and leaves the queue untouched.
    pub async fn set_queue(&self, tracks: Vec<Track>, start_index: usize) -> Result<()> {
        self.request(Intent::SetQueue {
            tracks,
            start: start_index,
        })
        .await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.request(Intent::ClearQueue).await
    }

    pub async fn remove_track(&self, track_id: impl Into<TrackId>) -> Result<()> {
        self.request(Intent::RemoveTrack(track_id.into())).await
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub async fn play_pause(&self) -> Result<()> {
        self.request(Intent::PlayPause).await
    }

    pub async fn play(&self) -> Result<()> {
        self.request(Intent::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Intent::Pause).await
    }

    /// Seek to `ratio` of the current track's duration. Values outside
    /// `[0, 1]` are clamped and `NaN` seeks to the start.
    pub async fn seek(&self, ratio: f64) -> Result<()> {
        self.request(Intent::Seek(ratio)).await
    }

    pub async fn next(&self) -> Result<()> {
        self.request(Intent::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(Intent::Previous).await
    }

    // ========================================================================
    // Modes
    // ========================================================================

    pub async fn toggle_shuffle(&self) -> Result<()> {
        self.request(Intent::ToggleShuffle).await
    }

    /// Cycle repeat: off, queue, track.
    pub async fn toggle_repeat(&self) -> Result<()> {
        self.request(Intent::ToggleRepeat).await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.request(Intent::SetRepeat(mode)).await
    }

    /// Flip the like status of the current track. The view updates at once;
    /// a failed backend call reverts it and emits a sync failure event.
    pub async fn toggle_like(&self) -> Result<()> {
        self.request(Intent::ToggleLike).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Read an engine snapshot now instead of waiting for the next poll.
    pub async fn reconcile_now(&self) -> Result<()> {
        self.request(Intent::Reconcile).await
    }

    /// Resolve once every message queued before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        self.request(Intent::Flush).await
    }

    /// Stop the session. Pending and later commands fail with
    /// [`PlaybackError::SessionClosed`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.inbox.is_closed()
    }

    async fn request(&self, intent: Intent) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Message::Intent { intent, reply })
            .map_err(|_| PlaybackError::SessionClosed)?;
        response.await.map_err(|_| PlaybackError::SessionClosed)?
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.view.borrow().state.label())
            .field("closed", &self.is_closed())
            .finish()
    }
}
