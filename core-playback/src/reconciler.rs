//! # Session Reconciler
//!
//! Single owner of the queue, the canonical session state and the like
//! status. User intents, engine events, polled snapshots and backend
//! responses all arrive through one inbox and are applied strictly one at a
//! time, so an intent always observes the effects of the previous one.
//!
//! ## Reconciliation rules
//!
//! The engine is the ground truth for *which* track is active. The session
//! is the ground truth for the queue and its modes.
//!
//! - Snapshots read before the latest engine command are dropped.
//! - A snapshot or event naming a different queued track moves the cursor
//!   to it and starts a new `Loading` phase for that track.
//! - While `Loading`, interim track changes caused by our own load sequence
//!   are ignored; the next snapshot decides.
//! - Under repeat `Track`, the engine advancing on its own to the next track
//!   replays the current one instead.
//! - Queue end follows the repeat mode: replay the track, wrap to the
//!   first track, or go idle without touching the engine.
//!
//! Backend calls run on spawned tasks and report back through the inbox
//! tagged with the like token they were issued under.

use bridge_traits::{EngineEvent, PlaybackSnapshot};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, QueueEvent, RemoteEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{EngineAdapter, LoadPlan};
use crate::error::{PlaybackError, Result};
use crate::queue::{Advance, Direction, Queue, RepeatMode};
use crate::remote::RemoteSyncGateway;
use crate::state::{LikeState, LikeStatus, SessionState, SessionView};
use crate::track::{Track, TrackId};

pub(crate) enum Message {
    Intent {
        intent: Intent,
        reply: oneshot::Sender<Result<()>>,
    },
    Engine(EngineEvent),
    Snapshot {
        epoch: u64,
        snapshot: PlaybackSnapshot,
    },
    Remote(RemoteOutcome),
}

#[derive(Debug)]
pub(crate) enum Intent {
    SetCurrentTrack(Track),
    SetQueue { tracks: Vec<Track>, start: usize },
    ClearQueue,
    PlayPause,
    Play,
    Pause,
    Seek(f64),
    Next,
    Previous,
    ToggleShuffle,
    ToggleRepeat,
    SetRepeat(RepeatMode),
    ToggleLike,
    RemoveTrack(TrackId),
    Reconcile,
    Flush,
}

impl Intent {
    fn name(&self) -> &'static str {
        match self {
            Intent::SetCurrentTrack(_) => "set_current_track",
            Intent::SetQueue { .. } => "set_queue",
            Intent::ClearQueue => "clear_queue",
            Intent::PlayPause => "play_pause",
            Intent::Play => "play",
            Intent::Pause => "pause",
            Intent::Seek(_) => "seek",
            Intent::Next => "next",
            Intent::Previous => "previous",
            Intent::ToggleShuffle => "toggle_shuffle",
            Intent::ToggleRepeat => "toggle_repeat",
            Intent::SetRepeat(_) => "set_repeat",
            Intent::ToggleLike => "toggle_like",
            Intent::RemoveTrack(_) => "remove_track",
            Intent::Reconcile => "reconcile",
            Intent::Flush => "flush",
        }
    }
}

/// Result of a spawned backend call.
#[derive(Debug)]
pub(crate) enum RemoteOutcome {
    PlayRegistered {
        track_id: TrackId,
        token: u64,
        result: Result<bool>,
    },
    LikeSynced {
        track_id: TrackId,
        token: u64,
        liked: bool,
        previous: LikeStatus,
        result: Result<()>,
    },
}

pub(crate) struct Reconciler {
    queue: Queue,
    state: SessionState,
    like: LikeState,
    /// Track the like status belongs to. Survives `Error` so a retry keeps it.
    like_track: Option<TrackId>,
    /// Last track a play was registered for.
    registered: Option<TrackId>,
    /// Target of a skip the engine has not confirmed yet.
    pending_skip: Option<TrackId>,
    /// Whether the current load should end up playing.
    autoplay: bool,
    duration: Option<Duration>,
    adapter: Arc<EngineAdapter>,
    gateway: Arc<RemoteSyncGateway>,
    events: EventBus,
    view: watch::Sender<SessionView>,
    inbox: mpsc::WeakUnboundedSender<Message>,
}

impl Reconciler {
    pub fn new(
        queue: Queue,
        adapter: Arc<EngineAdapter>,
        gateway: Arc<RemoteSyncGateway>,
        events: EventBus,
        view: watch::Sender<SessionView>,
        inbox: mpsc::WeakUnboundedSender<Message>,
    ) -> Self {
        Self {
            queue,
            state: SessionState::Idle,
            like: LikeState::default(),
            like_track: None,
            registered: None,
            pending_skip: None,
            autoplay: false,
            duration: None,
            adapter,
            gateway,
            events,
            view,
            inbox,
        }
    }

    /// Process messages until `shutdown` fires or every sender is gone.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Message>,
        shutdown: CancellationToken,
    ) {
        info!("Playback session started");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle(message).await;
        }

        shutdown.cancel();
        inbox.close();
        while let Ok(message) = inbox.try_recv() {
            if let Message::Intent { reply, .. } = message {
                let _ = reply.send(Err(PlaybackError::SessionClosed));
            }
        }

        info!("Playback session stopped");
    }

    pub(crate) async fn handle(&mut self, message: Message) {
        match message {
            Message::Intent { intent, reply } => {
                let result = self.apply(intent).await;
                self.publish();
                let _ = reply.send(result);
            }
            Message::Engine(event) => {
                self.on_engine_event(event).await;
                self.publish();
            }
            Message::Snapshot { epoch, snapshot } => {
                self.on_snapshot(epoch, snapshot).await;
                self.publish();
            }
            Message::Remote(outcome) => {
                self.on_remote(outcome);
                self.publish();
            }
        }
    }

    #[instrument(level = "debug", skip(self, intent), fields(intent = intent.name()))]
    async fn apply(&mut self, intent: Intent) -> Result<()> {
        let result = match intent {
            Intent::SetCurrentTrack(track) => self.set_current_track(track).await,
            Intent::SetQueue { tracks, start } => self.set_queue(tracks, start).await,
            Intent::ClearQueue => self.clear().await,
            Intent::PlayPause => {
                if self.wants_playback() {
                    self.pause().await
                } else {
                    self.play().await
                }
            }
            Intent::Play => self.play().await,
            Intent::Pause => self.pause().await,
            Intent::Seek(ratio) => self.seek(ratio).await,
            Intent::Next => self.skip(Direction::Next).await,
            Intent::Previous => self.skip(Direction::Previous).await,
            Intent::ToggleShuffle => self.toggle_shuffle().await,
            Intent::ToggleRepeat => {
                let mode = self.queue.repeat_mode().cycle();
                self.set_repeat(mode);
                Ok(())
            }
            Intent::SetRepeat(mode) => {
                self.set_repeat(mode);
                Ok(())
            }
            Intent::ToggleLike => self.toggle_like(),
            Intent::RemoveTrack(track_id) => self.remove_track(&track_id).await,
            Intent::Reconcile => self.reconcile().await,
            Intent::Flush => Ok(()),
        };

        if let Err(err) = &result {
            debug!(error = %err, "Intent rejected");
        }
        result
    }

    // ========================================================================
    // Intents
    // ========================================================================

    async fn set_current_track(&mut self, track: Track) -> Result<()> {
        let position = match self.queue.position_of(&track.id) {
            Some(position) => position,
            None => {
                self.queue.set_queue(vec![Arc::new(track)], 0)?;
                self.emit(CoreEvent::Queue(QueueEvent::Replaced {
                    track_count: 1,
                    start_index: 0,
                }));
                0
            }
        };
        self.queue.select(position)?;
        self.registered = None;
        self.load(true, None).await
    }

    async fn set_queue(&mut self, tracks: Vec<Track>, start: usize) -> Result<()> {
        if tracks.is_empty() {
            return self.clear().await;
        }

        let track_count = tracks.len();
        self.queue
            .set_queue(tracks.into_iter().map(Arc::new).collect(), start)?;
        self.emit(CoreEvent::Queue(QueueEvent::Replaced {
            track_count,
            start_index: start,
        }));
        self.registered = None;
        self.load(false, None).await
    }

    async fn clear(&mut self) -> Result<()> {
        self.queue.clear();
        self.go_idle();
        self.emit(CoreEvent::Queue(QueueEvent::Cleared));
        self.adapter.reset().await
    }

    async fn play(&mut self) -> Result<()> {
        let position = self.state.position();
        match self.state.clone() {
            SessionState::Playing(..) => Ok(()),
            SessionState::Loading(_) => {
                if !self.autoplay {
                    self.autoplay = true;
                    self.adapter.play().await?;
                }
                Ok(())
            }
            SessionState::Ready(track) | SessionState::Paused(track, _) => {
                self.adapter.play().await?;
                self.set_state(SessionState::Playing(Arc::clone(&track), position));
                self.register_play(&track);
                Ok(())
            }
            SessionState::Idle | SessionState::Error(_) => {
                if self.queue.is_empty() {
                    return Err(PlaybackError::invalid("nothing to play"));
                }
                self.load(true, None).await
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        match self.state.clone() {
            SessionState::Playing(track, position) => {
                self.adapter.pause().await?;
                let position = self.fresh_position(&track, position).await;
                self.set_state(SessionState::Paused(track, position));
                Ok(())
            }
            SessionState::Loading(_) if self.autoplay => {
                self.autoplay = false;
                self.adapter.pause().await
            }
            _ => Ok(()),
        }
    }

    async fn seek(&mut self, ratio: f64) -> Result<()> {
        let ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };

        let track = match &self.state {
            SessionState::Playing(track, _)
            | SessionState::Paused(track, _)
            | SessionState::Ready(track) => Arc::clone(track),
            _ => return Err(PlaybackError::invalid("nothing loaded to seek")),
        };
        let duration = self
            .duration
            .ok_or_else(|| PlaybackError::invalid("track duration is not known yet"))?;

        let target = duration.mul_f64(ratio);
        self.adapter.seek_to(target).await?;

        match self.state.clone() {
            SessionState::Playing(track, _) => self.set_state(SessionState::Playing(track, target)),
            SessionState::Paused(track, _) => self.set_state(SessionState::Paused(track, target)),
            SessionState::Ready(track) if !target.is_zero() => {
                self.set_state(SessionState::Paused(track, target))
            }
            _ => {}
        }
        self.emit_position(&track, target);
        Ok(())
    }

    async fn skip(&mut self, direction: Direction) -> Result<()> {
        let target = self.queue.skip_target(direction)?;

        if matches!(self.state, SessionState::Idle | SessionState::Error(_)) {
            self.queue.select(target)?;
            return self.load(true, None).await;
        }

        let cursor = self.queue.cursor();
        match direction {
            Direction::Next if cursor.map(|c| c + 1) == Some(target) => {
                self.adapter.skip_next().await?
            }
            Direction::Previous if cursor.and_then(|c| c.checked_sub(1)) == Some(target) => {
                self.adapter.skip_previous().await?
            }
            _ => self.adapter.skip_to(target).await?,
        }

        let target_id = self.queue.track_at(target).map(|t| t.id.clone());
        debug!(?direction, target, "Skip requested");
        self.set_pending_skip(target_id);
        Ok(())
    }

    async fn toggle_shuffle(&mut self) -> Result<()> {
        let enabled = !self.queue.is_shuffled();
        self.queue.set_shuffle(enabled);
        self.emit(CoreEvent::Queue(QueueEvent::ShuffleChanged { enabled }));
        self.resync_engine().await
    }

    fn set_repeat(&mut self, mode: RepeatMode) {
        if self.queue.repeat_mode() == mode {
            return;
        }
        self.queue.set_repeat(mode);
        debug!(%mode, "Repeat mode changed");
        self.emit(CoreEvent::Queue(QueueEvent::RepeatModeChanged {
            mode: mode.to_string(),
        }));
    }

    fn toggle_like(&mut self) -> Result<()> {
        let track_id = self
            .like_track
            .clone()
            .ok_or_else(|| PlaybackError::invalid("no current track to like"))?;

        let previous = self.like.status;
        let next = previous.toggled();
        self.like.status = next;
        let token = self.like.bump();
        self.emit(CoreEvent::Remote(RemoteEvent::LikeStatusChanged {
            track_id: track_id.to_string(),
            liked: next.is_liked(),
        }));

        let Some(inbox) = self.inbox.upgrade() else {
            return Ok(());
        };
        let gateway = Arc::clone(&self.gateway);
        let liked = next.is_liked();
        tokio::spawn(async move {
            let result = gateway.set_liked(&track_id, liked).await;
            let _ = inbox.send(Message::Remote(RemoteOutcome::LikeSynced {
                track_id,
                token,
                liked,
                previous,
                result,
            }));
        });
        Ok(())
    }

    async fn remove_track(&mut self, track_id: &TrackId) -> Result<()> {
        let removal = self.queue.remove_track(track_id)?;
        self.emit(CoreEvent::Queue(QueueEvent::TrackRemoved {
            track_id: track_id.to_string(),
            remaining: self.queue.len(),
        }));

        if self.queue.is_empty() {
            self.go_idle();
            return self.adapter.reset().await;
        }

        let inactive = matches!(self.state, SessionState::Idle | SessionState::Error(_));
        if removal.was_current && !inactive {
            let autoplay = self.wants_playback();
            self.load(autoplay, None).await
        } else {
            self.resync_engine().await
        }
    }

    async fn reconcile(&mut self) -> Result<()> {
        let (epoch, snapshot) = self.adapter.snapshot().await?;
        self.on_snapshot(epoch, snapshot).await;
        Ok(())
    }

    // ========================================================================
    // Engine input
    // ========================================================================

    #[instrument(level = "debug", skip(self))]
    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ActiveTrackChanged(Some(id)) => {
                self.on_active_track(TrackId::from(id)).await
            }
            EngineEvent::ActiveTrackChanged(None) | EngineEvent::QueueEnded => {
                if matches!(
                    self.state,
                    SessionState::Playing(..) | SessionState::Paused(..)
                ) {
                    self.on_queue_ended().await;
                }
            }
            EngineEvent::PlaybackError(reason) => {
                warn!(reason = %reason, "Engine reported a playback error");
                self.set_pending_skip(None);
                self.set_state(SessionState::Error(reason));
            }
            EngineEvent::RemotePlay => {
                if let Err(err) = self.play().await {
                    warn!(error = %err, "Remote play failed");
                }
            }
            EngineEvent::RemotePause | EngineEvent::RemoteStop => {
                if let Err(err) = self.pause().await {
                    warn!(error = %err, "Remote pause failed");
                }
            }
        }
    }

    async fn on_active_track(&mut self, id: TrackId) {
        let current = match &self.state {
            SessionState::Idle | SessionState::Error(_) => {
                debug!(track_id = %id, "Ignoring track change while inactive");
                return;
            }
            SessionState::Loading(track) => {
                if track.id != id {
                    debug!(
                        expected = %track.id,
                        reported = %id,
                        "Ignoring interim track change while loading"
                    );
                }
                return;
            }
            SessionState::Ready(track)
            | SessionState::Playing(track, _)
            | SessionState::Paused(track, _) => track.id.clone(),
        };

        if current == id {
            self.set_pending_skip(None);
        } else if self.finished_under_repeat(&id) {
            self.repeat_current().await;
        } else {
            self.follow_engine(&id);
        }
    }

    async fn on_snapshot(&mut self, epoch: u64, snapshot: PlaybackSnapshot) {
        let current_epoch = self.adapter.epoch();
        if epoch < current_epoch {
            debug!(epoch, current_epoch, "Discarding stale snapshot");
            return;
        }
        if matches!(self.state, SessionState::Error(_)) {
            return;
        }

        let current = self.state.track().map(|t| t.id.clone());
        let Some(active) = snapshot.active_track.as_deref().map(TrackId::from) else {
            let loaded = matches!(
                self.state,
                SessionState::Ready(_) | SessionState::Playing(..) | SessionState::Paused(..)
            );
            if loaded {
                self.on_queue_ended().await;
            }
            return;
        };

        if matches!(self.state, SessionState::Idle)
            && (!snapshot.playing || self.queue.position_of(&active).is_none())
        {
            return;
        }
        if current.as_ref() != Some(&active) {
            if self.finished_under_repeat(&active) {
                self.repeat_current().await;
                return;
            }
            if !self.follow_engine(&active) {
                return;
            }
        }
        self.merge(&snapshot);
    }

    /// The engine holds the whole playback order and advances through it on
    /// its own. Under repeat `Track`, an unrequested move from the playing
    /// track to its successor means the track finished.
    fn finished_under_repeat(&self, reported: &TrackId) -> bool {
        if self.queue.repeat_mode() != RepeatMode::Track
            || self.pending_skip.is_some()
            || !self.state.is_playing()
        {
            return false;
        }
        match (self.queue.cursor(), self.queue.position_of(reported)) {
            (Some(cursor), Some(position)) => position == cursor + 1,
            _ => false,
        }
    }

    /// Reload the current track from the start.
    async fn repeat_current(&mut self) {
        info!(repeat = %RepeatMode::Track, "Track ended");
        if let Err(err) = self.load(true, None).await {
            warn!(error = %err, "Failed to repeat track");
        }
    }

    /// Move the cursor to the track the engine reports and restart the
    /// loading phase for it. Returns `false` if the track is not queued.
    fn follow_engine(&mut self, id: &TrackId) -> bool {
        let Some(position) = self.queue.position_of(id) else {
            warn!(track_id = %id, "Engine reports a track that is not queued");
            return false;
        };

        if self.queue.peek(Direction::Next) == Some(Advance::At(position)) {
            debug!(track_id = %id, position, "Engine advanced to the next track");
        } else {
            debug!(track_id = %id, position, "Resyncing cursor to engine");
        }

        let track = match self.queue.select(position) {
            Ok(track) => Arc::clone(track),
            Err(_) => return false,
        };
        self.autoplay = self.wants_playback();
        self.duration = track.duration();
        self.set_pending_skip(None);
        self.set_state(SessionState::Loading(track));
        true
    }

    /// Fold a snapshot for the current track into the session state.
    fn merge(&mut self, snapshot: &PlaybackSnapshot) {
        if let Some(duration) = snapshot.duration {
            self.duration = Some(duration);
        }
        let position = snapshot.position;

        let next = match self.state.clone() {
            SessionState::Loading(track) => {
                if snapshot.playing {
                    Some(SessionState::Playing(track, position))
                } else if !position.is_zero() {
                    Some(SessionState::Paused(track, position))
                } else if !self.autoplay {
                    Some(SessionState::Ready(track))
                } else {
                    None
                }
            }
            SessionState::Ready(track) => {
                if snapshot.playing {
                    Some(SessionState::Playing(track, position))
                } else if !position.is_zero() {
                    Some(SessionState::Paused(track, position))
                } else {
                    None
                }
            }
            SessionState::Playing(track, _) | SessionState::Paused(track, _) => {
                Some(if snapshot.playing {
                    SessionState::Playing(track, position)
                } else {
                    SessionState::Paused(track, position)
                })
            }
            SessionState::Idle | SessionState::Error(_) => None,
        };

        if let Some(next) = next {
            self.set_state(next);
        }

        if let Some(track) = self.state.track().cloned() {
            if self.pending_skip.as_ref() == Some(&track.id) {
                self.set_pending_skip(None);
            }
            if self.state.is_playing() {
                self.register_play(&track);
                self.emit_position(&track, position);
            }
        }
    }

    async fn on_queue_ended(&mut self) {
        let mode = self.queue.repeat_mode();
        info!(repeat = %mode, "Queue ended");

        let result = match mode {
            RepeatMode::Off => {
                self.registered = None;
                self.autoplay = false;
                self.set_pending_skip(None);
                self.set_state(SessionState::Idle);
                Ok(())
            }
            RepeatMode::Track => self.load(true, None).await,
            RepeatMode::Queue => match self.queue.select(0) {
                Ok(_) => self.load(true, None).await,
                Err(err) => Err(err),
            },
        };

        if let Err(err) = result {
            warn!(error = %err, "Failed to apply end-of-queue policy");
        }
    }

    // ========================================================================
    // Backend input
    // ========================================================================

    fn on_remote(&mut self, outcome: RemoteOutcome) {
        match outcome {
            RemoteOutcome::PlayRegistered {
                track_id,
                token,
                result: Ok(liked),
            } => {
                self.emit(CoreEvent::Remote(RemoteEvent::PlayRegistered {
                    track_id: track_id.to_string(),
                    liked,
                }));
                if !self.like.is_current(token) || self.like_track.as_ref() != Some(&track_id) {
                    debug!(%track_id, token, "Discarding stale like status");
                    return;
                }
                let status = LikeStatus::from_liked(liked);
                if self.like.status != status {
                    self.like.status = status;
                    self.emit(CoreEvent::Remote(RemoteEvent::LikeStatusChanged {
                        track_id: track_id.to_string(),
                        liked,
                    }));
                }
            }
            RemoteOutcome::PlayRegistered {
                track_id,
                result: Err(err),
                ..
            } => {
                warn!(%track_id, error = %err, "Play registration failed");
                self.emit_sync_failed(&track_id, "play-event", &err);
            }
            RemoteOutcome::LikeSynced {
                track_id,
                liked,
                result: Ok(()),
                ..
            } => {
                debug!(%track_id, liked, "Like status synced");
            }
            RemoteOutcome::LikeSynced {
                track_id,
                token,
                liked,
                previous,
                result: Err(err),
            } => {
                let operation = if liked { "like" } else { "unlike" };
                warn!(%track_id, operation, error = %err, "Like sync failed");
                self.emit_sync_failed(&track_id, operation, &err);

                if !self.like.is_current(token) {
                    debug!(%track_id, token, "Like context moved on, keeping status");
                    return;
                }
                self.like.status = previous;
                self.emit(CoreEvent::Remote(RemoteEvent::LikeStatusChanged {
                    track_id: track_id.to_string(),
                    liked: previous.is_liked(),
                }));
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// The session is playing or a load is headed there.
    fn wants_playback(&self) -> bool {
        match self.state {
            SessionState::Playing(..) => true,
            SessionState::Loading(_) => self.autoplay,
            _ => false,
        }
    }

    /// Load the queue's current track, entering `Loading`.
    ///
    /// The whole playback order goes to the engine so it can advance on its
    /// own. Interim engine reports during the load are ignored until a
    /// snapshot confirms the track.
    async fn load(&mut self, autoplay: bool, resume_at: Option<Duration>) -> Result<()> {
        let track = self
            .queue
            .current_track()
            .cloned()
            .ok_or_else(|| PlaybackError::invalid("queue is empty"))?;
        let plan = LoadPlan {
            tracks: self
                .queue
                .tracks_in_order()
                .iter()
                .map(|t| t.to_engine_track())
                .collect(),
            start: self.queue.cursor().unwrap_or(0),
            resume_at,
            autoplay,
        };

        self.autoplay = autoplay;
        self.duration = track.duration();
        self.set_pending_skip(None);
        self.set_state(SessionState::Loading(Arc::clone(&track)));

        if let Err(err) = self.adapter.load(plan).await {
            self.set_state(SessionState::Error(err.to_string()));
            return Err(err);
        }
        if autoplay {
            self.register_play(&track);
        }
        Ok(())
    }

    /// Rebuild the engine queue after the playback order changed, keeping
    /// the current track, its position and the play state.
    async fn resync_engine(&mut self) -> Result<()> {
        let (autoplay, resume_at) = match &self.state {
            SessionState::Idle | SessionState::Error(_) => return Ok(()),
            SessionState::Loading(_) => (self.autoplay, None),
            SessionState::Ready(_) => (false, None),
            SessionState::Playing(track, position) | SessionState::Paused(track, position) => {
                let position = self.fresh_position(track, *position).await;
                (self.state.is_playing(), Some(position))
            }
        };
        self.load(autoplay, resume_at).await
    }

    /// Engine position for `track`, or `fallback` if the engine disagrees.
    async fn fresh_position(&self, track: &Track, fallback: Duration) -> Duration {
        match self.adapter.snapshot().await {
            Ok((_, snapshot)) if snapshot.is_active(track.id.as_str()) => snapshot.position,
            _ => fallback,
        }
    }

    fn go_idle(&mut self) {
        self.registered = None;
        self.autoplay = false;
        self.duration = None;
        self.set_pending_skip(None);
        self.set_state(SessionState::Idle);
    }

    fn set_state(&mut self, next: SessionState) {
        let changed = self.state.label() != next.label()
            || self.state.track().map(|t| &t.id) != next.track().map(|t| &t.id);

        match next.track() {
            Some(track) if self.like_track.as_ref() != Some(&track.id) => {
                self.like_track = Some(track.id.clone());
                self.like.status = LikeStatus::Unknown;
                self.like.bump();
            }
            None if matches!(next, SessionState::Idle) && self.like_track.is_some() => {
                self.like_track = None;
                self.like.status = LikeStatus::Unknown;
                self.like.bump();
            }
            _ => {}
        }

        self.state = next;
        if changed {
            debug!(state = self.state.label(), "Session state changed");
            let event = self.state_event();
            self.emit(CoreEvent::Playback(event));
        }
    }

    fn set_pending_skip(&mut self, target: Option<TrackId>) {
        let was_busy = self.pending_skip.is_some();
        self.pending_skip = target;
        let busy = self.pending_skip.is_some();
        if busy != was_busy {
            self.emit(CoreEvent::Playback(PlaybackEvent::Busy { busy }));
        }
    }

    fn register_play(&mut self, track: &Arc<Track>) {
        if self.registered.as_ref() == Some(&track.id) {
            return;
        }
        self.registered = Some(track.id.clone());

        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        let gateway = Arc::clone(&self.gateway);
        let track_id = track.id.clone();
        let token = self.like.token;
        tokio::spawn(async move {
            let result = gateway.register_play(&track_id).await;
            let _ = inbox.send(Message::Remote(RemoteOutcome::PlayRegistered {
                track_id,
                token,
                result,
            }));
        });
    }

    fn state_event(&self) -> PlaybackEvent {
        match &self.state {
            SessionState::Idle => PlaybackEvent::Idle,
            SessionState::Loading(track) => PlaybackEvent::Loading {
                track_id: track.id.to_string(),
                title: track.title.clone(),
            },
            SessionState::Ready(track) => PlaybackEvent::Ready {
                track_id: track.id.to_string(),
            },
            SessionState::Playing(track, position) => PlaybackEvent::Playing {
                track_id: track.id.to_string(),
                position_ms: position.as_millis() as u64,
            },
            SessionState::Paused(track, position) => PlaybackEvent::Paused {
                track_id: track.id.to_string(),
                position_ms: position.as_millis() as u64,
            },
            SessionState::Error(message) => PlaybackEvent::Error {
                track_id: self.like_track.as_ref().map(TrackId::to_string),
                message: message.clone(),
                recoverable: !self.queue.is_empty(),
            },
        }
    }

    fn emit_position(&self, track: &Track, position: Duration) {
        self.emit(CoreEvent::Playback(PlaybackEvent::PositionChanged {
            track_id: track.id.to_string(),
            position_ms: position.as_millis() as u64,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
        }));
    }

    fn emit_sync_failed(&self, track_id: &TrackId, operation: &str, err: &PlaybackError) {
        self.emit(CoreEvent::Remote(RemoteEvent::SyncFailed {
            track_id: Some(track_id.to_string()),
            operation: operation.to_string(),
            message: err.to_string(),
        }));
    }

    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine.
        let _ = self.events.emit(event);
    }

    fn publish(&self) {
        let view = SessionView {
            state: self.state.clone(),
            duration: self.duration,
            shuffle: self.queue.is_shuffled(),
            repeat: self.queue.repeat_mode(),
            like: self.like.status,
            busy: self.pending_skip.is_some(),
            queue: self.queue.tracks_in_order(),
            queue_position: self.queue.cursor(),
        };
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        AudioEngine, BridgeError, EngineTrack, HttpClient, HttpRequest, HttpResponse,
        StaticCredentials, SystemClock,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedEngine {
        commands: Mutex<Vec<String>>,
        snapshot: Mutex<PlaybackSnapshot>,
    }

    impl ScriptedEngine {
        fn report(&self, snapshot: PlaybackSnapshot) {
            *self.snapshot.lock() = snapshot;
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }

        fn record(&self, command: impl Into<String>) -> BridgeResult<()> {
            self.commands.lock().push(command.into());
            Ok(())
        }
    }

    #[async_trait]
    impl AudioEngine for ScriptedEngine {
        async fn reset(&self) -> BridgeResult<()> {
            self.record("reset")
        }
        async fn enqueue(&self, tracks: Vec<EngineTrack>) -> BridgeResult<()> {
            let ids: Vec<_> = tracks.into_iter().map(|t| t.id).collect();
            self.record(format!("enqueue {}", ids.join(",")))
        }
        async fn play(&self) -> BridgeResult<()> {
            self.record("play")
        }
        async fn pause(&self) -> BridgeResult<()> {
            self.record("pause")
        }
        async fn seek_to(&self, position: Duration) -> BridgeResult<()> {
            self.record(format!("seek {}", position.as_secs()))
        }
        async fn skip_next(&self) -> BridgeResult<()> {
            self.record("skip_next")
        }
        async fn skip_previous(&self) -> BridgeResult<()> {
            self.record("skip_previous")
        }
        async fn skip_to(&self, index: usize) -> BridgeResult<()> {
            self.record(format!("skip_to {}", index))
        }
        async fn snapshot(&self) -> BridgeResult<PlaybackSnapshot> {
            Ok(self.snapshot.lock().clone())
        }
    }

    struct OfflineHttp;

    #[async_trait]
    impl HttpClient for OfflineHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("offline".into()))
        }
    }

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), "Artist", format!("https://cdn/{}.mp3", id))
    }

    /// Reconciler with no live inbox, so backend calls are never spawned.
    fn reconciler(engine: Arc<ScriptedEngine>) -> (Reconciler, watch::Receiver<SessionView>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let gateway = RemoteSyncGateway::new(
            Arc::new(OfflineHttp),
            Arc::new(StaticCredentials::signed_out()),
            Arc::new(SystemClock),
            "https://api.example.com",
            Duration::from_secs(1),
        );
        let reconciler = Reconciler::new(
            Queue::with_seed(7),
            Arc::new(EngineAdapter::new(engine, Duration::from_secs(1))),
            Arc::new(gateway),
            EventBus::new(32),
            view_tx,
            tx.downgrade(),
        );
        (reconciler, view_rx)
    }

    async fn intent(reconciler: &mut Reconciler, intent: Intent) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        reconciler.handle(Message::Intent { intent, reply }).await;
        rx.await.unwrap()
    }

    async fn snapshot(reconciler: &mut Reconciler, epoch: u64, snapshot: PlaybackSnapshot) {
        reconciler
            .handle(Message::Snapshot { epoch, snapshot })
            .await;
    }

    #[tokio::test]
    async fn stale_snapshot_is_discarded() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(engine);

        intent(
            &mut reconciler,
            Intent::SetQueue {
                tracks: vec![track("a"), track("b")],
                start: 0,
            },
        )
        .await
        .unwrap();
        let epoch = reconciler.adapter.epoch();

        snapshot(
            &mut reconciler,
            epoch - 1,
            PlaybackSnapshot::active("b", Duration::from_secs(3), true),
        )
        .await;
        assert!(matches!(&view.borrow().state, SessionState::Loading(t) if t.id == *"a"));
        assert_eq!(view.borrow().queue_position, Some(0));

        snapshot(
            &mut reconciler,
            epoch,
            PlaybackSnapshot::active("a", Duration::from_secs(3), true),
        )
        .await;
        assert!(matches!(&view.borrow().state, SessionState::Playing(t, _) if t.id == *"a"));
    }

    #[tokio::test]
    async fn set_queue_settles_in_ready() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(Arc::clone(&engine));

        intent(
            &mut reconciler,
            Intent::SetQueue {
                tracks: vec![track("a"), track("b"), track("c")],
                start: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(engine.commands(), vec!["reset", "enqueue a,b,c", "skip_to 1"]);

        let epoch = reconciler.adapter.epoch();
        snapshot(
            &mut reconciler,
            epoch,
            PlaybackSnapshot::active("b", Duration::ZERO, false),
        )
        .await;
        assert!(matches!(&view.borrow().state, SessionState::Ready(t) if t.id == *"b"));
    }

    #[tokio::test]
    async fn interim_track_changes_are_ignored_while_loading() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(engine);

        intent(
            &mut reconciler,
            Intent::SetQueue {
                tracks: vec![track("a"), track("b"), track("c")],
                start: 2,
            },
        )
        .await
        .unwrap();
        reconciler
            .handle(Message::Engine(EngineEvent::ActiveTrackChanged(Some(
                "a".into(),
            ))))
            .await;

        assert!(matches!(&view.borrow().state, SessionState::Loading(t) if t.id == *"c"));
        assert_eq!(view.borrow().queue_position, Some(2));
    }

    #[tokio::test]
    async fn empty_snapshot_ends_queue_without_engine_commands() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(Arc::clone(&engine));

        intent(&mut reconciler, Intent::SetCurrentTrack(track("a")))
            .await
            .unwrap();
        let epoch = reconciler.adapter.epoch();
        snapshot(
            &mut reconciler,
            epoch,
            PlaybackSnapshot::active("a", Duration::from_secs(1), true),
        )
        .await;
        let issued = engine.commands().len();

        snapshot(&mut reconciler, epoch, PlaybackSnapshot::idle()).await;

        assert_eq!(view.borrow().state, SessionState::Idle);
        assert_eq!(engine.commands().len(), issued);
        assert_eq!(view.borrow().queue.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_read_before_pause_does_not_resume() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(Arc::clone(&engine));

        intent(&mut reconciler, Intent::SetCurrentTrack(track("a")))
            .await
            .unwrap();
        let epoch = reconciler.adapter.epoch();
        let playing = PlaybackSnapshot::active("a", Duration::from_secs(5), true);
        snapshot(&mut reconciler, epoch, playing.clone()).await;
        assert!(view.borrow().is_playing());

        intent(&mut reconciler, Intent::Pause).await.unwrap();
        assert_eq!(view.borrow().status_label(), "paused");

        // Polled while still playing, delivered after the pause.
        snapshot(&mut reconciler, epoch, playing).await;
        assert_eq!(view.borrow().status_label(), "paused");

        intent(&mut reconciler, Intent::PlayPause).await.unwrap();
        assert_eq!(engine.commands().last().map(String::as_str), Some("play"));
        assert!(view.borrow().is_playing());
    }

    #[tokio::test]
    async fn engine_advance_under_repeat_track_replays() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(Arc::clone(&engine));

        intent(
            &mut reconciler,
            Intent::SetQueue {
                tracks: vec![track("a"), track("b"), track("c")],
                start: 0,
            },
        )
        .await
        .unwrap();
        intent(&mut reconciler, Intent::Play).await.unwrap();
        let epoch = reconciler.adapter.epoch();
        snapshot(
            &mut reconciler,
            epoch,
            PlaybackSnapshot::active("a", Duration::from_secs(1), true),
        )
        .await;
        intent(&mut reconciler, Intent::SetRepeat(RepeatMode::Track))
            .await
            .unwrap();
        let issued = engine.commands().len();

        // Missed event: the poller is the first to see the engine on "b".
        let epoch = reconciler.adapter.epoch();
        snapshot(
            &mut reconciler,
            epoch,
            PlaybackSnapshot::active("b", Duration::from_secs(1), true),
        )
        .await;

        assert!(matches!(&view.borrow().state, SessionState::Loading(t) if t.id == *"a"));
        assert_eq!(view.borrow().queue_position, Some(0));
        assert_eq!(
            engine.commands().split_off(issued),
            vec!["reset", "enqueue a,b,c", "play"]
        );
    }

    #[tokio::test]
    async fn stale_play_registration_does_not_touch_like_status() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(engine);

        intent(&mut reconciler, Intent::SetCurrentTrack(track("a")))
            .await
            .unwrap();
        let stale = reconciler.like.token;
        intent(&mut reconciler, Intent::SetCurrentTrack(track("b")))
            .await
            .unwrap();

        reconciler
            .handle(Message::Remote(RemoteOutcome::PlayRegistered {
                track_id: TrackId::new("a"),
                token: stale,
                result: Ok(true),
            }))
            .await;
        assert_eq!(view.borrow().like, LikeStatus::Unknown);

        let current = reconciler.like.token;
        reconciler
            .handle(Message::Remote(RemoteOutcome::PlayRegistered {
                track_id: TrackId::new("b"),
                token: current,
                result: Ok(true),
            }))
            .await;
        assert_eq!(view.borrow().like, LikeStatus::Liked);
    }

    #[tokio::test]
    async fn failed_like_reverts_only_current_context() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(engine);

        intent(&mut reconciler, Intent::SetCurrentTrack(track("a")))
            .await
            .unwrap();
        intent(&mut reconciler, Intent::ToggleLike).await.unwrap();
        assert_eq!(view.borrow().like, LikeStatus::Liked);

        let token = reconciler.like.token;
        reconciler
            .handle(Message::Remote(RemoteOutcome::LikeSynced {
                track_id: TrackId::new("a"),
                token,
                liked: true,
                previous: LikeStatus::Unknown,
                result: Err(PlaybackError::BackendCallFailure("HTTP 500".into())),
            }))
            .await;
        assert_eq!(view.borrow().like, LikeStatus::Unknown);
    }

    #[tokio::test]
    async fn toggle_like_needs_a_track() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, _view) = reconciler(engine);

        let err = intent(&mut reconciler, Intent::ToggleLike)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidQueueOperation(_)));
    }

    #[tokio::test]
    async fn engine_error_keeps_queue_for_retry() {
        let engine = Arc::new(ScriptedEngine::default());
        let (mut reconciler, view) = reconciler(Arc::clone(&engine));

        intent(
            &mut reconciler,
            Intent::SetQueue {
                tracks: vec![track("a"), track("b")],
                start: 1,
            },
        )
        .await
        .unwrap();
        reconciler
            .handle(Message::Engine(EngineEvent::PlaybackError(
                "decoder failed".into(),
            )))
            .await;
        assert_eq!(
            view.borrow().state,
            SessionState::Error("decoder failed".into())
        );
        assert_eq!(view.borrow().queue_position, Some(1));
        assert_eq!(
            view.borrow().current_track().map(|t| t.id.to_string()),
            Some("b".to_string())
        );

        engine.report(PlaybackSnapshot::active("b", Duration::ZERO, true));
        intent(&mut reconciler, Intent::Play).await.unwrap();
        assert!(matches!(&view.borrow().state, SessionState::Loading(t) if t.id == *"b"));
        assert_eq!(engine.commands().last().map(String::as_str), Some("play"));
    }
}
