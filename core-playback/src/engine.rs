//! # Engine Adapter
//!
//! Serializing shim in front of the host's [`AudioEngine`].
//!
//! - Every command goes through one async gate, so no two commands are ever
//!   in flight against the engine, and snapshot reads never observe a
//!   half-finished load (e.g. between `reset` and `enqueue`).
//! - Every command is bounded by the configured timeout.
//! - Every state-changing command bumps a monotonic *command epoch*.
//!   Snapshots are tagged with the epoch they were read under so the
//!   reconciler can drop readings taken before the latest command.

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{AudioEngine, EngineEvent, EngineTrack, PlaybackSnapshot};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{PlaybackError, Result};
use crate::reconciler::Message;

/// Everything needed to (re)build the engine queue.
#[derive(Debug, Clone)]
pub(crate) struct LoadPlan {
    /// Tracks in playback order.
    pub tracks: Vec<EngineTrack>,
    /// Engine queue index to start at.
    pub start: usize,
    /// Position to seek to after loading.
    pub resume_at: Option<Duration>,
    /// Issue `play` at the end of the sequence.
    pub autoplay: bool,
}

pub(crate) struct EngineAdapter {
    engine: Arc<dyn AudioEngine>,
    gate: Mutex<()>,
    epoch: AtomicU64,
    timeout: Duration,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn AudioEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            gate: Mutex::new(()),
            epoch: AtomicU64::new(0),
            timeout,
        }
    }

    /// Epoch of the most recent state-changing command.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn run<T, F>(&self, command: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = BridgeResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(command, error = %err, "Engine command failed");
                Err(PlaybackError::engine(command, err))
            }
            Err(_) => {
                warn!(command, timeout_ms = self.timeout.as_millis() as u64, "Engine command timed out");
                Err(PlaybackError::EngineCommandFailure {
                    command,
                    message: format!("timed out after {:?}", self.timeout),
                })
            }
        }
    }

    /// Replace the engine queue and position it: `reset`, `enqueue`,
    /// `skip_to` (when not starting at 0), `seek_to` (when resuming) and
    /// `play` (when autoplaying). Returns the new epoch.
    pub async fn load(&self, plan: LoadPlan) -> Result<u64> {
        let _guard = self.gate.lock().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            epoch,
            tracks = plan.tracks.len(),
            start = plan.start,
            autoplay = plan.autoplay,
            "Loading engine queue"
        );

        self.run("reset", self.engine.reset()).await?;
        self.run("enqueue", self.engine.enqueue(plan.tracks)).await?;
        if plan.start > 0 {
            self.run("skip_to", self.engine.skip_to(plan.start)).await?;
        }
        if let Some(position) = plan.resume_at.filter(|p| !p.is_zero()) {
            self.run("seek_to", self.engine.seek_to(position)).await?;
        }
        if plan.autoplay {
            self.run("play", self.engine.play()).await?;
        }
        Ok(epoch)
    }

    /// Issue a single command under the gate, invalidating in-flight snapshots.
    async fn command<F>(&self, command: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = BridgeResult<()>>,
    {
        let _guard = self.gate.lock().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(command, epoch, "Engine command");
        self.run(command, fut).await
    }

    /// Stop and empty the engine.
    pub async fn reset(&self) -> Result<()> {
        self.command("reset", self.engine.reset()).await
    }

    pub async fn play(&self) -> Result<()> {
        self.command("play", self.engine.play()).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.command("pause", self.engine.pause()).await
    }

    pub async fn seek_to(&self, position: Duration) -> Result<()> {
        self.command("seek_to", self.engine.seek_to(position)).await
    }

    pub async fn skip_next(&self) -> Result<()> {
        self.command("skip_next", self.engine.skip_next()).await
    }

    pub async fn skip_previous(&self) -> Result<()> {
        self.command("skip_previous", self.engine.skip_previous()).await
    }

    pub async fn skip_to(&self, index: usize) -> Result<()> {
        self.command("skip_to", self.engine.skip_to(index)).await
    }

    /// Read a snapshot together with the epoch it belongs to.
    pub async fn snapshot(&self) -> Result<(u64, PlaybackSnapshot)> {
        let _guard = self.gate.lock().await;
        let epoch = self.epoch();
        let snapshot = self.run("snapshot", self.engine.snapshot()).await?;
        Ok((epoch, snapshot))
    }
}

/// Handle the host uses to push engine notifications into the session.
///
/// Cheap to clone. Events are queued behind any command the session is
/// currently processing and applied in arrival order.
#[derive(Clone)]
pub struct EngineEventSink {
    inbox: mpsc::UnboundedSender<Message>,
}

impl EngineEventSink {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<Message>) -> Self {
        Self { inbox }
    }

    /// Forward an engine event.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::SessionClosed`] once the session has shut down.
    pub fn send(&self, event: EngineEvent) -> Result<()> {
        self.inbox
            .send(Message::Engine(event))
            .map_err(|_| PlaybackError::SessionClosed)
    }

    pub fn active_track_changed(&self, track_id: Option<&str>) -> Result<()> {
        self.send(EngineEvent::ActiveTrackChanged(track_id.map(str::to_string)))
    }

    pub fn queue_ended(&self) -> Result<()> {
        self.send(EngineEvent::QueueEnded)
    }

    pub fn playback_error(&self, reason: impl Into<String>) -> Result<()> {
        self.send(EngineEvent::PlaybackError(reason.into()))
    }
}

impl std::fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEventSink")
            .field("closed", &self.inbox.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::BridgeError;
    use mockall::{mock, Sequence};

    mock! {
        Engine {}

        #[async_trait]
        impl AudioEngine for Engine {
            async fn reset(&self) -> BridgeResult<()>;
            async fn enqueue(&self, tracks: Vec<EngineTrack>) -> BridgeResult<()>;
            async fn play(&self) -> BridgeResult<()>;
            async fn pause(&self) -> BridgeResult<()>;
            async fn seek_to(&self, position: Duration) -> BridgeResult<()>;
            async fn skip_next(&self) -> BridgeResult<()>;
            async fn skip_previous(&self) -> BridgeResult<()>;
            async fn skip_to(&self, index: usize) -> BridgeResult<()>;
            async fn snapshot(&self) -> BridgeResult<PlaybackSnapshot>;
        }
    }

    fn engine_track(id: &str) -> EngineTrack {
        EngineTrack {
            id: id.to_string(),
            url: format!("https://cdn/{}.mp3", id),
            title: id.to_uppercase(),
            artist: "Artist".to_string(),
            artwork: None,
            duration: None,
        }
    }

    #[tokio::test]
    async fn load_runs_full_sequence_in_order() {
        let mut engine = MockEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_reset()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        engine
            .expect_enqueue()
            .withf(|tracks| tracks.len() == 3)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_skip_to()
            .withf(|index| *index == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_seek_to()
            .withf(|position| *position == Duration::from_secs(42))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_play()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let adapter = EngineAdapter::new(Arc::new(engine), Duration::from_secs(1));
        let epoch = adapter
            .load(LoadPlan {
                tracks: vec![engine_track("a"), engine_track("b"), engine_track("c")],
                start: 2,
                resume_at: Some(Duration::from_secs(42)),
                autoplay: true,
            })
            .await
            .unwrap();

        assert_eq!(epoch, 1);
        assert_eq!(adapter.epoch(), 1);
    }

    #[tokio::test]
    async fn load_without_autoplay_skips_optional_steps() {
        let mut engine = MockEngine::new();
        engine.expect_reset().times(1).returning(|| Ok(()));
        engine.expect_enqueue().times(1).returning(|_| Ok(()));
        engine.expect_skip_to().never();
        engine.expect_seek_to().never();
        engine.expect_play().never();

        let adapter = EngineAdapter::new(Arc::new(engine), Duration::from_secs(1));
        adapter
            .load(LoadPlan {
                tracks: vec![engine_track("a")],
                start: 0,
                resume_at: Some(Duration::ZERO),
                autoplay: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_step_aborts_load() {
        let mut engine = MockEngine::new();
        engine.expect_reset().returning(|| Ok(()));
        engine
            .expect_enqueue()
            .returning(|_| Err(BridgeError::EngineRejected("queue locked".into())));
        engine.expect_play().never();

        let adapter = EngineAdapter::new(Arc::new(engine), Duration::from_secs(1));
        let err = adapter
            .load(LoadPlan {
                tracks: vec![engine_track("a")],
                start: 0,
                resume_at: None,
                autoplay: true,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlaybackError::EngineCommandFailure { command: "enqueue", .. }
        ));
        assert_eq!(adapter.epoch(), 1);
    }

    #[tokio::test]
    async fn snapshots_carry_the_current_epoch() {
        let mut engine = MockEngine::new();
        engine
            .expect_snapshot()
            .returning(|| Ok(PlaybackSnapshot::active("a", Duration::from_secs(1), true)));
        engine.expect_reset().returning(|| Ok(()));

        let adapter = EngineAdapter::new(Arc::new(engine), Duration::from_secs(1));
        let (before, _) = adapter.snapshot().await.unwrap();
        adapter.reset().await.unwrap();
        let (after, snapshot) = adapter.snapshot().await.unwrap();

        assert!(after > before);
        assert!(snapshot.is_active("a"));
    }

    #[tokio::test]
    async fn transport_commands_invalidate_earlier_snapshots() {
        let mut engine = MockEngine::new();
        engine
            .expect_snapshot()
            .returning(|| Ok(PlaybackSnapshot::active("a", Duration::from_secs(1), true)));
        engine.expect_pause().times(1).returning(|| Ok(()));
        engine.expect_seek_to().times(1).returning(|_| Ok(()));
        engine
            .expect_skip_next()
            .times(1)
            .returning(|| Err(BridgeError::EngineRejected("end of queue".into())));

        let adapter = EngineAdapter::new(Arc::new(engine), Duration::from_secs(1));
        let (read_while_playing, _) = adapter.snapshot().await.unwrap();
        adapter.pause().await.unwrap();
        assert!(adapter.epoch() > read_while_playing);

        let before_seek = adapter.epoch();
        adapter.seek_to(Duration::from_secs(30)).await.unwrap();
        assert!(adapter.epoch() > before_seek);

        // A rejected command still counts.
        let before_skip = adapter.epoch();
        assert!(adapter.skip_next().await.is_err());
        assert!(adapter.epoch() > before_skip);
    }

    struct StalledEngine;

    #[async_trait]
    impl AudioEngine for StalledEngine {
        async fn reset(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn enqueue(&self, _tracks: Vec<EngineTrack>) -> BridgeResult<()> {
            Ok(())
        }
        async fn play(&self) -> BridgeResult<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek_to(&self, _position: Duration) -> BridgeResult<()> {
            Ok(())
        }
        async fn skip_next(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn skip_previous(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn skip_to(&self, _index: usize) -> BridgeResult<()> {
            Ok(())
        }
        async fn snapshot(&self) -> BridgeResult<PlaybackSnapshot> {
            Ok(PlaybackSnapshot::idle())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn commands_time_out() {
        let adapter = EngineAdapter::new(Arc::new(StalledEngine), Duration::from_millis(250));
        let err = adapter.play().await.unwrap_err();

        match err {
            PlaybackError::EngineCommandFailure { command, message } => {
                assert_eq!(command, "play");
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The gate is released after a timeout.
        assert!(adapter.pause().await.is_ok());
    }

    #[tokio::test]
    async fn sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(tx);
        assert!(sink.queue_ended().is_ok());

        drop(rx);
        assert_eq!(
            sink.active_track_changed(Some("a")),
            Err(PlaybackError::SessionClosed)
        );
    }
}
