//! Periodic engine snapshot polling.
//!
//! Engine events can be dropped or arrive out of order, so the session also
//! polls the engine and lets the reconciler merge what it sees.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::EngineAdapter;
use crate::reconciler::Message;

/// Spawn the poller. The first poll happens one `period` after start.
///
/// The task stops when `shutdown` fires or the session inbox is gone.
pub(crate) fn spawn_poller(
    adapter: Arc<EngineAdapter>,
    inbox: mpsc::WeakUnboundedSender<Message>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inbox) = inbox.upgrade() else {
                break;
            };

            match adapter.snapshot().await {
                Ok((epoch, snapshot)) => {
                    trace!(epoch, ?snapshot, "Polled engine snapshot");
                    if inbox.send(Message::Snapshot { epoch, snapshot }).is_err() {
                        break;
                    }
                }
                Err(err) => debug!(error = %err, "Snapshot poll failed"),
            }
        }

        debug!("Snapshot poller stopped");
    })
}
