//! Write-behind save queue.
//!
//! Callers that drop a player (disconnect, bulk flush) must not wait on two
//! network round trips. They enqueue the entity here and return; one
//! background task drains the queue in order and runs the store's save. A
//! single worker keeps saves of the same player in submission order.

use std::sync::Arc;

use arena_stats_db::{CacheConnector, SaveOutcome, StatRepository, StatStore};
use arena_stats_types::{MainPlayer, PlayerId, PlayerStat};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OnceCell, oneshot};

/// An entity shared between the cache map and its users.
pub type Shared<T> = Arc<Mutex<T>>;

/// A cache slot: filled once by the first loader, awaited by the rest.
pub(crate) type Slot<T> = Arc<OnceCell<Shared<T>>>;

enum WriteJob {
    Stats(Slot<PlayerStat>),
    Main(Slot<MainPlayer>),
    Barrier(oneshot::Sender<()>),
}

/// Handle to the background save task.
///
/// The task exits once every handle is dropped and the queue is empty.
pub(crate) struct WriteBehind {
    sender: UnboundedSender<WriteJob>,
}

impl WriteBehind {
    /// Spawn the worker on the current Tokio runtime.
    pub(crate) fn spawn<C, R>(store: Arc<StatStore<C, R>>) -> Self
    where
        C: CacheConnector,
        R: StatRepository,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            worker_loop(&store, receiver).await;
        });
        Self { sender }
    }

    /// Queue a stat save.
    pub(crate) fn save_stats(&self, slot: Slot<PlayerStat>) {
        self.submit(WriteJob::Stats(slot));
    }

    /// Queue a profile save.
    pub(crate) fn save_main(&self, slot: Slot<MainPlayer>) {
        self.submit(WriteJob::Main(slot));
    }

    /// Resolve once every job queued before this call has finished.
    pub(crate) async fn drain(&self) {
        let (done, wait) = oneshot::channel();
        self.submit(WriteJob::Barrier(done));
        if wait.await.is_err() {
            tracing::warn!("Save worker stopped before draining");
        }
    }

    fn submit(&self, job: WriteJob) {
        if self.sender.send(job).is_err() {
            tracing::error!("Save worker is gone; dropping save");
        }
    }
}

async fn worker_loop<C, R>(store: &StatStore<C, R>, mut receiver: UnboundedReceiver<WriteJob>)
where
    C: CacheConnector,
    R: StatRepository,
{
    tracing::debug!("Save worker started");
    while let Some(job) = receiver.recv().await {
        match job {
            WriteJob::Stats(slot) => {
                let Some(entity) = slot.get() else {
                    tracing::debug!("Skipping save of a stat entity that never finished loading");
                    continue;
                };
                let mut stats = entity.lock().await;
                let player_id = stats.player_id();
                log_outcome("stats", player_id, store.save(&mut stats).await);
            }
            WriteJob::Main(slot) => {
                let Some(entity) = slot.get() else {
                    tracing::debug!("Skipping save of a profile that never finished loading");
                    continue;
                };
                let mut main = entity.lock().await;
                let player_id = main.player_id();
                log_outcome("main", player_id, store.save_main(&mut main).await);
            }
            WriteJob::Barrier(done) => {
                // The waiter may have given up; nothing to do then.
                done.send(()).ok();
            }
        }
    }
    tracing::debug!("Save worker stopped");
}

fn log_outcome(kind: &str, player_id: PlayerId, outcome: SaveOutcome) {
    match outcome {
        SaveOutcome::Clean => tracing::trace!(kind, %player_id, "Nothing to save"),
        SaveOutcome::Saved {
            cache_written: true,
            database_written: true,
        } => tracing::trace!(kind, %player_id, "Saved"),
        SaveOutcome::Saved {
            cache_written,
            database_written,
        } => tracing::warn!(kind, %player_id, cache_written, database_written, "Partial save"),
        SaveOutcome::NotSerializable => {
            tracing::error!(kind, %player_id, "Entity could not be serialized; left dirty");
        }
    }
}
