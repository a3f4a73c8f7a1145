use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use snafu::{Location, ResultExt as _, Snafu};
use tokio::select;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::instrument;

use super::{guarded, ServiceError, Timeouts};
use crate::counter::{CounterError, CounterStore};
use crate::database::RelationalStore;
use crate::model::VideoId;
use crate::time::{deadline, Elapsed};

const REBUILD_ATTEMPTS: usize = 5;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub(super) enum CountError {
    #[snafu(display("counter store failed at {location}: {source}"))]
    Counters {
        source: CounterError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("counter store {source} at {location}"))]
    CountersTimeout {
        source: Elapsed,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not read the aggregates at {location}: {source}"))]
    Aggregate {
        source: ServiceError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("counters were removed while being seeded at {location}"))]
    Vanished {
        #[snafu(implicit)]
        location: Location,
    },
}

pub(super) async fn counter_call<T>(
    timeout: Duration, call: impl Future<Output = Result<T, CounterError>>,
) -> Result<T, CountError> {
    deadline(timeout, call)
        .await
        .context(CountersTimeoutSnafu)?
        .context(CountersSnafu)
}

/// Handle for queueing videos whose counters drifted from the database.
#[derive(Debug, Clone)]
pub struct Reconciler {
    queue: mpsc::Sender<VideoId>,
}

/// The background worker behind a [Reconciler].
#[derive(Debug)]
pub struct ReconcilerTask {
    handle: tokio::task::JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl Reconciler {
    pub fn spawn(
        store: Arc<dyn RelationalStore>, counters: Arc<dyn CounterStore>, timeouts: Timeouts,
        capacity: usize,
    ) -> (Self, ReconcilerTask) {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        let (stop, signal) = oneshot::channel();

        let worker = Worker {
            store,
            counters,
            timeouts,
        };
        let handle = tokio::spawn(worker.run(receiver, signal));

        (Self { queue }, ReconcilerTask { handle, stop })
    }

    /// Queues `video` for a rebuild. Returns `false` when the queue is full or closed, in which
    /// case the counters stay stale until the next successful write.
    pub fn enqueue(&self, video: VideoId) -> bool {
        match self.queue.try_send(video) {
            Ok(()) => true,
            Err(TrySendError::Full(video)) => {
                tracing::error!(video.id = %video, "reconciliation queue is full, dropping video");
                false
            }
            Err(TrySendError::Closed(video)) => {
                tracing::error!(video.id = %video, "reconciler has stopped, dropping video");
                false
            }
        }
    }
}

impl ReconcilerTask {
    /// Stops accepting work, rebuilds whatever is still queued and waits for the worker to exit.
    pub async fn shutdown(self) {
        tracing::info!("stopping reconciler");

        if self.stop.send(()).is_err() {
            tracing::debug!("reconciler already exited");
        }

        if let Err(error) = self.handle.await {
            tracing::error!(%error, "reconciler task panicked");
        }
    }
}

#[derive(Debug)]
struct Worker {
    store: Arc<dyn RelationalStore>,
    counters: Arc<dyn CounterStore>,
    timeouts: Timeouts,
}

impl Worker {
    async fn run(self, mut queue: mpsc::Receiver<VideoId>, mut signal: oneshot::Receiver<()>) {
        loop {
            select! {
                _ = &mut signal => {
                    queue.close();
                    while let Some(video) = queue.recv().await {
                        self.reconcile(&video).await;
                    }

                    tracing::info!("stopped reconciler");
                    break;
                }

                video = queue.recv() => match video {
                    Some(video) => self.reconcile(&video).await,
                    None => break,
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn reconcile(&self, video: &VideoId) {
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(REBUILD_ATTEMPTS);

        match Retry::spawn(strategy, || self.rebuild(video)).await {
            Ok(()) => tracing::info!(video.id = %video, "reconciled counters"),
            Err(error) => tracing::error!(video.id = %video, %error, "could not reconcile counters"),
        }
    }

    async fn rebuild(&self, video: &VideoId) -> Result<(), CountError> {
        let snapshot = guarded(self.timeouts.database, self.store.aggregate(video))
            .await
            .context(AggregateSnafu)?;

        counter_call(self.timeouts.counters, self.counters.overwrite(video, snapshot)).await?;
        tracing::debug!(video.id = %video, ?snapshot, "overwrote counters");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::counter::MemoryCounters;
    use crate::database::MemoryStore;
    use crate::model::CounterSnapshot;
    use crate::testing;

    #[tokio::test]
    async fn rebuilds_counters_from_the_database() {
        let store = MemoryStore::new();
        let counters = MemoryCounters::new();
        let (_, video) = testing::seed(&store).await;
        testing::view(&store, "u2", &video.id).await;
        testing::view(&store, "u3", &video.id).await;

        counters
            .overwrite(&video.id, CounterSnapshot::new(40, 0, 0))
            .await
            .unwrap();

        let (reconciler, task) = Reconciler::spawn(
            Arc::new(store),
            Arc::new(counters.clone()),
            testing::timeouts(),
            8,
        );
        assert!(reconciler.enqueue(video.id.clone()));
        task.shutdown().await;

        let snapshot = counters.get_counters(&video.id).await.unwrap();
        assert_eq!(snapshot, Some(CounterSnapshot::new(2, 0, 0)));
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_rejected() {
        let (reconciler, task) = Reconciler::spawn(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCounters::new()),
            testing::timeouts(),
            1,
        );
        task.shutdown().await;

        assert!(!reconciler.enqueue(VideoId::parse("v1").unwrap()));
    }
}
