use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use serde::Serialize;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;

use super::reconcile::{counter_call, AggregateSnafu, CountError, VanishedSnafu};
use super::{
    guarded, InvalidIdSnafu, NotFoundSnafu, Reconciler, Result, ServiceError, Timeouts,
};
use crate::cache::{Cache, CacheKey};
use crate::counter::CounterStore;
use crate::database::RelationalStore;
use crate::model::{Counter, CounterSnapshot, UserId, VideoId, ViewOutcome};
use crate::time::Clock;

/// A repeat view by the same user counts again once this much time has passed.
pub const DEFAULT_REARM_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewReport {
    pub outcome: ViewOutcome,
    /// Absent when the counter store could not be reached.
    pub counters: Option<CounterSnapshot>,
    pub message: String,
}

/// Decides whether a view counts, keeps the view ledger and the view counter in step.
#[derive(Debug, Clone, new)]
pub struct ViewAggregationService {
    store: Arc<dyn RelationalStore>,
    counters: Arc<dyn CounterStore>,
    cache: Cache,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    rearm_window: Duration,
    timeouts: Timeouts,
}

impl ViewAggregationService {
    #[instrument(skip(self))]
    pub async fn record_view(&self, user_id: &str, video_id: &str) -> Result<ViewReport> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let video = VideoId::parse(video_id).context(InvalidIdSnafu)?;

        guarded(self.timeouts.database, self.store.video(&video))
            .await?
            .context(NotFoundSnafu {
                what: format!("video {video}"),
            })?;

        let now = self.clock.now();
        let upsert = guarded(
            self.timeouts.database,
            self.store.upsert_view(&user, &video, now, self.rearm_window),
        )
        .await;
        let outcome = match upsert {
            Ok(outcome) => outcome,
            // the write may have committed without us hearing back
            Err(error @ ServiceError::DatabaseTimeout { .. }) => {
                tracing::warn!(user.id = %user, video.id = %video, %error, "view outcome unknown, scheduling reconciliation");
                self.reconciler.enqueue(video.clone());
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        tracing::info!(user.id = %user, video.id = %video, %outcome, "recorded view");

        let counters = if outcome.is_counted() {
            self.cache.invalidate(&CacheKey::history(&user)).await;
            self.count_view(&video, outcome).await
        } else {
            self.current_counters(&video).await
        };

        Ok(ViewReport {
            outcome,
            counters,
            message: message(outcome).to_string(),
        })
    }

    /// The ledger is already committed here, so any failure is repaired in the background
    /// instead of failing the request.
    async fn count_view(&self, video: &VideoId, outcome: ViewOutcome) -> Option<CounterSnapshot> {
        match self.increment(video, outcome).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::warn!(video.id = %video, %error, "could not count view, scheduling reconciliation");
                self.reconciler.enqueue(video.clone());
                None
            }
        }
    }

    /// Adds the view to the counters, seeding them from the database when they are missing.
    ///
    /// A seed is recounted after the ledger write, so a created view is already part of it. Of
    /// several concurrent seeders only the one whose seed was stored skips the increment; the
    /// others may or may not be part of that seed, so the video is queued for a rebuild.
    async fn increment(
        &self, video: &VideoId, outcome: ViewOutcome,
    ) -> Result<CounterSnapshot, CountError> {
        let timeout = self.timeouts.counters;

        if let Some(snapshot) = counter_call(timeout, self.counters.increment_views(video)).await? {
            return Ok(snapshot);
        }

        let aggregate = guarded(self.timeouts.database, self.store.aggregate(video))
            .await
            .context(AggregateSnafu)?;

        // the ledger holds one record per user, a refresh is counted on top of it
        let seed = match outcome {
            ViewOutcome::Refreshed => aggregate.apply(Counter::Views, 1),
            _ => aggregate,
        };
        tracing::debug!(video.id = %video, ?seed, "seeding counters");

        let seeded = counter_call(timeout, self.counters.initialize_if_absent(video, seed)).await?;
        if seeded.inserted {
            return Ok(seeded.snapshot);
        }

        tracing::debug!(video.id = %video, "counters were seeded concurrently, scheduling reconciliation");
        self.reconciler.enqueue(video.clone());

        match outcome {
            ViewOutcome::Refreshed => counter_call(timeout, self.counters.increment_views(video))
                .await?
                .context(VanishedSnafu),
            _ => Ok(seeded.snapshot),
        }
    }

    async fn current_counters(&self, video: &VideoId) -> Option<CounterSnapshot> {
        match counter_call(self.timeouts.counters, self.counters.get_counters(video)).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(video.id = %video, %error, "could not read counters");
                None
            }
        }
    }
}

fn message(outcome: ViewOutcome) -> &'static str {
    match outcome {
        ViewOutcome::Created => "view recorded",
        ViewOutcome::Refreshed => "view recorded again after the rearm window",
        ViewOutcome::WithinWindow => "view already counted within the rearm window",
    }
}
