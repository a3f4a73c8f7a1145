use async_trait::async_trait;
use snafu::{Location, Snafu};

use crate::model::{Counter, CounterSnapshot, VideoId};
use crate::Located;

pub use memory::MemoryCounters;
pub use self::redis::RedisCounters;

mod memory;
mod redis;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CounterError {
    #[snafu(display("counter store failed at {location}: {source}"))]
    Backend {
        source: ::redis::RedisError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("counter store is unreachable at {location}: {reason}"))]
    Unreachable {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for CounterError {
    fn location(&self) -> Location {
        match self {
            CounterError::Backend { location, .. }
            | CounterError::Unreachable { location, .. } => *location,
        }
    }
}

/// What [CounterStore::initialize_if_absent] left in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seeded {
    pub snapshot: CounterSnapshot,
    /// `true` when this call's seed was stored, `false` when counters already existed.
    pub inserted: bool,
}

/// Fast, denormalized per-video aggregates. Independent from the cache, and never authoritative:
/// everything here can be rebuilt from the database.
#[async_trait]
pub trait CounterStore: std::fmt::Debug + Send + Sync {
    async fn get_counters(&self, video: &VideoId) -> Result<Option<CounterSnapshot>, CounterError>;

    /// Adds `delta` to one counter and returns the updated snapshot. Does nothing and returns
    /// `None` when the video has no counters yet, so that a partial entry never shadows the seed
    /// computed by [CounterStore::initialize_if_absent].
    async fn adjust(
        &self, video: &VideoId, counter: Counter, delta: i64,
    ) -> Result<Option<CounterSnapshot>, CounterError>;

    async fn increment_views(&self, video: &VideoId) -> Result<Option<CounterSnapshot>, CounterError> {
        self.adjust(video, Counter::Views, 1).await
    }

    /// Stores `seed` unless the video already has counters, and returns whatever is stored
    /// afterwards. Of several concurrent calls exactly one reports `inserted`.
    async fn initialize_if_absent(
        &self, video: &VideoId, seed: CounterSnapshot,
    ) -> Result<Seeded, CounterError>;

    async fn overwrite(&self, video: &VideoId, snapshot: CounterSnapshot) -> Result<(), CounterError>;

    async fn remove(&self, video: &VideoId) -> Result<(), CounterError>;
}
