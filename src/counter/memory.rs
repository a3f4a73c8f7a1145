use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CounterError, CounterStore, Seeded};
use crate::model::{Counter, CounterSnapshot, VideoId};

#[derive(Debug, Clone, Default)]
pub struct MemoryCounters {
    counters: Arc<DashMap<VideoId, CounterSnapshot>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn get_counters(&self, video: &VideoId) -> Result<Option<CounterSnapshot>, CounterError> {
        Ok(self.counters.get(video).map(|snapshot| *snapshot))
    }

    async fn adjust(
        &self, video: &VideoId, counter: Counter, delta: i64,
    ) -> Result<Option<CounterSnapshot>, CounterError> {
        let updated = self.counters.get_mut(video).map(|mut snapshot| {
            *snapshot = snapshot.apply(counter, delta);
            *snapshot
        });

        Ok(updated)
    }

    async fn initialize_if_absent(
        &self, video: &VideoId, seed: CounterSnapshot,
    ) -> Result<Seeded, CounterError> {
        let seeded = match self.counters.entry(video.clone()) {
            Entry::Occupied(entry) => Seeded {
                snapshot: *entry.get(),
                inserted: false,
            },
            Entry::Vacant(entry) => {
                entry.insert(seed);
                Seeded {
                    snapshot: seed,
                    inserted: true,
                }
            }
        };

        Ok(seeded)
    }

    async fn overwrite(&self, video: &VideoId, snapshot: CounterSnapshot) -> Result<(), CounterError> {
        self.counters.insert(video.clone(), snapshot);
        Ok(())
    }

    async fn remove(&self, video: &VideoId) -> Result<(), CounterError> {
        self.counters.remove(video);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> VideoId {
        VideoId::parse("v1").unwrap()
    }

    #[tokio::test]
    async fn increment_needs_initialized_counters() {
        let counters = MemoryCounters::new();

        assert_eq!(counters.increment_views(&video()).await.unwrap(), None);
        assert_eq!(counters.get_counters(&video()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let counters = MemoryCounters::new();
        let first = counters
            .initialize_if_absent(&video(), CounterSnapshot::new(4, 2, 1))
            .await
            .unwrap();
        let second = counters
            .initialize_if_absent(&video(), CounterSnapshot::new(100, 100, 100))
            .await
            .unwrap();

        assert!(first.inserted);
        assert_eq!(first.snapshot, CounterSnapshot::new(4, 2, 1));
        assert!(!second.inserted);
        assert_eq!(second.snapshot, first.snapshot, "second seed must not replace the first");
    }

    #[tokio::test]
    async fn increment_after_initialize() {
        let counters = MemoryCounters::new();
        counters
            .initialize_if_absent(&video(), CounterSnapshot::default())
            .await
            .unwrap();

        let snapshot = counters.increment_views(&video()).await.unwrap();
        assert_eq!(snapshot, Some(CounterSnapshot::new(1, 0, 0)));
    }

    #[tokio::test]
    async fn overwrite_and_remove() {
        let counters = MemoryCounters::new();
        counters
            .overwrite(&video(), CounterSnapshot::new(9, 9, 9))
            .await
            .unwrap();
        assert_eq!(
            counters.get_counters(&video()).await.unwrap(),
            Some(CounterSnapshot::new(9, 9, 9))
        );

        counters.remove(&video()).await.unwrap();
        assert_eq!(counters.get_counters(&video()).await.unwrap(), None);
    }
}
