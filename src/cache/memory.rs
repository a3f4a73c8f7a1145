use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheError, KeyValueCache};
use crate::time::{Clock, Timestamp};

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    expires_at: Option<Timestamp>,
}

impl Entry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// In-process cache for tests and single-node runs. Expiry is evaluated lazily against the
/// injected clock.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::default(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();

        // drop the read guard before removing, dashmap deadlocks otherwise
        let found = self.entries.get(key).map(|entry| entry.value().clone());
        match found {
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.payload)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| self.clock.now() + ttl);

        self.entries
            .insert(key.to_string(), Entry { payload, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::time::ManualClock;

    fn setup() -> (MemoryCache, ManualClock) {
        let clock = ManualClock::new(chrono::Utc::now());
        let cache = MemoryCache::new(Arc::new(clock.clone()));
        (cache, clock)
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let (cache, clock) = setup();
        cache
            .set("video:v1", "payload".into(), Some(Duration::from_secs(600)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(599));
        assert_eq!(cache.get("video:v1").await.unwrap().as_deref(), Some("payload"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("video:v1").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn entry_without_ttl_never_expires() {
        let (cache, clock) = setup();
        cache.set("k", "v".into(), None).await.unwrap();

        clock.advance(Duration::from_secs(60 * 60 * 24 * 365));
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (cache, _) = setup();
        cache.set("k", "v".into(), None).await.unwrap();

        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn flush_clears_every_namespace() {
        let (cache, _) = setup();
        cache.set("video:v1", "a".into(), None).await.unwrap();
        cache.set("user:u1:video-history", "b".into(), None).await.unwrap();

        cache.flush_all().await.unwrap();
        assert_eq!(cache.len(), 0);
    }
}
