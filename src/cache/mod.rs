use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{Location, Snafu};
use tracing::instrument;

use crate::model::{UserId, VideoId};
use crate::time::deadline;
use crate::Located;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

mod memory;
mod redis;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("cache backend failed at {location}: {source}"))]
    Backend {
        source: ::redis::RedisError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cache backend is unreachable at {location}: {reason}"))]
    Unreachable {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for CacheError {
    fn location(&self) -> Location {
        match self {
            CacheError::Backend { location, .. } | CacheError::Unreachable { location, .. } => {
                *location
            }
        }
    }
}

/// A string keyed store of serialized payloads with optional expiry.
#[async_trait]
pub trait KeyValueCache: std::fmt::Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn flush_all(&self) -> Result<(), CacheError>;
}

/// A namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn video(id: &VideoId) -> Self {
        Self(format!("video:{id}"))
    }

    pub fn history(user: &UserId) -> Self {
        Self(format!("user:{user}:video-history"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON front for a [KeyValueCache] that never lets a cache problem fail the caller.
///
/// Reads that error, time out or hold an undecodable payload are misses. Writes and deletes
/// report success as a `bool` and log the failure.
#[derive(Debug, Clone, new)]
pub struct Cache {
    backend: Arc<dyn KeyValueCache>,
    timeout: Duration,
}

impl Cache {
    #[instrument(skip(self, key), fields(%key))]
    pub async fn fetch<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let payload = match deadline(self.timeout, self.backend.get(key.as_str())).await {
            Ok(Ok(Some(payload))) => payload,
            Ok(Ok(None)) => {
                tracing::debug!("cache miss");
                return None;
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "cache read failed, treating as a miss");
                return None;
            }
            Err(error) => {
                tracing::warn!(%error, "cache read timed out, treating as a miss");
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                tracing::debug!("cache hit");
                Some(value)
            }
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable cache entry");
                self.invalidate(key).await;
                None
            }
        }
    }

    #[instrument(skip(self, key, value), fields(%key))]
    pub async fn store<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, "could not serialize cache payload");
                return false;
            }
        };

        let write = self.backend.set(key.as_str(), payload, Some(ttl));
        match deadline(self.timeout, write).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                tracing::warn!(%error, "cache write failed");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "cache write timed out");
                false
            }
        }
    }

    /// Drops `key`. A failed delete leaves the entry to expire through its TTL.
    #[instrument(skip(self, key), fields(%key))]
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        match deadline(self.timeout, self.backend.delete(key.as_str())).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                tracing::warn!(%error, "cache invalidation failed, entry will expire by ttl");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "cache invalidation timed out, entry will expire by ttl");
                false
            }
        }
    }

    /// Administrative flush. Unlike the other operations this reports the failure.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<(), CacheError> {
        tracing::info!("flushing the whole cache");
        match deadline(self.timeout, self.backend.flush_all()).await {
            Ok(result) => result,
            Err(elapsed) => UnreachableSnafu {
                reason: elapsed.to_string(),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{FailingCache, SlowCache};
    use crate::time::{ManualClock, SystemClock};

    fn cache(backend: impl KeyValueCache + 'static) -> Cache {
        Cache::new(Arc::new(backend), Duration::from_millis(50))
    }

    #[test]
    fn keys_are_namespaced() {
        let video = VideoId::parse("v1").unwrap();
        let user = UserId::parse("u1").unwrap();

        assert_eq!(CacheKey::video(&video).as_str(), "video:v1");
        assert_eq!(CacheKey::history(&user).as_str(), "user:u1:video-history");
    }

    #[tokio::test]
    async fn store_then_fetch() {
        let cache = cache(MemoryCache::new(Arc::new(SystemClock)));
        let key = CacheKey::video(&VideoId::parse("v1").unwrap());

        assert!(cache.store(&key, &vec![1, 2, 3], Duration::from_secs(60)).await);
        assert_eq!(cache.fetch::<Vec<i32>>(&key).await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss_and_gets_dropped() {
        let backend = MemoryCache::new(Arc::new(ManualClock::new(chrono::Utc::now())));
        backend.set("video:v1", "{not json".into(), None).await.unwrap();

        let cache = cache(backend.clone());
        let key = CacheKey::video(&VideoId::parse("v1").unwrap());

        assert_eq!(cache.fetch::<Vec<i32>>(&key).await, None);
        assert_eq!(backend.get("video:v1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_backend_degrades_to_miss() {
        let cache = cache(FailingCache);
        let key = CacheKey::video(&VideoId::parse("v1").unwrap());

        assert_eq!(cache.fetch::<String>(&key).await, None);
        assert!(!cache.store(&key, &"payload", Duration::from_secs(60)).await);
        assert!(!cache.invalidate(&key).await);
        assert!(cache.flush().await.is_err());
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_miss() {
        let cache = cache(SlowCache(Duration::from_secs(5)));
        let key = CacheKey::video(&VideoId::parse("v1").unwrap());

        assert_eq!(cache.fetch::<String>(&key).await, None);
        assert!(matches!(
            cache.flush().await,
            Err(CacheError::Unreachable { .. })
        ));
    }
}
