use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use snafu::ResultExt;
use tracing::instrument;
use url::Url;

use super::{BackendSnafu, CacheError, KeyValueCache};

/// Cache backed by a Redis server. The connection manager reconnects on its own, so a Redis
/// outage only shows up as failed calls.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    #[instrument(skip_all, fields(%url))]
    pub async fn connect(url: &Url) -> Result<Self, CacheError> {
        let client = redis::Client::open(url.as_str()).context(BackendSnafu)?;
        let connection = ConnectionManager::new(client).await.context(BackendSnafu)?;
        tracing::info!("connected to the cache");

        Ok(Self { connection })
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        connection.get(key).await.context(BackendSnafu)
    }

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();

        let mut command = redis::cmd("SET");
        command.arg(key).arg(payload);
        if let Some(ttl) = ttl {
            command.arg("EX").arg(ttl.as_secs().max(1));
        }

        command
            .query_async::<_, ()>(&mut connection)
            .await
            .context(BackendSnafu)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        connection.del::<_, ()>(key).await.context(BackendSnafu)
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut connection)
            .await
            .context(BackendSnafu)
    }
}
