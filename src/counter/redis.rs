use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use snafu::ResultExt;
use tracing::instrument;
use url::Url;

use super::{BackendSnafu, CounterError, CounterStore, Seeded};
use crate::model::{Counter, CounterSnapshot, VideoId};

/// Increments one field, clamping at zero, but only when the hash already exists.
const ADJUST: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
local value = redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
if value < 0 then
    redis.call('HSET', KEYS[1], ARGV[1], 0)
end
return redis.call('HGETALL', KEYS[1])
";

/// Returns `{inserted, fields}` where `inserted` is 1 when the seed was written.
const INITIALIZE: &str = r"
local inserted = 0
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('HSET', KEYS[1], 'views', ARGV[1], 'comments', ARGV[2], 'likes', ARGV[3])
    inserted = 1
end
return {inserted, redis.call('HGETALL', KEYS[1])}
";

/// Counters stored as one Redis hash per video: `counters:video:<id>` with the fields `views`,
/// `comments` and `likes`.
#[derive(Clone)]
pub struct RedisCounters {
    connection: ConnectionManager,
    adjust: Script,
    initialize: Script,
}

impl RedisCounters {
    #[instrument(skip_all, fields(%url))]
    pub async fn connect(url: &Url) -> Result<Self, CounterError> {
        let client = redis::Client::open(url.as_str()).context(BackendSnafu)?;
        let connection = ConnectionManager::new(client).await.context(BackendSnafu)?;
        tracing::info!("connected to the counter store");

        Ok(Self {
            connection,
            adjust: Script::new(ADJUST),
            initialize: Script::new(INITIALIZE),
        })
    }
}

impl std::fmt::Debug for RedisCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounters").finish_non_exhaustive()
    }
}

fn key(video: &VideoId) -> String {
    format!("counters:video:{video}")
}

fn snapshot(fields: &HashMap<String, i64>) -> CounterSnapshot {
    let read = |counter: Counter| {
        fields
            .get(counter.field())
            .copied()
            .unwrap_or_default()
            .max(0) as u64
    };

    CounterSnapshot::new(
        read(Counter::Views),
        read(Counter::Comments),
        read(Counter::Likes),
    )
}

#[async_trait]
impl CounterStore for RedisCounters {
    async fn get_counters(&self, video: &VideoId) -> Result<Option<CounterSnapshot>, CounterError> {
        let mut connection = self.connection.clone();
        let fields: HashMap<String, i64> =
            connection.hgetall(key(video)).await.context(BackendSnafu)?;

        // HGETALL on a missing key is an empty map
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(snapshot(&fields)))
    }

    async fn adjust(
        &self, video: &VideoId, counter: Counter, delta: i64,
    ) -> Result<Option<CounterSnapshot>, CounterError> {
        let mut connection = self.connection.clone();
        let fields: Option<HashMap<String, i64>> = self
            .adjust
            .key(key(video))
            .arg(counter.field())
            .arg(delta)
            .invoke_async(&mut connection)
            .await
            .context(BackendSnafu)?;

        Ok(fields.as_ref().map(snapshot))
    }

    async fn initialize_if_absent(
        &self, video: &VideoId, seed: CounterSnapshot,
    ) -> Result<Seeded, CounterError> {
        let mut connection = self.connection.clone();
        let (inserted, fields): (i64, HashMap<String, i64>) = self
            .initialize
            .key(key(video))
            .arg(seed.views)
            .arg(seed.comments)
            .arg(seed.likes)
            .invoke_async(&mut connection)
            .await
            .context(BackendSnafu)?;

        Ok(Seeded {
            snapshot: snapshot(&fields),
            inserted: inserted == 1,
        })
    }

    async fn overwrite(&self, video: &VideoId, snapshot: CounterSnapshot) -> Result<(), CounterError> {
        let mut connection = self.connection.clone();
        let fields = [
            (Counter::Views.field(), snapshot.views),
            (Counter::Comments.field(), snapshot.comments),
            (Counter::Likes.field(), snapshot.likes),
        ];

        connection
            .hset_multiple::<_, _, _, ()>(key(video), &fields[..])
            .await
            .context(BackendSnafu)
    }

    async fn remove(&self, video: &VideoId) -> Result<(), CounterError> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(key(video))
            .await
            .context(BackendSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_namespaced_by_video() {
        let video = VideoId::parse("v1").unwrap();
        assert_eq!(key(&video), "counters:video:v1");
    }

    #[test]
    fn snapshot_defaults_missing_fields_to_zero() {
        let fields = HashMap::from([("views".to_string(), 7), ("likes".to_string(), -2)]);
        assert_eq!(snapshot(&fields), CounterSnapshot::new(7, 0, 0));
    }
}
