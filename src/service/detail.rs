use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::instrument;

use super::{guarded, InvalidIdSnafu, NotFoundSnafu, Result};
use crate::cache::{Cache, CacheKey};
use crate::database::RelationalStore;
use crate::model::{HistoryEntry, UserId, VideoDetail, VideoId};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Cache-aside reads of video pages and watch histories.
#[derive(Debug, Clone, new)]
pub struct VideoDetailService {
    store: Arc<dyn RelationalStore>,
    cache: Cache,
    ttl: Duration,
    database_timeout: Duration,
}

impl VideoDetailService {
    #[instrument(skip(self))]
    pub async fn get_video_detail(&self, video_id: &str) -> Result<VideoDetail> {
        let id = VideoId::parse(video_id).context(InvalidIdSnafu)?;
        let key = CacheKey::video(&id);

        if let Some(detail) = self.cache.fetch::<VideoDetail>(&key).await {
            return Ok(detail);
        }

        let detail = guarded(self.database_timeout, self.store.video_detail(&id))
            .await?
            .context(NotFoundSnafu {
                what: format!("video {id}"),
            })?;

        self.cache.store(&key, &detail, self.ttl).await;
        Ok(detail)
    }

    #[instrument(skip(self))]
    pub async fn get_video_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let key = CacheKey::history(&user);

        if let Some(history) = self.cache.fetch::<Vec<HistoryEntry>>(&key).await {
            return Ok(history);
        }

        let history = guarded(self.database_timeout, self.store.history(&user)).await?;
        tracing::debug!(user.id = %user, count = history.len(), "loaded watch history");

        self.cache.store(&key, &history, self.ttl).await;
        Ok(history)
    }
}
