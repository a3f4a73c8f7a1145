use std::sync::Arc;

use derive_new::new;
use snafu::{ensure, OptionExt as _, ResultExt as _};
use tracing::instrument;

use super::reconcile::counter_call;
use super::{
    guarded, required, BlobSnafu, CacheFlushSnafu, ConflictSnafu, InvalidIdSnafu,
    InvalidInputSnafu, NotFoundSnafu, Reconciler, Result, Timeouts,
};
use crate::blob::BlobStore;
use crate::cache::{Cache, CacheKey};
use crate::counter::CounterStore;
use crate::database::RelationalStore;
use crate::model::{
    Comment, CommentId, CommentView, Counter, CounterSnapshot, User, UserId, Video, VideoCard,
    VideoId,
};
use crate::time::Clock;

/// An upload as received from the client.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub media: Vec<u8>,
}

/// Mutations of videos and their engagement. Every successful mutation drops the cached page of
/// the video it touched.
#[derive(Debug, Clone, new)]
pub struct VideoService {
    store: Arc<dyn RelationalStore>,
    counters: Arc<dyn CounterStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Cache,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    timeouts: Timeouts,
}

impl VideoService {
    #[instrument(skip(self, upload), fields(title = %upload.title, size = upload.media.len()))]
    pub async fn create_video(&self, owner_id: &str, upload: NewVideo) -> Result<Video> {
        let owner = UserId::parse(owner_id).context(InvalidIdSnafu)?;
        let title = required("title", &upload.title)?;
        let description = required("description", &upload.description)?;
        ensure!(
            !upload.media.is_empty(),
            InvalidInputSnafu {
                message: "video file is required"
            }
        );

        let user = self.user(&owner).await?;
        let now = self.clock.now();

        let media_key = format!("videos/{}/{}", user.username, now.timestamp_millis());
        let media_url = self
            .blobs
            .put(&media_key, upload.media)
            .await
            .context(BlobSnafu)?;

        let video = Video::new(VideoId::generate(), owner, title, description, media_url, now);
        let created = match guarded(self.timeouts.database, self.store.create_video(&video)).await {
            Ok(created) => created,
            Err(error) => {
                self.discard_blob(&video.media_url).await;
                return Err(error);
            }
        };
        tracing::info!(video.id = %created.id, "created video");

        let initialize = self
            .counters
            .initialize_if_absent(&created.id, CounterSnapshot::default());
        if let Err(error) = counter_call(self.timeouts.counters, initialize).await {
            tracing::warn!(video.id = %created.id, %error, "could not initialize counters");
        }

        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn update_video_info(
        &self, video_id: &str, owner_id: &str, title: &str, description: &str,
    ) -> Result<Video> {
        let mut video = self.owned_video(video_id, owner_id).await?;
        video.title = required("title", title)?;
        video.description = required("description", description)?;

        let updated = self.update(&video).await?;
        self.invalidate(&updated.id).await;

        Ok(updated)
    }

    /// Stores a new thumbnail and drops the previous one.
    #[instrument(skip(self, image), fields(size = image.len()))]
    pub async fn update_thumbnail(
        &self, video_id: &str, owner_id: &str, image: Vec<u8>,
    ) -> Result<Video> {
        ensure!(
            !image.is_empty(),
            InvalidInputSnafu {
                message: "thumbnail file is required"
            }
        );

        let mut video = self.owned_video(video_id, owner_id).await?;
        let user = self.user(&video.owner).await?;

        let key = format!("thumbnail/{}/{}", user.username, self.clock.now().timestamp_millis());
        let thumbnail = self.blobs.put(&key, image).await.context(BlobSnafu)?;
        let previous = video.thumbnail_url.replace(thumbnail.clone());

        let updated = match self.update(&video).await {
            Ok(updated) => updated,
            Err(error) => {
                self.discard_blob(&thumbnail).await;
                return Err(error);
            }
        };
        self.invalidate(&updated.id).await;

        if let Some(previous) = previous.filter(|previous| previous != &thumbnail) {
            self.discard_blob(&previous).await;
        }

        Ok(updated)
    }

    /// Deletes the video with its views, comments and likes, then its files, counters and every
    /// cached page or watch history that lists it.
    #[instrument(skip(self))]
    pub async fn delete_video(&self, video_id: &str, owner_id: &str) -> Result<Video> {
        let video = self.owned_video(video_id, owner_id).await?;
        let viewers = guarded(self.timeouts.database, self.store.viewers(&video.id)).await?;

        let deleted = guarded(self.timeouts.database, self.store.delete_video(&video.id))
            .await?
            .context(NotFoundSnafu {
                what: format!("video {}", video.id),
            })?;
        tracing::info!(video.id = %deleted.id, "deleted video");

        self.discard_blob(&deleted.media_url).await;
        if let Some(thumbnail) = &deleted.thumbnail_url {
            self.discard_blob(thumbnail).await;
        }

        if let Err(error) =
            counter_call(self.timeouts.counters, self.counters.remove(&deleted.id)).await
        {
            tracing::warn!(video.id = %deleted.id, %error, "could not remove counters");
        }

        self.invalidate(&deleted.id).await;
        for viewer in &viewers {
            self.cache.invalidate(&CacheKey::history(viewer)).await;
        }

        Ok(deleted)
    }

    /// Every video with its uploader, newest first.
    #[instrument(skip(self))]
    pub async fn list_videos(&self) -> Result<Vec<VideoCard>> {
        let now = self.clock.now();
        let videos = guarded(self.timeouts.database, self.store.videos()).await?;

        let cards = videos
            .into_iter()
            .map(|summary| VideoCard {
                age_days: (now - summary.created_at).num_days(),
                summary,
            })
            .collect();

        Ok(cards)
    }

    #[instrument(skip(self))]
    pub async fn create_comment(
        &self, video_id: &str, user_id: &str, description: &str,
    ) -> Result<Comment> {
        let commenter = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let description = required("description", description)?;
        let video = self.video(video_id).await?;
        self.user(&commenter).await?;

        let comment = Comment::new(
            CommentId::generate(),
            video.id,
            commenter,
            description,
            self.clock.now(),
        );
        let created = guarded(self.timeouts.database, self.store.create_comment(&comment)).await?;

        self.adjust(&created.video, Counter::Comments, 1).await;
        self.invalidate(&created.video).await;

        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn update_comment(
        &self, video_id: &str, comment_id: &str, user_id: &str, description: &str,
    ) -> Result<Comment> {
        let description = required("description", description)?;
        let mut comment = self.owned_comment(video_id, comment_id, user_id).await?;
        comment.description = description;

        let updated = guarded(self.timeouts.database, self.store.update_comment(&comment))
            .await?
            .context(NotFoundSnafu {
                what: format!("comment {}", comment.id),
            })?;

        self.invalidate(&updated.video).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_comment(
        &self, video_id: &str, comment_id: &str, user_id: &str,
    ) -> Result<Comment> {
        let comment = self.owned_comment(video_id, comment_id, user_id).await?;

        let deleted = guarded(self.timeouts.database, self.store.delete_comment(&comment.id))
            .await?
            .context(NotFoundSnafu {
                what: format!("comment {}", comment.id),
            })?;

        self.adjust(&deleted.video, Counter::Comments, -1).await;
        self.invalidate(&deleted.video).await;

        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn like(&self, video_id: &str, user_id: &str) -> Result<()> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let video = self.video(video_id).await?;

        let inserted = guarded(
            self.timeouts.database,
            self.store.add_like(&user, &video.id, self.clock.now()),
        )
        .await?;
        ensure!(
            inserted,
            ConflictSnafu {
                message: format!("video {} is already liked", video.id)
            }
        );

        self.adjust(&video.id, Counter::Likes, 1).await;
        self.invalidate(&video.id).await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unlike(&self, video_id: &str, user_id: &str) -> Result<()> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let video = VideoId::parse(video_id).context(InvalidIdSnafu)?;

        let removed = guarded(self.timeouts.database, self.store.remove_like(&user, &video)).await?;
        ensure!(
            removed,
            NotFoundSnafu {
                what: format!("like on video {video}")
            }
        );

        self.adjust(&video, Counter::Likes, -1).await;
        self.invalidate(&video).await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn has_liked(&self, video_id: &str, user_id: &str) -> Result<bool> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let video = VideoId::parse(video_id).context(InvalidIdSnafu)?;

        guarded(self.timeouts.database, self.store.has_liked(&user, &video)).await
    }

    /// Comments on the video with their authors, newest first.
    #[instrument(skip(self))]
    pub async fn video_engagement(&self, video_id: &str) -> Result<Vec<CommentView>> {
        let video = self.video(video_id).await?;

        guarded(self.timeouts.database, self.store.comments(&video.id)).await
    }

    #[instrument(skip(self))]
    pub async fn flush_cache(&self) -> Result<()> {
        self.cache.flush().await.context(CacheFlushSnafu)
    }

    async fn user(&self, id: &UserId) -> Result<User> {
        guarded(self.timeouts.database, self.store.user(id))
            .await?
            .context(NotFoundSnafu {
                what: format!("user {id}"),
            })
    }

    async fn video(&self, video_id: &str) -> Result<Video> {
        let id = VideoId::parse(video_id).context(InvalidIdSnafu)?;

        guarded(self.timeouts.database, self.store.video(&id))
            .await?
            .context(NotFoundSnafu {
                what: format!("video {id}"),
            })
    }

    /// Someone else's video is reported as missing.
    async fn owned_video(&self, video_id: &str, owner_id: &str) -> Result<Video> {
        let owner = UserId::parse(owner_id).context(InvalidIdSnafu)?;
        let video = self.video(video_id).await?;

        ensure!(
            video.is_owned_by(&owner),
            NotFoundSnafu {
                what: format!("video {}", video.id)
            }
        );

        Ok(video)
    }

    async fn owned_comment(
        &self, video_id: &str, comment_id: &str, user_id: &str,
    ) -> Result<Comment> {
        let user = UserId::parse(user_id).context(InvalidIdSnafu)?;
        let video = VideoId::parse(video_id).context(InvalidIdSnafu)?;
        let id = CommentId::parse(comment_id).context(InvalidIdSnafu)?;

        let comment = guarded(self.timeouts.database, self.store.comment(&id))
            .await?
            .filter(|comment| comment.video == video && comment.commenter == user)
            .context(NotFoundSnafu {
                what: format!("comment {id}"),
            })?;

        Ok(comment)
    }

    async fn update(&self, video: &Video) -> Result<Video> {
        guarded(self.timeouts.database, self.store.update_video(video))
            .await?
            .context(NotFoundSnafu {
                what: format!("video {}", video.id),
            })
    }

    async fn adjust(&self, video: &VideoId, counter: Counter, delta: i64) {
        let call = self.counters.adjust(video, counter, delta);

        match counter_call(self.timeouts.counters, call).await {
            Ok(Some(snapshot)) => tracing::debug!(video.id = %video, ?snapshot, "adjusted counters"),
            Ok(None) => tracing::debug!(video.id = %video, "counters are not initialized yet"),
            Err(error) => {
                tracing::warn!(video.id = %video, %error, "could not adjust counters, scheduling reconciliation");
                self.reconciler.enqueue(video.clone());
            }
        }
    }

    async fn invalidate(&self, video: &VideoId) {
        self.cache.invalidate(&CacheKey::video(video)).await;
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(error) = self.blobs.delete(key).await {
            tracing::warn!(%key, %error, "could not delete blob");
        }
    }
}
