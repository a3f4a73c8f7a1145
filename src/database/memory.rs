use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{RelationalStore, Result};
use crate::model::{
    Comment, CommentId, CommentView, CounterSnapshot, HistoryEntry, User, UserId, Video,
    VideoDetail, VideoId, VideoSummary, ViewOutcome, ViewRecord,
};
use crate::time::{is_rearmed, Timestamp};

type Pair = (UserId, VideoId);

#[derive(Debug, Default)]
struct Tables {
    users: DashMap<UserId, User>,
    videos: DashMap<VideoId, Video>,
    views: DashMap<Pair, ViewRecord>,
    comments: DashMap<CommentId, Comment>,
    likes: DashMap<Pair, Timestamp>,

    detail_reads: AtomicUsize,
    history_reads: AtomicUsize,
}

/// In-process store used by the tests and by local runs without a database.
///
/// The view ledger upsert runs under the shard lock of the (user, video) entry, which gives it the
/// same atomicity as the conditional upsert in [super::SurrealStore].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [RelationalStore::video_detail] calls served so far.
    pub fn detail_reads(&self) -> usize {
        self.tables.detail_reads.load(Ordering::SeqCst)
    }

    /// Number of [RelationalStore::history] calls served so far.
    pub fn history_reads(&self) -> usize {
        self.tables.history_reads.load(Ordering::SeqCst)
    }

    /// Users come from the authentication service, so only the tests create them here.
    pub fn insert_user(&self, user: User) -> User {
        self.tables.users.insert(user.id.clone(), user.clone());
        user
    }

    pub fn view_record(&self, user: &UserId, video: &VideoId) -> Option<ViewRecord> {
        let key = (user.clone(), video.clone());
        self.tables.views.get(&key).map(|record| record.value().clone())
    }

    pub fn view_records(&self, video: &VideoId) -> usize {
        self.tables
            .views
            .iter()
            .filter(|record| &record.video == video)
            .count()
    }

    fn user_of(&self, id: &UserId) -> Option<User> {
        self.tables.users.get(id).map(|user| user.value().clone())
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.user_of(id))
    }

    async fn video(&self, id: &VideoId) -> Result<Option<Video>> {
        Ok(self.tables.videos.get(id).map(|video| video.value().clone()))
    }

    async fn videos(&self) -> Result<Vec<VideoSummary>> {
        let videos: Vec<Video> = self
            .tables
            .videos
            .iter()
            .map(|video| video.value().clone())
            .collect();

        let mut summaries: Vec<VideoSummary> = videos
            .into_iter()
            .filter_map(|video| {
                let uploader = self.user_of(&video.owner)?;

                Some(VideoSummary {
                    id: video.id,
                    title: video.title,
                    thumbnail_url: video.thumbnail_url,
                    created_at: video.created_at,
                    uploader: uploader.full_name,
                    uploader_avatar_url: uploader.avatar_url,
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn video_detail(&self, id: &VideoId) -> Result<Option<VideoDetail>> {
        self.tables.detail_reads.fetch_add(1, Ordering::SeqCst);

        let Some(video) = self.tables.videos.get(id).map(|video| video.value().clone()) else {
            return Ok(None);
        };
        let Some(owner) = self.user_of(&video.owner) else {
            return Ok(None);
        };

        let aggregate = self.aggregate(id).await?;

        Ok(Some(VideoDetail {
            id: video.id,
            title: video.title,
            description: video.description,
            media_url: video.media_url,
            thumbnail_url: video.thumbnail_url,
            created_at: video.created_at,
            owner: owner.id,
            username: owner.username,
            full_name: owner.full_name,
            avatar_url: owner.avatar_url,
            comments: aggregate.comments,
            likes: aggregate.likes,
        }))
    }

    async fn create_video(&self, video: &Video) -> Result<Video> {
        self.tables.videos.insert(video.id.clone(), video.clone());
        Ok(video.clone())
    }

    async fn update_video(&self, video: &Video) -> Result<Option<Video>> {
        let updated = self.tables.videos.get_mut(&video.id).map(|mut stored| {
            stored.title = video.title.clone();
            stored.description = video.description.clone();
            stored.thumbnail_url = video.thumbnail_url.clone();
            stored.value().clone()
        });

        Ok(updated)
    }

    async fn delete_video(&self, id: &VideoId) -> Result<Option<Video>> {
        let Some((_, video)) = self.tables.videos.remove(id) else {
            return Ok(None);
        };

        self.tables.views.retain(|(_, video), _| video != id);
        self.tables.comments.retain(|_, comment| &comment.video != id);
        self.tables.likes.retain(|(_, video), _| video != id);

        Ok(Some(video))
    }

    async fn upsert_view(
        &self, user: &UserId, video: &VideoId, now: Timestamp, window: Duration,
    ) -> Result<ViewOutcome> {
        let outcome = match self.tables.views.entry((user.clone(), video.clone())) {
            Entry::Vacant(entry) => {
                entry.insert(ViewRecord {
                    user: user.clone(),
                    video: video.clone(),
                    created_at: now,
                    updated_at: now,
                });
                ViewOutcome::Created
            }
            Entry::Occupied(mut entry) if is_rearmed(entry.get().updated_at, now, window) => {
                entry.get_mut().updated_at = now;
                ViewOutcome::Refreshed
            }
            Entry::Occupied(_) => ViewOutcome::WithinWindow,
        };

        Ok(outcome)
    }

    async fn viewers(&self, video: &VideoId) -> Result<Vec<UserId>> {
        let viewers = self
            .tables
            .views
            .iter()
            .filter(|record| &record.video == video)
            .map(|record| record.user.clone())
            .collect();

        Ok(viewers)
    }

    async fn history(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        self.tables.history_reads.fetch_add(1, Ordering::SeqCst);

        let records: Vec<ViewRecord> = self
            .tables
            .views
            .iter()
            .filter(|record| &record.user == user)
            .map(|record| record.value().clone())
            .collect();

        let mut entries: Vec<HistoryEntry> = records
            .into_iter()
            .filter_map(|record| {
                let video = self.tables.videos.get(&record.video)?.value().clone();
                let uploader = self.user_of(&video.owner)?;

                Some(HistoryEntry {
                    video_id: video.id,
                    title: video.title,
                    thumbnail_url: video.thumbnail_url,
                    uploader: uploader.full_name,
                    viewed_at: record.updated_at,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        Ok(entries)
    }

    async fn aggregate(&self, video: &VideoId) -> Result<CounterSnapshot> {
        let views = self
            .tables
            .views
            .iter()
            .filter(|record| &record.video == video)
            .count();
        let comments = self
            .tables
            .comments
            .iter()
            .filter(|comment| &comment.video == video)
            .count();
        let likes = self
            .tables
            .likes
            .iter()
            .filter(|like| &like.key().1 == video)
            .count();

        Ok(CounterSnapshot::new(
            views as u64,
            comments as u64,
            likes as u64,
        ))
    }

    async fn comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        Ok(self.tables.comments.get(id).map(|comment| comment.value().clone()))
    }

    async fn create_comment(&self, comment: &Comment) -> Result<Comment> {
        self.tables
            .comments
            .insert(comment.id.clone(), comment.clone());
        Ok(comment.clone())
    }

    async fn update_comment(&self, comment: &Comment) -> Result<Option<Comment>> {
        let updated = self.tables.comments.get_mut(&comment.id).map(|mut stored| {
            stored.description = comment.description.clone();
            stored.value().clone()
        });

        Ok(updated)
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        Ok(self.tables.comments.remove(id).map(|(_, comment)| comment))
    }

    async fn comments(&self, video: &VideoId) -> Result<Vec<CommentView>> {
        let comments: Vec<Comment> = self
            .tables
            .comments
            .iter()
            .filter(|comment| &comment.video == video)
            .map(|comment| comment.value().clone())
            .collect();

        let mut views: Vec<CommentView> = comments
            .into_iter()
            .filter_map(|comment| {
                let commenter = self.user_of(&comment.commenter)?;

                Some(CommentView {
                    comment_id: comment.id,
                    description: comment.description,
                    created_at: comment.created_at,
                    commenter_id: commenter.id,
                    commenter_username: commenter.username,
                    commenter_avatar_url: commenter.avatar_url,
                })
            })
            .collect();

        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(views)
    }

    async fn add_like(&self, user: &UserId, video: &VideoId, at: Timestamp) -> Result<bool> {
        let inserted = match self.tables.likes.entry((user.clone(), video.clone())) {
            Entry::Vacant(entry) => {
                entry.insert(at);
                true
            }
            Entry::Occupied(_) => false,
        };

        Ok(inserted)
    }

    async fn remove_like(&self, user: &UserId, video: &VideoId) -> Result<bool> {
        let key = (user.clone(), video.clone());
        Ok(self.tables.likes.remove(&key).is_some())
    }

    async fn has_liked(&self, user: &UserId, video: &VideoId) -> Result<bool> {
        let key = (user.clone(), video.clone());
        Ok(self.tables.likes.contains_key(&key))
    }
}
