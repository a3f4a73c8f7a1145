use std::time::Duration;

use async_trait::async_trait;
use snafu::{Location, Snafu};
use url::Url;

use crate::model::{
    Comment, CommentId, CommentView, CounterSnapshot, HistoryEntry, User, UserId, Video,
    VideoDetail, VideoId, VideoSummary, ViewOutcome,
};
use crate::time::Timestamp;
use crate::Located;

pub use memory::MemoryStore;
pub use surreal::{DatabaseConfig, SurrealStore};

mod memory;
mod query;
mod surreal;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatabaseError {
    #[snafu(display("failed to query the database at {location}: {source}"))]
    DatabaseQuery {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to deserialize the database response at {location}: {source}"))]
    DatabaseDeserialize {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to parse the database response at {location}: response is empty"))]
    EmptyQuery {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database returned an unknown view outcome `{outcome}` at {location}"))]
    UnknownOutcome {
        outcome: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database row holds an invalid id at {location}: {source}"))]
    InvalidRow {
        source: crate::model::ParseId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot connect to the database `{url}` at {location}: {source}"))]
    DatabaseConnection {
        url: Url,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database is unavailable at {location}: {reason}"))]
    Unavailable {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for DatabaseError {
    fn location(&self) -> Location {
        match self {
            DatabaseError::DatabaseQuery { location, .. }
            | DatabaseError::DatabaseDeserialize { location, .. }
            | DatabaseError::EmptyQuery { location, .. }
            | DatabaseError::UnknownOutcome { location, .. }
            | DatabaseError::InvalidRow { location, .. }
            | DatabaseError::DatabaseConnection { location, .. }
            | DatabaseError::Unavailable { location, .. } => *location,
        }
    }
}

/// The source of truth for users, videos, views, comments and likes.
///
/// Ownership checks belong to the callers; the store only enforces uniqueness of views and likes
/// per (user, video).
#[async_trait]
pub trait RelationalStore: std::fmt::Debug + Send + Sync {
    async fn user(&self, id: &UserId) -> Result<Option<User>>;

    async fn video(&self, id: &VideoId) -> Result<Option<Video>>;

    /// Every video with its uploader, newest first.
    async fn videos(&self) -> Result<Vec<VideoSummary>>;

    /// The video joined with its owner and its comment/like aggregates.
    async fn video_detail(&self, id: &VideoId) -> Result<Option<VideoDetail>>;

    async fn create_video(&self, video: &Video) -> Result<Video>;

    /// Writes the mutable fields (title, description, thumbnail) of an existing video.
    async fn update_video(&self, video: &Video) -> Result<Option<Video>>;

    /// Deletes the video along with its views, comments and likes.
    async fn delete_video(&self, id: &VideoId) -> Result<Option<Video>>;

    /// Records a view with a single conditional upsert:
    ///
    /// - no record for (user, video): create it, [ViewOutcome::Created]
    /// - record older than `window`: bump its timestamp, [ViewOutcome::Refreshed]
    /// - otherwise leave it alone, [ViewOutcome::WithinWindow]
    ///
    /// Concurrent calls for the same pair must yield at most one counted outcome per window.
    async fn upsert_view(
        &self, user: &UserId, video: &VideoId, now: Timestamp, window: Duration,
    ) -> Result<ViewOutcome>;

    /// Users holding a ledger record for `video`.
    async fn viewers(&self, video: &VideoId) -> Result<Vec<UserId>>;

    /// Videos viewed by `user`, most recently viewed first.
    async fn history(&self, user: &UserId) -> Result<Vec<HistoryEntry>>;

    /// Recounts the aggregates of a video from its rows. Views are the number of ledger records.
    async fn aggregate(&self, video: &VideoId) -> Result<CounterSnapshot>;

    async fn comment(&self, id: &CommentId) -> Result<Option<Comment>>;

    async fn create_comment(&self, comment: &Comment) -> Result<Comment>;

    async fn update_comment(&self, comment: &Comment) -> Result<Option<Comment>>;

    async fn delete_comment(&self, id: &CommentId) -> Result<Option<Comment>>;

    /// Comments on a video joined with their authors, newest first.
    async fn comments(&self, video: &VideoId) -> Result<Vec<CommentView>>;

    /// Returns `false` when the like already existed.
    async fn add_like(&self, user: &UserId, video: &VideoId, at: Timestamp) -> Result<bool>;

    /// Returns `false` when there was nothing to remove.
    async fn remove_like(&self, user: &UserId, video: &VideoId) -> Result<bool>;

    async fn has_liked(&self, user: &UserId, video: &VideoId) -> Result<bool>;
}
