use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use snafu::{OptionExt as _, ResultExt as _};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth;
use surrealdb::Surreal;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::instrument;
use url::Url;

use super::query::Sql;
use super::{
    DatabaseConnectionSnafu, DatabaseError, InvalidRowSnafu, RelationalStore, Result,
    UnknownOutcomeSnafu,
};
use crate::model::{
    Comment, CommentId, CommentView, CounterSnapshot, HistoryEntry, User, UserId, Video,
    VideoDetail, VideoId, VideoSummary, ViewOutcome,
};
use crate::time::{rearm_cutoff, Timestamp};

const SETUP: &str = include_str!("../../schema.surrealql");

/// Transaction conflicts between concurrent upserts of the same pair are retried; the retry sees
/// the committed record and resolves to [ViewOutcome::WithinWindow]. Nothing else is retried, a
/// lost response may belong to a committed write.
const UPSERT_RETRIES: usize = 3;

macro_rules! video_fields {
    () => {
        "meta::id(id) AS id, meta::id(owner) AS owner, title, description, media_url, thumbnail_url, created_at"
    };
}

macro_rules! comment_fields {
    () => {
        "meta::id(id) AS id, meta::id(video) AS video, meta::id(commenter) AS commenter, description, created_at"
    };
}

const UPSERT_VIEW: &str = "
BEGIN TRANSACTION;
LET $view = type::thing('views', [$user, $video]);
LET $seen = (SELECT VALUE updated_at FROM $view)[0];
LET $outcome = IF $seen = NONE THEN 'created' ELSE IF $seen < <datetime> $cutoff THEN 'refreshed' ELSE 'within_window' END;
IF $outcome = 'created' THEN
    (CREATE $view SET user = type::thing('users', $user), video = type::thing('videos', $video), created_at = <datetime> $now, updated_at = <datetime> $now RETURN NONE)
ELSE IF $outcome = 'refreshed' THEN
    (UPDATE $view SET updated_at = <datetime> $now RETURN NONE)
END;
RETURN $outcome;
COMMIT TRANSACTION;
";

const DELETE_VIDEO: &str = concat!(
    "
BEGIN TRANSACTION;
LET $video = type::thing('videos', $id);
LET $before = (SELECT ",
    video_fields!(),
    " FROM $video);
DELETE views WHERE video = $video;
DELETE comments WHERE video = $video;
DELETE likes WHERE video = $video;
DELETE $video;
RETURN $before;
COMMIT TRANSACTION;
"
);

const VIDEO_DETAIL: &str = "
SELECT
    meta::id(id) AS id,
    title,
    description,
    media_url,
    thumbnail_url,
    created_at,
    meta::id(owner) AS owner,
    owner.username AS username,
    owner.full_name AS full_name,
    owner.avatar_url AS avatar_url,
    count((SELECT id FROM comments WHERE video = $parent.id)) AS comments,
    count((SELECT id FROM likes WHERE video = $parent.id)) AS likes
FROM type::thing('videos', $id)
";

const VIDEOS: &str = "
SELECT
    meta::id(id) AS id,
    title,
    thumbnail_url,
    created_at,
    owner.full_name AS uploader,
    owner.avatar_url AS uploader_avatar_url
FROM videos
ORDER BY created_at DESC
";

const AGGREGATE: &str = "
LET $video = type::thing('videos', $id);
RETURN {
    views: count((SELECT id FROM views WHERE video = $video)),
    comments: count((SELECT id FROM comments WHERE video = $video)),
    likes: count((SELECT id FROM likes WHERE video = $video))
};
";

const HISTORY: &str = "
SELECT
    meta::id(video) AS video_id,
    video.title AS title,
    video.thumbnail_url AS thumbnail_url,
    video.owner.full_name AS uploader,
    updated_at AS viewed_at
FROM views
WHERE user = type::thing('users', $user)
ORDER BY viewed_at DESC
";

const COMMENTS: &str = "
SELECT
    meta::id(id) AS comment_id,
    description,
    created_at,
    meta::id(commenter) AS commenter_id,
    commenter.username AS commenter_username,
    commenter.avatar_url AS commenter_avatar_url
FROM comments
WHERE video = type::thing('videos', $video)
ORDER BY created_at DESC
";

const ADD_LIKE: &str = "
BEGIN TRANSACTION;
LET $like = type::thing('likes', [$user, $video]);
LET $exists = (SELECT VALUE id FROM $like)[0] != NONE;
IF $exists = false THEN
    (CREATE $like SET user = type::thing('users', $user), video = type::thing('videos', $video), created_at = <datetime> $at RETURN NONE)
END;
RETURN $exists = false;
COMMIT TRANSACTION;
";

const REMOVE_LIKE: &str = "
BEGIN TRANSACTION;
LET $like = type::thing('likes', [$user, $video]);
LET $exists = (SELECT VALUE id FROM $like)[0] != NONE;
DELETE $like;
RETURN $exists;
COMMIT TRANSACTION;
";

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "surreal_url")]
    pub url: Url,
    #[serde(rename = "surreal_ns", default = "default_namespace")]
    pub namespace: String,
    #[serde(rename = "surreal_db", default = "default_database")]
    pub database: String,
    #[serde(flatten)]
    pub credentials: Option<DatabaseCredentials>,
}

fn default_namespace() -> String {
    "viewcore".to_string()
}

fn default_database() -> String {
    "viewcore".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseCredentials {
    #[serde(rename = "surreal_name")]
    pub username: String,
    #[serde(rename = "surreal_pass")]
    pub password: String,
}

/// [super::RelationalStore] on SurrealDB. Works against a remote server as well as the embedded
/// `mem://` engine.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    database: Surreal<Any>,
}

impl SurrealStore {
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.clone();

        let database = surrealdb::engine::any::connect(url.as_str())
            .await
            .context(DatabaseConnectionSnafu { url: url.clone() })?;

        if let Some(credentials) = &config.credentials {
            database
                .signin(auth::Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &credentials.username,
                    password: &credentials.password,
                })
                .await
                .context(DatabaseConnectionSnafu { url: url.clone() })?;
        }

        database
            .use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .context(DatabaseConnectionSnafu { url: url.clone() })?;

        database
            .query(SETUP)
            .await
            .and_then(|response| response.check())
            .context(DatabaseConnectionSnafu { url })?;

        tracing::info!(namespace = %config.namespace, database = %config.database, "connected to the database");

        Ok(Self { database })
    }

    async fn try_upsert_view(
        &self, user: &UserId, video: &VideoId, now: Timestamp, cutoff: Timestamp,
    ) -> Result<ViewOutcome> {
        let outcome: Option<String> = self
            .database
            .sql(UPSERT_VIEW)
            .bind(("user", user.as_str()))
            .bind(("video", video.as_str()))
            .bind(("now", datetime(now)))
            .bind(("cutoff", datetime(cutoff)))
            .fetch_last()
            .await?;

        match outcome.as_deref() {
            Some("created") => Ok(ViewOutcome::Created),
            Some("refreshed") => Ok(ViewOutcome::Refreshed),
            Some("within_window") => Ok(ViewOutcome::WithinWindow),
            other => UnknownOutcomeSnafu {
                outcome: other.unwrap_or("none"),
            }
            .fail(),
        }
    }
}

/// Whether the upsert lost a race against a concurrent write of the same record.
fn is_conflict(error: &DatabaseError) -> bool {
    match error {
        DatabaseError::DatabaseQuery { source, .. } => is_conflict_message(&source.to_string()),
        _ => false,
    }
}

fn is_conflict_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["conflict", "can be retried", "already exists", "already contains"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn datetime(timestamp: Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: String,
    username: String,
    full_name: String,
    avatar_url: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: UserId::parse(&row.id).context(InvalidRowSnafu)?,
            username: row.username,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VideoRow {
    id: String,
    owner: String,
    title: String,
    description: String,
    media_url: String,
    thumbnail_url: Option<String>,
    created_at: surrealdb::sql::Datetime,
}

impl TryFrom<VideoRow> for Video {
    type Error = DatabaseError;

    fn try_from(row: VideoRow) -> Result<Self> {
        Ok(Video {
            id: VideoId::parse(&row.id).context(InvalidRowSnafu)?,
            owner: UserId::parse(&row.owner).context(InvalidRowSnafu)?,
            title: row.title,
            description: row.description,
            media_url: row.media_url,
            thumbnail_url: row.thumbnail_url,
            created_at: row.created_at.0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SummaryRow {
    id: String,
    title: String,
    thumbnail_url: Option<String>,
    created_at: surrealdb::sql::Datetime,
    uploader: String,
    uploader_avatar_url: Option<String>,
}

impl TryFrom<SummaryRow> for VideoSummary {
    type Error = DatabaseError;

    fn try_from(row: SummaryRow) -> Result<Self> {
        Ok(VideoSummary {
            id: VideoId::parse(&row.id).context(InvalidRowSnafu)?,
            title: row.title,
            thumbnail_url: row.thumbnail_url,
            created_at: row.created_at.0,
            uploader: row.uploader,
            uploader_avatar_url: row.uploader_avatar_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DetailRow {
    id: String,
    title: String,
    description: String,
    media_url: String,
    thumbnail_url: Option<String>,
    created_at: surrealdb::sql::Datetime,
    owner: String,
    username: String,
    full_name: String,
    avatar_url: Option<String>,
    comments: u64,
    likes: u64,
}

impl TryFrom<DetailRow> for VideoDetail {
    type Error = DatabaseError;

    fn try_from(row: DetailRow) -> Result<Self> {
        Ok(VideoDetail {
            id: VideoId::parse(&row.id).context(InvalidRowSnafu)?,
            title: row.title,
            description: row.description,
            media_url: row.media_url,
            thumbnail_url: row.thumbnail_url,
            created_at: row.created_at.0,
            owner: UserId::parse(&row.owner).context(InvalidRowSnafu)?,
            username: row.username,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
            comments: row.comments,
            likes: row.likes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    video_id: String,
    title: String,
    thumbnail_url: Option<String>,
    uploader: String,
    viewed_at: surrealdb::sql::Datetime,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DatabaseError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(HistoryEntry {
            video_id: VideoId::parse(&row.video_id).context(InvalidRowSnafu)?,
            title: row.title,
            thumbnail_url: row.thumbnail_url,
            uploader: row.uploader,
            viewed_at: row.viewed_at.0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: String,
    video: String,
    commenter: String,
    description: String,
    created_at: surrealdb::sql::Datetime,
}

impl TryFrom<CommentRow> for Comment {
    type Error = DatabaseError;

    fn try_from(row: CommentRow) -> Result<Self> {
        Ok(Comment {
            id: CommentId::parse(&row.id).context(InvalidRowSnafu)?,
            video: VideoId::parse(&row.video).context(InvalidRowSnafu)?,
            commenter: UserId::parse(&row.commenter).context(InvalidRowSnafu)?,
            description: row.description,
            created_at: row.created_at.0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommentViewRow {
    comment_id: String,
    description: String,
    created_at: surrealdb::sql::Datetime,
    commenter_id: String,
    commenter_username: String,
    commenter_avatar_url: Option<String>,
}

impl TryFrom<CommentViewRow> for CommentView {
    type Error = DatabaseError;

    fn try_from(row: CommentViewRow) -> Result<Self> {
        Ok(CommentView {
            comment_id: CommentId::parse(&row.comment_id).context(InvalidRowSnafu)?,
            description: row.description,
            created_at: row.created_at.0,
            commenter_id: UserId::parse(&row.commenter_id).context(InvalidRowSnafu)?,
            commenter_username: row.commenter_username,
            commenter_avatar_url: row.commenter_avatar_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AggregateRow {
    views: u64,
    comments: u64,
    likes: u64,
}

fn convert<R, T>(row: Option<R>) -> Result<Option<T>>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    row.map(T::try_from).transpose()
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl RelationalStore for SurrealStore {
    #[instrument(skip(self))]
    async fn user(&self, id: &UserId) -> Result<Option<User>> {
        let row: Option<UserRow> = self
            .database
            .sql("SELECT meta::id(id) AS id, username, full_name, avatar_url FROM type::thing('users', $id)")
            .bind(("id", id.as_str()))
            .fetch_first()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn video(&self, id: &VideoId) -> Result<Option<Video>> {
        let row: Option<VideoRow> = self
            .database
            .sql(concat!("SELECT ", video_fields!(), " FROM type::thing('videos', $id)"))
            .bind(("id", id.as_str()))
            .fetch_first()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn videos(&self) -> Result<Vec<VideoSummary>> {
        let rows: Vec<SummaryRow> = self.database.sql(VIDEOS).fetch_first().await?;

        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn video_detail(&self, id: &VideoId) -> Result<Option<VideoDetail>> {
        tracing::debug!(video.id = %id, "fetching video detail from database");
        let row: Option<DetailRow> = self
            .database
            .sql(VIDEO_DETAIL)
            .bind(("id", id.as_str()))
            .fetch_first()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn create_video(&self, video: &Video) -> Result<Video> {
        self.database
            .sql("CREATE type::thing('videos', $id) SET owner = type::thing('users', $owner), title = $title, description = $description, media_url = $media_url, thumbnail_url = $thumbnail_url, created_at = <datetime> $created_at RETURN NONE")
            .bind(("id", video.id.as_str()))
            .bind(("owner", video.owner.as_str()))
            .bind(("title", &video.title))
            .bind(("description", &video.description))
            .bind(("media_url", &video.media_url))
            .bind(("thumbnail_url", &video.thumbnail_url))
            .bind(("created_at", datetime(video.created_at)))
            .execute()
            .await?;

        tracing::info!(video.id = %video.id, "inserted video to database");
        Ok(video.clone())
    }

    #[instrument(skip(self))]
    async fn update_video(&self, video: &Video) -> Result<Option<Video>> {
        let row: Option<VideoRow> = self
            .database
            .sql(concat!(
                "UPDATE videos SET title = $title, description = $description, thumbnail_url = $thumbnail_url WHERE id = type::thing('videos', $id) RETURN NONE;",
                "SELECT ",
                video_fields!(),
                " FROM type::thing('videos', $id);"
            ))
            .bind(("id", video.id.as_str()))
            .bind(("title", &video.title))
            .bind(("description", &video.description))
            .bind(("thumbnail_url", &video.thumbnail_url))
            .fetch_last()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn delete_video(&self, id: &VideoId) -> Result<Option<Video>> {
        let mut rows: Vec<VideoRow> = self
            .database
            .sql(DELETE_VIDEO)
            .bind(("id", id.as_str()))
            .fetch_last()
            .await?;

        convert(rows.pop())
    }

    #[instrument(skip(self))]
    async fn upsert_view(
        &self, user: &UserId, video: &VideoId, now: Timestamp, window: Duration,
    ) -> Result<ViewOutcome> {
        let cutoff = rearm_cutoff(now, window);
        let strategy = FixedInterval::from_millis(10).take(UPSERT_RETRIES);

        RetryIf::spawn(
            strategy,
            || self.try_upsert_view(user, video, now, cutoff),
            is_conflict,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn viewers(&self, video: &VideoId) -> Result<Vec<UserId>> {
        let ids: Vec<String> = self
            .database
            .sql("SELECT VALUE meta::id(user) FROM views WHERE video = type::thing('videos', $video)")
            .bind(("video", video.as_str()))
            .fetch_first()
            .await?;

        ids.iter()
            .map(|id| UserId::parse(id).context(InvalidRowSnafu))
            .collect()
    }

    #[instrument(skip(self))]
    async fn history(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryRow> = self
            .database
            .sql(HISTORY)
            .bind(("user", user.as_str()))
            .fetch_first()
            .await?;

        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn aggregate(&self, video: &VideoId) -> Result<CounterSnapshot> {
        let row: Option<AggregateRow> = self
            .database
            .sql(AGGREGATE)
            .bind(("id", video.as_str()))
            .fetch_last()
            .await?;

        let AggregateRow {
            views,
            comments,
            likes,
        } = row.context(super::EmptyQuerySnafu)?;

        Ok(CounterSnapshot::new(views, comments, likes))
    }

    #[instrument(skip(self))]
    async fn comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        let row: Option<CommentRow> = self
            .database
            .sql(concat!("SELECT ", comment_fields!(), " FROM type::thing('comments', $id)"))
            .bind(("id", id.as_str()))
            .fetch_first()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn create_comment(&self, comment: &Comment) -> Result<Comment> {
        self.database
            .sql("CREATE type::thing('comments', $id) SET video = type::thing('videos', $video), commenter = type::thing('users', $commenter), description = $description, created_at = <datetime> $created_at RETURN NONE")
            .bind(("id", comment.id.as_str()))
            .bind(("video", comment.video.as_str()))
            .bind(("commenter", comment.commenter.as_str()))
            .bind(("description", &comment.description))
            .bind(("created_at", datetime(comment.created_at)))
            .execute()
            .await?;

        Ok(comment.clone())
    }

    #[instrument(skip(self))]
    async fn update_comment(&self, comment: &Comment) -> Result<Option<Comment>> {
        let row: Option<CommentRow> = self
            .database
            .sql(concat!(
                "UPDATE comments SET description = $description WHERE id = type::thing('comments', $id) RETURN NONE;",
                "SELECT ",
                comment_fields!(),
                " FROM type::thing('comments', $id);"
            ))
            .bind(("id", comment.id.as_str()))
            .bind(("description", &comment.description))
            .fetch_last()
            .await?;

        convert(row)
    }

    #[instrument(skip(self))]
    async fn delete_comment(&self, id: &CommentId) -> Result<Option<Comment>> {
        let mut rows: Vec<CommentRow> = self
            .database
            .sql(concat!(
                "LET $before = (SELECT ",
                comment_fields!(),
                " FROM type::thing('comments', $id));",
                "DELETE type::thing('comments', $id);",
                "RETURN $before;"
            ))
            .bind(("id", id.as_str()))
            .fetch_last()
            .await?;

        convert(rows.pop())
    }

    #[instrument(skip(self))]
    async fn comments(&self, video: &VideoId) -> Result<Vec<CommentView>> {
        let rows: Vec<CommentViewRow> = self
            .database
            .sql(COMMENTS)
            .bind(("video", video.as_str()))
            .fetch_first()
            .await?;

        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn add_like(&self, user: &UserId, video: &VideoId, at: Timestamp) -> Result<bool> {
        let inserted: Option<bool> = self
            .database
            .sql(ADD_LIKE)
            .bind(("user", user.as_str()))
            .bind(("video", video.as_str()))
            .bind(("at", datetime(at)))
            .fetch_last()
            .await?;

        Ok(inserted.unwrap_or(false))
    }

    #[instrument(skip(self))]
    async fn remove_like(&self, user: &UserId, video: &VideoId) -> Result<bool> {
        let removed: Option<bool> = self
            .database
            .sql(REMOVE_LIKE)
            .bind(("user", user.as_str()))
            .bind(("video", video.as_str()))
            .fetch_last()
            .await?;

        Ok(removed.unwrap_or(false))
    }

    #[instrument(skip(self))]
    async fn has_liked(&self, user: &UserId, video: &VideoId) -> Result<bool> {
        let liked: Option<bool> = self
            .database
            .sql("RETURN (SELECT VALUE id FROM type::thing('likes', [$user, $video]))[0] != NONE")
            .bind(("user", user.as_str()))
            .bind(("video", video.as_str()))
            .fetch_first()
            .await?;

        Ok(liked.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn datetimes_are_utc_with_fixed_precision() {
        let timestamp = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(datetime(timestamp), "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn only_write_conflicts_are_retried() {
        assert!(is_conflict_message(
            "Failed to commit transaction due to a read or write conflict. This transaction can be retried"
        ));
        assert!(is_conflict_message(
            "Database record `views:['u1', 'v1']` already exists"
        ));
        assert!(is_conflict_message(
            "Database index `views_pair` already contains ['u1', 'v1']"
        ));

        assert!(!is_conflict_message("There was an error processing a remote HTTP request"));
        assert!(!is_conflict_message("Parse error: unexpected token"));
    }

    #[test]
    fn unavailable_store_is_not_retried() {
        let error = crate::database::UnavailableSnafu { reason: "gone" }.build();
        assert!(!is_conflict(&error));
    }

    #[test]
    fn delete_script_selects_before_deleting() {
        let select = DELETE_VIDEO.find("SELECT").unwrap();
        let delete = DELETE_VIDEO.find("DELETE $video").unwrap();
        assert!(select < delete);
    }
}
