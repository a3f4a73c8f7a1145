use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod error;
mod state;

pub use error::*;
pub use state::*;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Uploads arrive as raw request bodies.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

pub fn create_router(app: App) -> Router {
    Router::new()
        .route("/video", get(video::list).post(video::create))
        .route("/video/:id", get(video::detail).delete(video::delete))
        .route("/video/:id/view", post(video::view))
        .route("/video/:id/videoinfo", patch(video::update_info))
        .route("/video/:id/thumbnail", put(video::update_thumbnail))
        .route("/video/:id/video-engagement", get(video::engagement))
        .route("/comment/:id", post(comment::create))
        .route(
            "/comment/:id/:comment_id",
            patch(comment::update).delete(comment::delete),
        )
        .route("/like/:id", post(like::add).delete(like::remove).get(like::check))
        .route("/user/history", get(user::history))
        .route("/redis", delete(admin::flush))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

pub mod video {
    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use serde::Deserialize;
    use tracing::instrument;

    use super::{App, CurrentUser, Message, Result};
    use crate::model::{CommentView, Video, VideoCard, VideoDetail};
    use crate::service::{NewVideo, ViewReport};

    #[derive(Debug, Deserialize)]
    pub struct VideoInfo {
        #[serde(default)]
        pub title: String,
        #[serde(default)]
        pub description: String,
    }

    #[instrument(skip(app))]
    pub async fn list(State(app): State<App>) -> Result<Json<Vec<VideoCard>>> {
        Ok(Json(app.videos.list_videos().await?))
    }

    #[instrument(skip(app))]
    pub async fn detail(State(app): State<App>, Path(id): Path<String>) -> Result<Json<VideoDetail>> {
        Ok(Json(app.details.get_video_detail(&id).await?))
    }

    #[instrument(skip(app, media), fields(size = media.len()))]
    pub async fn create(
        State(app): State<App>, CurrentUser(user): CurrentUser, Query(info): Query<VideoInfo>,
        media: Bytes,
    ) -> Result<(StatusCode, Json<Video>)> {
        let upload = NewVideo::new(info.title, info.description, media.to_vec());
        let video = app.videos.create_video(&user, upload).await?;

        Ok((StatusCode::CREATED, Json(video)))
    }

    #[instrument(skip(app))]
    pub async fn view(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(id): Path<String>,
    ) -> Result<Json<ViewReport>> {
        Ok(Json(app.views.record_view(&user, &id).await?))
    }

    #[instrument(skip(app))]
    pub async fn update_info(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(id): Path<String>,
        Json(info): Json<VideoInfo>,
    ) -> Result<Json<Video>> {
        let video = app
            .videos
            .update_video_info(&id, &user, &info.title, &info.description)
            .await?;

        Ok(Json(video))
    }

    #[instrument(skip(app, image), fields(size = image.len()))]
    pub async fn update_thumbnail(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(id): Path<String>,
        image: Bytes,
    ) -> Result<Json<Video>> {
        let video = app.videos.update_thumbnail(&id, &user, image.to_vec()).await?;
        Ok(Json(video))
    }

    #[instrument(skip(app))]
    pub async fn delete(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(id): Path<String>,
    ) -> Result<Json<Message>> {
        app.videos.delete_video(&id, &user).await?;

        Ok(Json(Message {
            message: "video deleted",
        }))
    }

    #[instrument(skip(app))]
    pub async fn engagement(
        State(app): State<App>, Path(id): Path<String>,
    ) -> Result<Json<Vec<CommentView>>> {
        Ok(Json(app.videos.video_engagement(&id).await?))
    }
}

pub mod comment {
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::Json;
    use serde::Deserialize;
    use tracing::instrument;

    use super::{App, CurrentUser, Message, Result};
    use crate::model::Comment;

    #[derive(Debug, Deserialize)]
    pub struct CommentBody {
        #[serde(default)]
        pub description: String,
    }

    #[instrument(skip(app))]
    pub async fn create(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(video): Path<String>,
        Json(body): Json<CommentBody>,
    ) -> Result<(StatusCode, Json<Comment>)> {
        let comment = app
            .videos
            .create_comment(&video, &user, &body.description)
            .await?;

        Ok((StatusCode::CREATED, Json(comment)))
    }

    #[instrument(skip(app))]
    pub async fn update(
        State(app): State<App>, CurrentUser(user): CurrentUser,
        Path((video, comment)): Path<(String, String)>, Json(body): Json<CommentBody>,
    ) -> Result<Json<Comment>> {
        let comment = app
            .videos
            .update_comment(&video, &comment, &user, &body.description)
            .await?;

        Ok(Json(comment))
    }

    #[instrument(skip(app))]
    pub async fn delete(
        State(app): State<App>, CurrentUser(user): CurrentUser,
        Path((video, comment)): Path<(String, String)>,
    ) -> Result<Json<Message>> {
        app.videos.delete_comment(&video, &comment, &user).await?;

        Ok(Json(Message {
            message: "comment deleted",
        }))
    }
}

pub mod like {
    use axum::extract::{Path, State};
    use axum::Json;
    use serde::Serialize;
    use tracing::instrument;

    use super::{App, CurrentUser, Message, Result};

    #[derive(Debug, Serialize)]
    pub struct LikeStatus {
        pub liked: bool,
    }

    #[instrument(skip(app))]
    pub async fn add(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(video): Path<String>,
    ) -> Result<Json<Message>> {
        app.videos.like(&video, &user).await?;
        Ok(Json(Message { message: "liked" }))
    }

    #[instrument(skip(app))]
    pub async fn remove(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(video): Path<String>,
    ) -> Result<Json<Message>> {
        app.videos.unlike(&video, &user).await?;
        Ok(Json(Message { message: "unliked" }))
    }

    #[instrument(skip(app))]
    pub async fn check(
        State(app): State<App>, CurrentUser(user): CurrentUser, Path(video): Path<String>,
    ) -> Result<Json<LikeStatus>> {
        let liked = app.videos.has_liked(&video, &user).await?;
        Ok(Json(LikeStatus { liked }))
    }
}

pub mod user {
    use axum::extract::State;
    use axum::Json;
    use tracing::instrument;

    use super::{App, CurrentUser, Result};
    use crate::model::HistoryEntry;

    #[instrument(skip(app))]
    pub async fn history(
        State(app): State<App>, CurrentUser(user): CurrentUser,
    ) -> Result<Json<Vec<HistoryEntry>>> {
        Ok(Json(app.details.get_video_history(&user).await?))
    }
}

pub mod admin {
    use axum::extract::State;
    use axum::Json;
    use tracing::instrument;

    use super::{App, Message, Result};

    #[instrument(skip(app))]
    pub async fn flush(State(app): State<App>) -> Result<Json<Message>> {
        app.videos.flush_cache().await?;

        Ok(Json(Message {
            message: "cache flushed",
        }))
    }
}
