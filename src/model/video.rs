use derive_new::new;
use serde::{Deserialize, Serialize};

use super::{Timestamp, UserId, VideoId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Video {
    pub id: VideoId,
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub media_url: String,
    #[new(default)]
    pub thumbnail_url: Option<String>,
    pub created_at: Timestamp,
}

impl Video {
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

/// Denormalized payload served for a video page, cached under `video:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetail {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub created_at: Timestamp,

    pub owner: UserId,
    pub username: String,
    pub full_name: String,
    pub avatar_url: Option<String>,

    pub comments: u64,
    pub likes: u64,
}

/// One entry of the video listing, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: VideoId,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub created_at: Timestamp,
    pub uploader: String,
    pub uploader_avatar_url: Option<String>,
}

/// A [VideoSummary] with its age in whole days at the time of listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoCard {
    #[serde(flatten)]
    pub summary: VideoSummary,
    pub age_days: i64,
}

/// One row of a user's watch history, cached under `user:<id>:video-history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub video_id: VideoId,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub uploader: String,
    pub viewed_at: Timestamp,
}
