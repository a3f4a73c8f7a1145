use derive_new::new;
use serde::{Deserialize, Serialize};

use super::{CommentId, Timestamp, UserId, VideoId};

/// Identity of an account, as resolved by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    #[new(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Comment {
    pub id: CommentId,
    pub video: VideoId,
    pub commenter: UserId,
    pub description: String,
    pub created_at: Timestamp,
}

/// A comment joined with its author, as listed on the engagement endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentView {
    pub comment_id: CommentId,
    pub description: String,
    pub created_at: Timestamp,
    pub commenter_id: UserId,
    pub commenter_username: String,
    pub commenter_avatar_url: Option<String>,
}
