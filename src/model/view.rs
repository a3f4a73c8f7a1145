use serde::{Deserialize, Serialize};

use super::{Timestamp, UserId, VideoId};

/// The most recent view of a video by a user. There is at most one per (user, video).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub user: UserId,
    pub video: VideoId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// What the conditional upsert did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewOutcome {
    /// No record existed, one was created.
    Created,
    /// The record was older than the rearm window and its timestamp was bumped.
    Refreshed,
    /// The record is still inside the rearm window, nothing was written.
    WithinWindow,
}

impl ViewOutcome {
    /// Whether this view counts towards the video's view counter.
    pub fn is_counted(self) -> bool {
        !matches!(self, ViewOutcome::WithinWindow)
    }
}

impl std::fmt::Display for ViewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ViewOutcome::Created => "created",
            ViewOutcome::Refreshed => "refreshed",
            ViewOutcome::WithinWindow => "within_window",
        };
        f.write_str(text)
    }
}
