use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use derive_new::new;
use snafu::OptionExt as _;

use super::{ApiError, MissingIdentitySnafu};
use crate::service::{VideoDetailService, VideoService, ViewAggregationService};

/// Header carrying the caller's user id, set by the authentication proxy in front of us.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, new)]
pub struct App {
    pub details: VideoDetailService,
    pub views: ViewAggregationService,
    pub videos: VideoService,
}

/// The authenticated caller. Validation of the id itself is left to the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .context(MissingIdentitySnafu)?;

        Ok(Self(id.to_string()))
    }
}
