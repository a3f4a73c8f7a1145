use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snafu::{Location, Snafu};

use crate::service::{ErrorKind, ServiceError};
use crate::Located;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(context(false), display("{source}"))]
    Service {
        source: ServiceError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("the x-user-id header is missing"))]
    MissingIdentity {
        #[snafu(implicit)]
        location: Location,
    },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Service { source, .. } => source.kind(),
            ApiError::MissingIdentity { .. } => ErrorKind::InvalidRequest,
        }
    }
}

impl Located for ApiError {
    fn location(&self) -> Location {
        match self {
            ApiError::Service { source, .. } => source.location(),
            ApiError::MissingIdentity { location } => *location,
        }
    }
}

fn status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let message = match kind {
            ErrorKind::Internal => {
                tracing::error!(error = %self, location = %self.location(), "request failed");
                "internal server error".to_string()
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
                self.to_string()
            }
        };

        (status(kind), Json(ErrorBody { error: kind, message })).into_response()
    }
}
