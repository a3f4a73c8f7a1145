use std::time::Duration;

use derive_new::new;
use serde::Serialize;
use snafu::{Location, Snafu};

use crate::blob::BlobError;
use crate::cache::CacheError;
use crate::database::DatabaseError;
use crate::model::ParseId;
use crate::time::Elapsed;
use crate::Located;

pub use detail::{VideoDetailService, DEFAULT_TTL};
pub use reconcile::{Reconciler, ReconcilerTask};
pub use videos::{NewVideo, VideoService};
pub use views::{ViewAggregationService, ViewReport, DEFAULT_REARM_WINDOW};

mod detail;
mod reconcile;
mod videos;
mod views;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Upper bounds for calls into the database and the counter store. The cache carries its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct Timeouts {
    pub database: Duration,
    pub counters: Duration,
}

/// What went wrong, independent of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Conflict,
    UpstreamUnavailable,
    Internal,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("{source}"))]
    InvalidId {
        source: ParseId,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{message}"))]
    InvalidInput {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{what} not found"))]
    NotFound {
        what: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{message}"))]
    Conflict {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not store the upload: {source}"))]
    Blob {
        source: BlobError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not flush the cache: {source}"))]
    CacheFlush {
        source: CacheError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database request failed: {source}"))]
    Database {
        source: DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database request {source}"))]
    DatabaseTimeout {
        source: Elapsed,
        #[snafu(implicit)]
        location: Location,
    },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidId { .. } | ServiceError::InvalidInput { .. } => {
                ErrorKind::InvalidRequest
            }
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::Conflict { .. } => ErrorKind::Conflict,
            ServiceError::Blob { .. } | ServiceError::CacheFlush { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            ServiceError::Database { .. } | ServiceError::DatabaseTimeout { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

impl Located for ServiceError {
    fn location(&self) -> Location {
        match self {
            ServiceError::InvalidId { location, .. }
            | ServiceError::InvalidInput { location, .. }
            | ServiceError::NotFound { location, .. }
            | ServiceError::Conflict { location, .. }
            | ServiceError::Blob { location, .. }
            | ServiceError::CacheFlush { location, .. }
            | ServiceError::Database { location, .. }
            | ServiceError::DatabaseTimeout { location, .. } => *location,
        }
    }
}

/// Runs a database call under `timeout`, flattening both failure modes into [ServiceError].
pub(crate) async fn guarded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, DatabaseError>>,
{
    use snafu::ResultExt as _;

    crate::time::deadline(timeout, call)
        .await
        .context(DatabaseTimeoutSnafu)?
        .context(DatabaseSnafu)
}

/// Trims `text` and rejects it when nothing is left.
pub(crate) fn required(field: &str, text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return InvalidInputSnafu {
            message: format!("{field} is required"),
        }
        .fail();
    }

    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims() {
        assert_eq!(required("title", "  cats ").unwrap(), "cats");
    }

    #[test]
    fn blank_field_is_an_invalid_request() {
        let error = required("description", "   ").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert_eq!(error.to_string(), "description is required");
    }

    #[tokio::test]
    async fn slow_database_is_internal() {
        let call = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DatabaseError>(())
        };

        let error = guarded(Duration::from_millis(10), call)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Internal);
    }
}
