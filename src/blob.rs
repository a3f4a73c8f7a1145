use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use snafu::{Location, ResultExt as _, Snafu};
use tracing::instrument;

use crate::Located;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BlobError {
    #[snafu(display("blob key `{key}` is not a relative path at {location}"))]
    InvalidKey {
        key: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to write blob `{key}` at {location}: {source}"))]
    WriteBlob {
        key: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to delete blob `{key}` at {location}: {source}"))]
    DeleteBlob {
        key: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for BlobError {
    fn location(&self) -> Location {
        match self {
            BlobError::InvalidKey { location, .. }
            | BlobError::WriteBlob { location, .. }
            | BlobError::DeleteBlob { location, .. } => *location,
        }
    }
}

/// Binary object storage for media files and thumbnails. The key returned by
/// [BlobStore::put] is what gets stored on the video row.
#[async_trait]
pub trait BlobStore: std::fmt::Debug + Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !is_plain {
            return InvalidKeySnafu { key }.fail();
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError> {
        let path = self.path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(WriteBlobSnafu { key })?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .context(WriteBlobSnafu { key })?;

        tracing::debug!(path = %path.display(), "stored blob");
        Ok(key.to_string())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).context(DeleteBlobSnafu { key }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let key = store.put("videos/alice/1", b"media".to_vec()).await.unwrap();

        assert_eq!(key, "videos/alice/1");
        let written = std::fs::read(dir.path().join("videos/alice/1")).unwrap();
        assert_eq!(written, b"media");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store.put("thumbnail/alice/1", vec![1, 2]).await.unwrap();
        store.delete("thumbnail/alice/1").await.unwrap();
        store.delete("thumbnail/alice/1").await.unwrap();

        assert!(!dir.path().join("thumbnail/alice/1").exists());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for key in ["../outside", "/etc/passwd", "", "videos/../../x"] {
            let result = store.put(key, vec![]).await;
            assert!(matches!(result, Err(BlobError::InvalidKey { .. })), "{key}");
        }
    }
}
