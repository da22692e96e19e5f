use std::path::{Component, Path, PathBuf};

use crate::error::AppError;
use crate::traits::BlobStore;

/// [`BlobStore`] backed by a directory on the local filesystem.
///
/// Keys are relative paths below the root; `..` and absolute keys are rejected.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read the root directory from `PUNCHCARD_BLOB_ROOT` (defaults to `./blobs`).
    pub fn from_env() -> Self {
        let root = std::env::var("PUNCHCARD_BLOB_ROOT").unwrap_or_else(|_| "blobs".to_string());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(AppError::StorageError(format!("Invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::SourceNotFound(key.to_string()),
            _ => AppError::StorageError(format!("Failed to read {}: {e}", path.display())),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, AppError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StorageError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to write {}: {e}", path.display())))?;
        tracing::debug!(%key, "Stored blob");
        Ok(key.to_string())
    }
}
