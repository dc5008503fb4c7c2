//! Durable blob storage boundary
//!
//! The pipeline only ever talks to storage through this trait: staged upload
//! chunks, assembled documents, and translation outputs all go through
//! `put`/`get` keyed by an opaque path.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Trait for durable blob storage
///
/// Implementations:
/// - `FsBlobStore`: local filesystem under a configured root
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at the given path, overwriting any existing blob
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Retrieve the blob at the given path
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete the blob at the given path; deleting a missing blob is a no-op
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check whether a blob exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Filesystem-backed blob store
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at the given directory (created if missing)
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a logical blob path to a filesystem path, rejecting traversal
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(Error::storage(format!("Invalid blob path: {}", path)));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        tracing::debug!("Stored blob {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::storage(format!("Blob not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    fn name(&self) -> &str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("files/a/report.txt", b"hello").await.unwrap();
        assert_eq!(store.get("files/a/report.txt").await.unwrap(), b"hello");
        assert!(store.exists("files/a/report.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_blob_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.error_type(), "storage_error");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("x", b"1").await.unwrap();
        store.delete("x").await.unwrap();
        store.delete("x").await.unwrap();
        assert!(!store.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert!(store.put("../escape", b"no").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
