//! Server-side upload session manager
//!
//! Assembles chunks into one durable blob. Receiving a chunk index twice is a
//! no-op ack, never a double-count; `complete` only succeeds once every index
//! is present and the byte total matches the declared size. Sessions live in
//! an explicit store owned by the application state, never a module-level
//! registry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::providers::blob_store::BlobStore;

use super::chunker::{expected_chunks, plan_chunks, validate_file, FileMeta};

/// Upload session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initializing,
    Receiving,
    Complete,
}

/// Server-side view of one in-flight upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: Uuid,
    pub meta: FileMeta,
    pub total_chunks: u32,
    /// index -> received byte length (append-only; never un-received)
    pub received: BTreeMap<u32, u64>,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    fn received_bytes(&self) -> u64 {
        self.received.values().sum()
    }
}

/// Durable record of an assembled upload
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    pub content_hash: String,
    pub blob_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Registry of upload sessions and assembled files
pub struct UploadSessionStore {
    sessions: DashMap<Uuid, UploadSession>,
    files: DashMap<Uuid, StoredFile>,
    blobs: Arc<dyn BlobStore>,
    config: UploadConfig,
}

impl UploadSessionStore {
    pub fn new(blobs: Arc<dyn BlobStore>, config: UploadConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            files: DashMap::new(),
            blobs,
            config,
        }
    }

    fn chunk_path(upload_id: Uuid, index: u32) -> String {
        format!("staging/{}/{}", upload_id, index)
    }

    /// Open a session. The client's declared chunk count must agree with the
    /// count derived from the file size and the configured chunk size.
    pub fn initialize(&self, meta: FileMeta, client_total_chunks: u32) -> Result<Uuid> {
        validate_file(&meta, &self.config)?;

        let expected = expected_chunks(meta.file_size, self.config.chunk_size);
        if client_total_chunks != expected {
            return Err(Error::validation(format!(
                "Expected {} chunks for {} bytes, client declared {}",
                expected, meta.file_size, client_total_chunks
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.sessions.insert(
            id,
            UploadSession {
                id,
                meta,
                total_chunks: expected,
                received: BTreeMap::new(),
                status: UploadStatus::Initializing,
                created_at: now,
                updated_at: now,
            },
        );
        tracing::debug!("Upload session {} opened ({} chunks)", id, expected);
        Ok(id)
    }

    /// Accept one chunk. Re-receiving an index is acknowledged without
    /// touching the previous bytes.
    pub async fn receive_chunk(&self, upload_id: Uuid, index: u32, bytes: &[u8]) -> Result<()> {
        let expected_len = {
            let session = self
                .sessions
                .get(&upload_id)
                .ok_or(Error::SessionNotFound(upload_id))?;

            if session.status == UploadStatus::Complete {
                return Err(Error::validation(format!(
                    "Upload {} is already complete",
                    upload_id
                )));
            }
            if index >= session.total_chunks {
                return Err(Error::validation(format!(
                    "Chunk index {} out of range (total {})",
                    index, session.total_chunks
                )));
            }
            if session.received.contains_key(&index) {
                // Idempotent: same index arriving twice is an ack, not an error
                tracing::debug!("Upload {}: chunk {} re-received, ignoring", upload_id, index);
                return Ok(());
            }

            let plan = plan_chunks(session.meta.file_size, self.config.chunk_size);
            plan[index as usize].len
        };

        if bytes.len() as u64 != expected_len {
            return Err(Error::validation(format!(
                "Chunk {} is {} bytes, expected {}",
                index,
                bytes.len(),
                expected_len
            )));
        }

        // Stage the bytes first; bookkeeping only records chunks that landed.
        self.blobs
            .put(&Self::chunk_path(upload_id, index), bytes)
            .await?;

        let mut session = self
            .sessions
            .get_mut(&upload_id)
            .ok_or(Error::SessionNotFound(upload_id))?;
        session.received.insert(index, bytes.len() as u64);
        session.status = UploadStatus::Receiving;
        session.updated_at = Utc::now();
        Ok(())
    }

    /// Verify completeness and assemble the chunks, in index order, into one
    /// durable blob. The session's chunk bookkeeping is discarded on success.
    pub async fn complete(&self, upload_id: Uuid, meta: &FileMeta) -> Result<StoredFile> {
        let (total_chunks, received, file_meta) = {
            let session = self
                .sessions
                .get(&upload_id)
                .ok_or(Error::SessionNotFound(upload_id))?;
            (
                session.total_chunks,
                session.received.clone(),
                session.meta.clone(),
            )
        };

        if meta.file_size != file_meta.file_size {
            return Err(Error::validation(format!(
                "Completion declares {} bytes, session was opened with {}",
                meta.file_size, file_meta.file_size
            )));
        }

        let missing: Vec<u32> = (0..total_chunks)
            .filter(|i| !received.contains_key(i))
            .collect();
        if !missing.is_empty() {
            return Err(Error::IncompleteUpload {
                upload_id,
                message: format!(
                    "{} of {} chunks missing (first missing: {})",
                    missing.len(),
                    total_chunks,
                    missing[0]
                ),
            });
        }

        let received_bytes: u64 = received.values().sum();
        if received_bytes != file_meta.file_size {
            return Err(Error::IncompleteUpload {
                upload_id,
                message: format!(
                    "Received {} bytes, expected {}",
                    received_bytes, file_meta.file_size
                ),
            });
        }

        // Assemble in index order; arrival order never matters.
        let mut assembled = Vec::with_capacity(file_meta.file_size as usize);
        for index in 0..total_chunks {
            let chunk = self.blobs.get(&Self::chunk_path(upload_id, index)).await?;
            assembled.extend_from_slice(&chunk);
        }

        let content_hash = hex::encode(Sha256::digest(&assembled));
        let file_id = Uuid::new_v4();
        let blob_path = format!("files/{}", file_id);
        self.blobs.put(&blob_path, &assembled).await?;

        let stored = StoredFile {
            id: file_id,
            file_name: file_meta.file_name.clone(),
            size: file_meta.file_size,
            mime_type: file_meta.mime_type.clone(),
            content_hash,
            blob_path,
            uploaded_at: Utc::now(),
        };
        self.files.insert(file_id, stored.clone());

        // Session bookkeeping and staged chunks are discarded on success.
        for index in 0..total_chunks {
            let _ = self.blobs.delete(&Self::chunk_path(upload_id, index)).await;
        }
        self.sessions.remove(&upload_id);

        tracing::info!(
            "Upload {} assembled into file {} ({} bytes)",
            upload_id,
            file_id,
            stored.size
        );
        Ok(stored)
    }

    /// Session snapshot for status queries
    pub fn session(&self, upload_id: Uuid) -> Option<UploadSession> {
        self.sessions.get(&upload_id).map(|s| s.clone())
    }

    /// Stored file record by id
    pub fn file(&self, file_id: Uuid) -> Option<StoredFile> {
        self.files.get(&file_id).map(|f| f.clone())
    }

    /// Load the assembled bytes of a stored file
    pub async fn file_bytes(&self, file_id: Uuid) -> Result<Vec<u8>> {
        let stored = self
            .file(file_id)
            .ok_or_else(|| Error::storage(format!("Unknown file: {}", file_id)))?;
        self.blobs.get(&stored.blob_path).await
    }

    /// Drop sessions idle past the TTL and delete their staged chunks
    pub async fn expire_stale(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.session_ttl_secs as i64);
        let stale: Vec<UploadSession> = self
            .sessions
            .iter()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.clone())
            .collect();

        let count = stale.len();
        for session in stale {
            for index in session.received.keys() {
                let _ = self.blobs.delete(&Self::chunk_path(session.id, *index)).await;
            }
            self.sessions.remove(&session.id);
            tracing::info!("Expired stale upload session {}", session.id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::blob_store::FsBlobStore;

    fn store() -> (tempfile::TempDir, UploadSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()).unwrap());
        let config = UploadConfig {
            chunk_size: 4,
            ..UploadConfig::default()
        };
        (dir, UploadSessionStore::new(blobs, config))
    }

    fn meta(size: u64) -> FileMeta {
        FileMeta {
            file_name: "doc.txt".to_string(),
            file_size: size,
            mime_type: "text/plain".to_string(),
        }
    }

    #[tokio::test]
    async fn test_assembly_is_independent_of_arrival_order() {
        let (_dir, store) = store();
        let id = store.initialize(meta(10), 3).unwrap();

        store.receive_chunk(id, 2, b"ij").await.unwrap();
        store.receive_chunk(id, 0, b"abcd").await.unwrap();
        store.receive_chunk(id, 1, b"efgh").await.unwrap();

        let stored = store.complete(id, &meta(10)).await.unwrap();
        assert_eq!(store.file_bytes(stored.id).await.unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_noop() {
        let (_dir, store) = store();
        let id = store.initialize(meta(6), 2).unwrap();

        store.receive_chunk(id, 0, b"abcd").await.unwrap();
        // Same index again: acknowledged, does not double-count size
        store.receive_chunk(id, 0, b"abcd").await.unwrap();
        store.receive_chunk(id, 1, b"ef").await.unwrap();

        let stored = store.complete(id, &meta(6)).await.unwrap();
        assert_eq!(store.file_bytes(stored.id).await.unwrap(), b"abcdef");
        assert_eq!(stored.size, 6);
    }

    #[tokio::test]
    async fn test_complete_with_missing_chunk_fails() {
        let (_dir, store) = store();
        let id = store.initialize(meta(10), 3).unwrap();

        store.receive_chunk(id, 0, b"abcd").await.unwrap();
        store.receive_chunk(id, 2, b"ij").await.unwrap();

        let err = store.complete(id, &meta(10)).await.unwrap_err();
        assert_eq!(err.error_type(), "incomplete_upload");
        assert!(err.to_string().contains("1"));

        // The session survives a failed completion; the upload can resume
        store.receive_chunk(id, 1, b"efgh").await.unwrap();
        store.complete(id, &meta(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_chunk_length_rejected() {
        let (_dir, store) = store();
        let id = store.initialize(meta(10), 3).unwrap();

        let err = store.receive_chunk(id, 0, b"ab").await.unwrap_err();
        assert_eq!(err.error_type(), "validation_error");
    }

    #[tokio::test]
    async fn test_chunk_count_mismatch_rejected_at_initialize() {
        let (_dir, store) = store();
        let err = store.initialize(meta(10), 5).unwrap_err();
        assert_eq!(err.error_type(), "validation_error");
    }

    #[tokio::test]
    async fn test_out_of_range_index_rejected() {
        let (_dir, store) = store();
        let id = store.initialize(meta(10), 3).unwrap();
        let err = store.receive_chunk(id, 3, b"abcd").await.unwrap_err();
        assert_eq!(err.error_type(), "validation_error");
    }

    #[tokio::test]
    async fn test_expire_stale_sessions() {
        let (_dir, store) = store();
        let id = store.initialize(meta(10), 3).unwrap();
        store.receive_chunk(id, 0, b"abcd").await.unwrap();

        // Backdate the session past the TTL
        store.sessions.get_mut(&id).unwrap().updated_at =
            Utc::now() - chrono::Duration::days(30);

        assert_eq!(store.expire_stale().await, 1);
        assert!(store.session(id).is_none());
    }
}
