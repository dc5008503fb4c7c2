//! Client-side chunked uploader
//!
//! Splits a file into 5 MiB chunks and transfers them in strictly ordered
//! batches of `batch_size` (default 3) concurrent requests. Chunks that fail
//! in their first pass are retried exactly once, sequentially, after all
//! batches resolve; a chunk failing its retry aborts the whole upload with an
//! error naming the chunk index.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{Error, Result};

use super::chunker::{plan_chunks, validate_file, ChunkSpec, FileMeta};

/// Transport the uploader drives; mirrors the three server endpoints
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Open an upload session; returns the session id
    async fn initialize(&self, meta: &FileMeta, total_chunks: u32) -> Result<Uuid>;

    /// Transfer one chunk (idempotent per index on the server side)
    async fn put_chunk(&self, upload_id: Uuid, index: u32, bytes: Bytes) -> Result<()>;

    /// Finish the session; returns the durable file id
    async fn complete(&self, upload_id: Uuid, meta: &FileMeta) -> Result<Uuid>;
}

/// Progress snapshot emitted at least once per completed chunk
#[derive(Debug, Clone, Copy)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// round(uploaded / total * 100)
    pub percentage: u8,
}

/// Successful upload result
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub upload_id: Uuid,
    pub file_id: Uuid,
}

/// Chunked uploader over any transport
pub struct Uploader<T: UploadTransport> {
    transport: T,
    config: UploadConfig,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(transport: T, config: UploadConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload a file, reporting progress per completed chunk.
    ///
    /// `on_progress` receives cumulative byte progress; `on_chunk_complete`
    /// receives each confirmed chunk index.
    pub async fn upload<F, G>(
        &self,
        meta: &FileMeta,
        data: Bytes,
        mut on_progress: F,
        mut on_chunk_complete: G,
    ) -> Result<UploadOutcome>
    where
        F: FnMut(UploadProgress),
        G: FnMut(u32),
    {
        validate_file(meta, &self.config)?;
        if data.len() as u64 != meta.file_size {
            return Err(Error::validation(format!(
                "Declared size {} does not match payload size {}",
                meta.file_size,
                data.len()
            )));
        }

        let plan = plan_chunks(meta.file_size, self.config.chunk_size);
        let total_chunks = plan.len() as u32;
        let upload_id = self.transport.initialize(meta, total_chunks).await?;
        tracing::debug!(
            "Upload {} initialized: {} chunks of {} ({} bytes total)",
            upload_id,
            total_chunks,
            self.config.chunk_size,
            meta.file_size
        );

        let mut uploaded_bytes = 0u64;
        let mut failed: Vec<ChunkSpec> = Vec::new();

        // Batches are strictly ordered: batch n fully resolves (success or
        // recorded failure) before batch n+1 is issued.
        for batch in plan.chunks(self.config.batch_size.max(1)) {
            let attempts = batch.iter().map(|spec| {
                let chunk = slice_chunk(&data, spec);
                async move {
                    let result = self.transport.put_chunk(upload_id, spec.index, chunk).await;
                    (*spec, result)
                }
            });

            for (spec, result) in join_all(attempts).await {
                match result {
                    Ok(()) => {
                        uploaded_bytes += spec.len;
                        on_progress(progress(uploaded_bytes, meta.file_size));
                        on_chunk_complete(spec.index);
                    }
                    Err(e) => {
                        tracing::warn!("Chunk {} failed first pass: {}", spec.index, e);
                        failed.push(spec);
                    }
                }
            }
        }

        // Single sequential retry pass; a second failure is terminal.
        for spec in failed {
            let chunk = slice_chunk(&data, &spec);
            match self.transport.put_chunk(upload_id, spec.index, chunk).await {
                Ok(()) => {
                    uploaded_bytes += spec.len;
                    on_progress(progress(uploaded_bytes, meta.file_size));
                    on_chunk_complete(spec.index);
                }
                Err(e) => {
                    return Err(Error::chunk_upload_after_retry(spec.index, e.to_string()));
                }
            }
        }

        let file_id = self.transport.complete(upload_id, meta).await?;
        tracing::info!("Upload {} complete, file {}", upload_id, file_id);
        Ok(UploadOutcome { upload_id, file_id })
    }
}

fn slice_chunk(data: &Bytes, spec: &ChunkSpec) -> Bytes {
    data.slice(spec.offset as usize..(spec.offset + spec.len) as usize)
}

fn progress(uploaded: u64, total: u64) -> UploadProgress {
    let percentage = ((uploaded as f64 / total as f64) * 100.0).round() as u8;
    UploadProgress {
        uploaded_bytes: uploaded,
        total_bytes: total,
        percentage,
    }
}

/// HTTP transport speaking the server's upload endpoints
pub struct HttpUploadTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest<'a> {
    file_name: &'a str,
    file_size: u64,
    file_type: &'a str,
    total_chunks: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResponse {
    upload_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    upload_id: Uuid,
    file_name: &'a str,
    file_size: u64,
    file_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    file_id: Uuid,
}

impl HttpUploadTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Error::internal(format!("Server returned {}: {}", status, body)))
        }
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn initialize(&self, meta: &FileMeta, total_chunks: u32) -> Result<Uuid> {
        let response = self
            .client
            .post(format!("{}/upload/initialize", self.base_url))
            .json(&InitializeRequest {
                file_name: &meta.file_name,
                file_size: meta.file_size,
                file_type: &meta.mime_type,
                total_chunks,
            })
            .send()
            .await?;
        let parsed: InitializeResponse = Self::check(response).await?.json().await?;
        Ok(parsed.upload_id)
    }

    async fn put_chunk(&self, upload_id: Uuid, index: u32, bytes: Bytes) -> Result<()> {
        let form = reqwest::multipart::Form::new()
            .text("uploadId", upload_id.to_string())
            .text("chunkIndex", index.to_string())
            .part(
                "chunk",
                reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(format!("chunk-{}", index)),
            );

        let response = self
            .client
            .post(format!("{}/upload/chunk", self.base_url))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn complete(&self, upload_id: Uuid, meta: &FileMeta) -> Result<Uuid> {
        let response = self
            .client
            .post(format!("{}/upload/complete", self.base_url))
            .json(&CompleteRequest {
                upload_id,
                file_name: &meta.file_name,
                file_size: meta.file_size,
                file_type: &meta.mime_type,
            })
            .send()
            .await?;
        let parsed: CompleteResponse = Self::check(response).await?.json().await?;
        Ok(parsed.file_id)
    }
}
