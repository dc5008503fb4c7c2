//! Chunked upload endpoints

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::upload::FileMeta;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub total_chunks: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub upload_id: Uuid,
    pub total_chunks: u32,
}

/// POST /upload/initialize - Open an upload session
pub async fn initialize(
    State(state): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>> {
    // Fall back to a filename-derived mime type when the client sends none
    let mime_type = if req.file_type.is_empty() {
        mime_guess::from_path(&req.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    } else {
        req.file_type
    };
    let meta = FileMeta {
        file_name: req.file_name,
        file_size: req.file_size,
        mime_type,
    };
    let upload_id = state.sessions().initialize(meta, req.total_chunks)?;
    Ok(Json(InitializeResponse {
        upload_id,
        total_chunks: req.total_chunks,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub upload_id: Uuid,
    pub chunk_index: u32,
    pub received: bool,
}

/// POST /upload/chunk - Receive one chunk (multipart: uploadId, chunkIndex, chunk)
pub async fn receive_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>> {
    let mut upload_id: Option<Uuid> = None;
    let mut chunk_index: Option<u32> = None;
    let mut bytes: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "uploadId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read uploadId: {}", e)))?;
                upload_id = Some(
                    text.parse()
                        .map_err(|_| Error::validation(format!("Invalid uploadId: {}", text)))?,
                );
            }
            "chunkIndex" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read chunkIndex: {}", e)))?;
                chunk_index = Some(
                    text.parse()
                        .map_err(|_| Error::validation(format!("Invalid chunkIndex: {}", text)))?,
                );
            }
            "chunk" => {
                bytes = Some(field.bytes().await.map_err(|e| {
                    Error::validation(format!("Failed to read chunk bytes: {}", e))
                })?);
            }
            other => {
                tracing::debug!("Ignoring unexpected multipart field: {}", other);
            }
        }
    }

    let upload_id = upload_id.ok_or_else(|| Error::validation("Missing uploadId field"))?;
    let chunk_index = chunk_index.ok_or_else(|| Error::validation("Missing chunkIndex field"))?;
    let bytes = bytes.ok_or_else(|| Error::validation("Missing chunk field"))?;

    state
        .sessions()
        .receive_chunk(upload_id, chunk_index, &bytes)
        .await?;

    Ok(Json(ChunkResponse {
        upload_id,
        chunk_index,
        received: true,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub file_id: Uuid,
    pub content_hash: String,
    pub size: u64,
}

/// POST /upload/complete - Verify completeness and assemble the file
pub async fn complete(
    State(state): State<AppState>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>> {
    let meta = FileMeta {
        file_name: req.file_name,
        file_size: req.file_size,
        mime_type: req.file_type,
    };
    let stored = state.sessions().complete(req.upload_id, &meta).await?;
    Ok(Json(CompleteResponse {
        file_id: stored.id,
        content_hash: stored.content_hash,
        size: stored.size,
    }))
}
