//! File validation and deterministic chunk planning

use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// Client-declared file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// One planned chunk: ordinal index over a contiguous byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

/// Mime types accepted alongside the extension allowlist
const ACCEPTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "text/plain",
    "text/markdown",
];

fn extension(file_name: &str) -> Option<&str> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
}

/// Validate size and type against the upload constraints.
/// A file passes on either a known mime type or an allowed extension.
pub fn validate_file(meta: &FileMeta, config: &UploadConfig) -> Result<()> {
    if meta.file_size == 0 {
        return Err(Error::validation("File is empty"));
    }
    if meta.file_size > config.max_file_size {
        return Err(Error::validation(format!(
            "File size {} exceeds the {} byte limit",
            meta.file_size, config.max_file_size
        )));
    }

    let mime_ok = ACCEPTED_MIME_TYPES.contains(&meta.mime_type.as_str());
    let ext_ok = extension(&meta.file_name)
        .map(|e| {
            let e = e.to_ascii_lowercase();
            config.allowed_types.iter().any(|t| *t == e)
        })
        .unwrap_or(false);

    if !mime_ok && !ext_ok {
        return Err(Error::validation(format!(
            "Unsupported file type: {} ({})",
            meta.mime_type,
            extension(&meta.file_name).unwrap_or("no extension")
        )));
    }

    Ok(())
}

/// Deterministic ordered split: chunk `i` covers
/// `[i*chunk_size, min((i+1)*chunk_size, file_size))`. Every chunk except
/// possibly the last is exactly `chunk_size` bytes.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<ChunkSpec> {
    assert!(chunk_size > 0, "chunk size must be positive");

    let mut chunks = Vec::with_capacity(file_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut index = 0u32;
    while offset < file_size {
        let len = chunk_size.min(file_size - offset);
        chunks.push(ChunkSpec { index, offset, len });
        offset += len;
        index += 1;
    }
    chunks
}

/// Expected chunk count for a file under the configured chunk size
pub fn expected_chunks(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(chunk_size) as u32
}
