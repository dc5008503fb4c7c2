//! Error types for the translation pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Translation pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File failed upload validation (too large, disallowed type)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Owner balance cannot cover the reservation
    #[error("Insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Upload session is missing chunks or sizes do not add up
    #[error("Upload {upload_id} incomplete: {message}")]
    IncompleteUpload { upload_id: Uuid, message: String },

    /// A chunk transfer failed (transient; the uploader retries once)
    #[error("Failed to upload chunk {index}: {message}")]
    ChunkUpload { index: u32, message: String },

    /// A chunk failed its single retry; the whole upload is aborted
    #[error("Failed to upload chunk {index} after retry: {message}")]
    ChunkRetryExhausted { index: u32, message: String },

    /// Upload session not found
    #[error("Upload session not found: {0}")]
    SessionNotFound(Uuid),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Requested state transition is not allowed
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Progress stream failure (terminal; closes the channel)
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Translation provider error
    #[error("Translator error: {0}")]
    Translator(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a translator error
    pub fn translator(message: impl Into<String>) -> Self {
        Self::Translator(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a first-pass chunk failure (eligible for one retry)
    pub fn chunk_upload(index: u32, message: impl Into<String>) -> Self {
        Self::ChunkUpload {
            index,
            message: message.into(),
        }
    }

    /// Create a terminal chunk failure after the single retry
    pub fn chunk_upload_after_retry(index: u32, message: impl Into<String>) -> Self {
        Self::ChunkRetryExhausted {
            index,
            message: message.into(),
        }
    }

    /// Stable machine-readable error kind used in HTTP responses and job records
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::ChunkUpload { .. } => "chunk_upload_error",
            Self::ChunkRetryExhausted { .. } => "chunk_retry_exhausted",
            Self::SessionNotFound(_) => "session_not_found",
            Self::JobNotFound(_) => "job_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Streaming(_) => "streaming_error",
            Self::Storage(_) => "storage_error",
            Self::Translator(_) => "translator_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Http(_) => "http_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Error::ChunkUpload { .. } | Error::ChunkRetryExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Error::SessionNotFound(_) | Error::JobNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::Streaming(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Translator(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
