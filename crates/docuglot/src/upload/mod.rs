//! Resumable chunked upload pipeline
//!
//! `chunker` holds the pure planning/validation logic shared by both sides,
//! `uploader` is the client half (bounded-concurrency transfer with a single
//! retry pass), and `session` is the server half (idempotent chunk assembly
//! into one durable blob).

pub mod chunker;
pub mod session;
pub mod uploader;

pub use chunker::{plan_chunks, validate_file, ChunkSpec, FileMeta};
pub use session::{StoredFile, UploadSession, UploadSessionStore, UploadStatus};
pub use uploader::{UploadOutcome, UploadProgress, UploadTransport, Uploader};
