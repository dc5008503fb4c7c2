//! docuglot: credit-gated document translation with resumable chunked uploads
//!
//! This crate implements the upload-to-job pipeline behind a document
//! translation service: a chunked, resumable file-upload protocol feeding an
//! asynchronous translation job state machine, gated by an atomic credit
//! ledger and observable over a live progress stream (SSE) with a polling
//! fallback. A sibling priority-ordered background processor runs longer
//! document-intelligence analyses under the same status contracts.

pub mod config;
pub mod credits;
pub mod error;
pub mod jobs;
pub mod providers;
pub mod server;
pub mod upload;

pub use config::DocuglotConfig;
pub use error::{Error, Result};
pub use credits::{CreditLedger, OwnerRef, PricingTable};
pub use jobs::{
    intelligence::{IntelligenceQueue, Priority},
    translation::{JobRegistry, JobStatus, TranslationJob},
};
pub use providers::{
    blob_store::{BlobStore, FsBlobStore},
    translator::{TranslateOptions, TranslationService, Translator},
};
pub use upload::{
    chunker::{plan_chunks, validate_file, FileMeta},
    session::UploadSessionStore,
    uploader::{UploadTransport, Uploader},
};
