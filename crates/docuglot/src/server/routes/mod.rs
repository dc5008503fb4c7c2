//! HTTP routes for the translation server

pub mod credits;
pub mod jobs;
pub mod stream;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::config::DocuglotConfig;
use crate::server::state::AppState;

/// Build all routes
pub fn routes(config: &DocuglotConfig) -> Router<AppState> {
    // Chunk bodies carry one chunk plus multipart framing
    let chunk_body_limit = config.upload.chunk_size as usize + 1024 * 1024;

    Router::new()
        // Chunked upload protocol
        .route("/upload/initialize", post(upload::initialize))
        .route(
            "/upload/chunk",
            post(upload::receive_chunk).layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .route("/upload/complete", post(upload::complete))
        // Translation jobs
        .route("/jobs/translate", post(jobs::submit_translation))
        .route("/jobs/status", get(jobs::job_status))
        .route("/jobs/action", post(jobs::job_action))
        .route("/jobs/intelligence", post(jobs::submit_intelligence))
        .route("/jobs/stream", get(stream::job_stream))
        // Credits
        .route("/credits", get(credits::balance))
        .route("/credits/deposit", post(credits::deposit))
}
