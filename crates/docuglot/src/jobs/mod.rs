//! Asynchronous job pipelines
//!
//! `translation` is the credit-gated translation state machine and
//! `intelligence` the priority-ordered background analysis processor. Both
//! expose the same status snapshot shape, which `stream` turns into a live
//! progress channel.

pub mod intelligence;
pub mod stream;
pub mod translation;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Machine-readable error attached to a failed job
#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

/// Timing block, present only once a job is terminal
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBlock {
    pub processing_time_ms: i64,
    pub queue_time_ms: i64,
    pub total_time_ms: i64,
}

impl PerformanceBlock {
    pub fn from_timestamps(
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let started = started_at.unwrap_or(completed_at);
        Self {
            processing_time_ms: (completed_at - started).num_milliseconds(),
            queue_time_ms: (started - created_at).num_milliseconds(),
            total_time_ms: (completed_at - created_at).num_milliseconds(),
        }
    }
}

/// Uniform status payload shared by the status endpoint, the polling
/// fallback, and the terminal streaming event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceBlock>,
    #[serde(skip)]
    pub terminal: bool,
}
