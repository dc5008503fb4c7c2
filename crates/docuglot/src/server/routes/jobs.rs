//! Job submission, status, and action endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credits::{count_words, OwnerRef};
use crate::error::{Error, Result};
use crate::jobs::intelligence::{AnalysisKind, Priority};
use crate::jobs::translation::{JobSpec, JobStatus};
use crate::jobs::JobSnapshot;
use crate::providers::translator::TranslationService;
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub file_id: Uuid,
    pub owner: String,
    pub source_lang: String,
    pub target_lang: String,
    pub service: TranslationService,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub job_id: Uuid,
    pub status: String,
    pub cost: i64,
    pub word_count: u64,
}

/// POST /jobs/translate - Reserve credits and queue a translation job
pub async fn submit_translation(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>> {
    let stored = state
        .sessions()
        .file(req.file_id)
        .ok_or_else(|| Error::validation(format!("Unknown file: {}", req.file_id)))?;

    let bytes = state.sessions().file_bytes(req.file_id).await?;
    let word_count = count_words(&String::from_utf8_lossy(&bytes));

    let job = state
        .registry()
        .submit(JobSpec {
            owner: OwnerRef::new(req.owner),
            file_id: stored.id,
            input_ref: stored.blob_path,
            word_count,
            source_lang: req.source_lang,
            target_lang: req.target_lang,
            service: req.service,
        })
        .await?;

    Ok(Json(TranslateResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
        cost: job.cost,
        word_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub job_id: Uuid,
}

/// GET /jobs/status?jobId= - Snapshot of either pipeline's job
pub async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobSnapshot>> {
    let snapshot = state
        .job_lookup()
        .snapshot(query.job_id)
        .ok_or(Error::JobNotFound(query.job_id))?;
    Ok(Json(snapshot))
}

/// Job action command; the tag makes the dispatch exhaustive
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum JobAction {
    Cancel {
        #[serde(rename = "jobId")]
        job_id: Uuid,
    },
    Retry {
        #[serde(rename = "jobId")]
        job_id: Uuid,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub job_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_job_id: Option<Uuid>,
}

/// POST /jobs/action - Cancel or retry a job in either pipeline
pub async fn job_action(
    State(state): State<AppState>,
    Json(action): Json<JobAction>,
) -> Result<Json<ActionResponse>> {
    match action {
        JobAction::Cancel { job_id } => {
            // The id lives in exactly one pipeline; try translation first
            match state.registry().cancel(job_id) {
                Ok(job) => Ok(Json(ActionResponse {
                    job_id,
                    status: job.status.as_str().to_string(),
                    new_job_id: None,
                })),
                Err(Error::JobNotFound(_)) => {
                    let job = state.intelligence().cancel(job_id)?;
                    Ok(Json(ActionResponse {
                        job_id,
                        status: job.status.as_str().to_string(),
                        new_job_id: None,
                    }))
                }
                Err(e) => Err(e),
            }
        }
        JobAction::Retry { job_id } => {
            if state.registry().get(job_id).is_some() {
                let new_id = retry_translation(&state, job_id).await?;
                Ok(Json(ActionResponse {
                    job_id,
                    status: "queued".to_string(),
                    new_job_id: Some(new_id),
                }))
            } else {
                let retried = state.intelligence().retry(job_id)?;
                Ok(Json(ActionResponse {
                    job_id,
                    status: retried.status.as_str().to_string(),
                    new_job_id: Some(retried.id),
                }))
            }
        }
    }
}

/// Retry never rewrites history: a new job is submitted with the original's
/// spec (reserving credits again), the failed record stays as it is.
async fn retry_translation(state: &AppState, job_id: Uuid) -> Result<Uuid> {
    let job = state
        .registry()
        .get(job_id)
        .ok_or(Error::JobNotFound(job_id))?;
    if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
        return Err(Error::InvalidTransition {
            from: job.status.as_str().to_string(),
            to: JobStatus::Queued.as_str().to_string(),
        });
    }
    let new_job = state.registry().submit(job.spec.clone()).await?;
    Ok(new_job.id)
}

#[derive(Debug, Deserialize)]
pub struct IntelligenceRequest {
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub priority: Priority,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceResponse {
    pub job_id: Uuid,
    pub status: String,
    pub estimated_duration_ms: u64,
}

/// POST /jobs/intelligence - Queue a background analysis job
pub async fn submit_intelligence(
    State(state): State<AppState>,
    Json(req): Json<IntelligenceRequest>,
) -> Result<Json<IntelligenceResponse>> {
    let job = state.intelligence().add_job(req.kind, req.priority, req.data);
    Ok(Json(IntelligenceResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
        estimated_duration_ms: job.estimated_duration_ms,
    }))
}
