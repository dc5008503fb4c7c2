//! Translation job state machine
//!
//! `queued -> translating -> {translated | failed}`, with `cancelled`
//! reachable only from the two non-terminal states. A job is only created
//! after its credit reservation succeeds, and every reservation is resolved by
//! exactly one of finalize (on `translated`) or refund (on `failed` or
//! `cancelled`). Progress is monotonically non-decreasing while translating.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::credits::{CreditLedger, OwnerRef, PricingTable};
use crate::error::{Error, Result};
use crate::providers::translator::TranslationService;

use super::{JobError, JobSnapshot, PerformanceBlock};

/// Progress floor once text extraction is done; segment translation maps
/// into the span above it, completion pins 100.
pub const TRANSLATE_BASE: u8 = 5;
pub const TRANSLATE_RANGE: u8 = 90;

/// Translation job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Translating,
    Translated,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Translated | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Translating => "translating",
            Self::Translated => "translated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything needed to (re)create a translation job
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub owner: OwnerRef,
    pub file_id: Uuid,
    /// Blob path of the assembled source document
    pub input_ref: String,
    pub word_count: u64,
    pub source_lang: String,
    pub target_lang: String,
    pub service: TranslationService,
}

/// One translation job record
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub id: Uuid,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub progress: u8,
    pub cost: i64,
    pub credits_reserved: bool,
    /// Blob path of the translated output
    pub output_ref: Option<String>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Registry owning all translation jobs; every mutation goes through its
/// methods (the backing map is never exposed)
pub struct JobRegistry {
    jobs: DashMap<Uuid, TranslationJob>,
    ledger: Arc<CreditLedger>,
    pricing: PricingTable,
    sender: mpsc::Sender<Uuid>,
}

impl JobRegistry {
    /// Create a registry and the worker-side receiver for its queue
    pub fn new(
        ledger: Arc<CreditLedger>,
        pricing: PricingTable,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                jobs: DashMap::new(),
                ledger,
                pricing,
                sender,
            },
            receiver,
        )
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Reserve credits and persist a new queued job. Reservation failure
    /// prevents job creation; a failed enqueue rolls the reservation back, so
    /// no reservation is ever left without a job that resolves it.
    pub async fn submit(&self, spec: JobSpec) -> Result<TranslationJob> {
        let cost = self.pricing.compute_cost(spec.word_count, spec.service);
        let job_id = Uuid::new_v4();

        self.ledger.reserve(&spec.owner, job_id, cost)?;

        let job = TranslationJob {
            id: job_id,
            spec: spec.clone(),
            status: JobStatus::Queued,
            progress: 0,
            cost,
            credits_reserved: true,
            output_ref: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs.insert(job_id, job.clone());

        if let Err(e) = self.sender.send(job_id).await {
            // Queue is gone; roll the reservation back and drop the record
            let _ = self.ledger.refund(&spec.owner, job_id);
            self.jobs.remove(&job_id);
            return Err(Error::internal(format!("Failed to enqueue job: {}", e)));
        }

        tracing::info!(
            "Job {} queued: {} -> {} ({} words, {} credits)",
            job_id,
            spec.source_lang,
            spec.target_lang,
            spec.word_count,
            cost
        );
        Ok(job)
    }

    /// Job snapshot by id
    pub fn get(&self, job_id: Uuid) -> Option<TranslationJob> {
        self.jobs.get(&job_id).map(|j| j.clone())
    }

    /// Worker claims a queued job
    pub fn start(&self, job_id: Uuid) -> Result<TranslationJob> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status != JobStatus::Queued {
            return Err(Error::InvalidTransition {
                from: job.status.as_str().to_string(),
                to: JobStatus::Translating.as_str().to_string(),
            });
        }
        job.status = JobStatus::Translating;
        job.started_at = Some(Utc::now());
        job.progress = job.progress.max(TRANSLATE_BASE);
        Ok(job.clone())
    }

    /// Advance progress after segment `done` of `total`. A value that would
    /// decrease the recorded progress is dropped, never applied.
    pub fn segment_translated(&self, job_id: Uuid, done: usize, total: usize) {
        let total = total.max(1);
        let new = TRANSLATE_BASE
            + ((done.min(total) as u64 * TRANSLATE_RANGE as u64) / total as u64) as u8;

        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Translating && new > job.progress {
                job.progress = new;
            }
        }
    }

    /// `translating -> translated`; finalizes the reservation
    pub fn complete(&self, job_id: Uuid, output_ref: String) -> Result<()> {
        let owner = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(Error::JobNotFound(job_id))?;
            if job.status != JobStatus::Translating {
                return Err(Error::InvalidTransition {
                    from: job.status.as_str().to_string(),
                    to: JobStatus::Translated.as_str().to_string(),
                });
            }
            job.status = JobStatus::Translated;
            job.progress = 100;
            job.output_ref = Some(output_ref);
            job.completed_at = Some(Utc::now());
            job.spec.owner.clone()
        };

        self.ledger.finalize(&owner, job_id)?;
        tracing::info!("Job {} translated", job_id);
        Ok(())
    }

    /// Route any failure to `failed` and refund the reservation. Safe to call
    /// from multiple failure paths: once the job is terminal this is a no-op,
    /// and the ledger refunds at most once per job regardless.
    pub fn fail(&self, job_id: Uuid, error: &Error) {
        let owner = {
            let mut job = match self.jobs.get_mut(&job_id) {
                Some(job) => job,
                None => return,
            };
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Failed;
            job.error = Some(JobError {
                kind: error.error_type().to_string(),
                message: error.to_string(),
            });
            job.completed_at = Some(Utc::now());
            job.credits_reserved.then(|| job.spec.owner.clone())
        };

        if let Some(owner) = owner {
            if let Err(e) = self.ledger.refund(&owner, job_id) {
                tracing::error!("Refund for failed job {} did not apply: {}", job_id, e);
            }
        }
        tracing::warn!("Job {} failed: {}", job_id, error);
    }

    /// Cancel a queued or translating job; terminal jobs reject the request
    pub fn cancel(&self, job_id: Uuid) -> Result<TranslationJob> {
        let (snapshot, owner) = {
            let mut job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(Error::JobNotFound(job_id))?;
            if job.status.is_terminal() {
                return Err(Error::InvalidTransition {
                    from: job.status.as_str().to_string(),
                    to: JobStatus::Cancelled.as_str().to_string(),
                });
            }
            job.status = JobStatus::Cancelled;
            job.error = Some(JobError {
                kind: "cancelled".to_string(),
                message: "Job cancelled by owner".to_string(),
            });
            job.completed_at = Some(Utc::now());
            (job.clone(), job.credits_reserved.then(|| job.spec.owner.clone()))
        };

        if let Some(owner) = owner {
            if let Err(e) = self.ledger.refund(&owner, job_id) {
                tracing::error!("Refund for cancelled job {} did not apply: {}", job_id, e);
            }
        }
        tracing::info!("Job {} cancelled", job_id);
        Ok(snapshot)
    }

    /// Uniform status payload for the status endpoint and the stream
    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(|job| {
            let performance = job
                .completed_at
                .map(|done| PerformanceBlock::from_timestamps(job.created_at, job.started_at, done));
            JobSnapshot {
                job_id: job.id,
                status: job.status.as_str().to_string(),
                progress: job.progress,
                result: job.output_ref.as_ref().map(|r| {
                    serde_json::json!({
                        "outputRef": r,
                        "sourceLang": job.spec.source_lang,
                        "targetLang": job.spec.target_lang,
                    })
                }),
                error: job.error.clone(),
                performance,
                terminal: job.status.is_terminal(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerRef {
        OwnerRef::from("user-1")
    }

    fn spec() -> JobSpec {
        JobSpec {
            owner: owner(),
            file_id: Uuid::new_v4(),
            input_ref: "files/test".to_string(),
            word_count: 1000,
            source_lang: "en".to_string(),
            target_lang: "vi".to_string(),
            service: TranslationService::GoogleTranslate,
        }
    }

    fn registry_with_credits(credits: i64) -> (JobRegistry, mpsc::Receiver<Uuid>) {
        let ledger = Arc::new(CreditLedger::new());
        ledger.deposit(&owner(), credits, "topup");
        JobRegistry::new(ledger, PricingTable::default(), 16)
    }

    #[tokio::test]
    async fn test_submit_reserves_credits_before_creating_job() {
        let (registry, mut rx) = registry_with_credits(100);

        let job = registry.submit(spec()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.cost, 60);
        assert_eq!(registry.ledger().balance(&owner()), 40);
        assert_eq!(rx.recv().await.unwrap(), job.id);
    }

    #[tokio::test]
    async fn test_insufficient_credits_creates_no_job() {
        let (registry, mut rx) = registry_with_credits(10);

        let err = registry.submit(spec()).await.unwrap_err();
        assert_eq!(err.error_type(), "insufficient_credits");
        // No orphan job, nothing enqueued, balance untouched
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.ledger().balance(&owner()), 10);
    }

    #[tokio::test]
    async fn test_happy_path_finalizes_exactly_once() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();

        registry.start(job.id).unwrap();
        registry.segment_translated(job.id, 1, 2);
        registry.complete(job.id, "outputs/x".to_string()).unwrap();

        let done = registry.get(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Translated);
        assert_eq!(done.progress, 100);
        // Finalized: the reservation stands, no refund possible
        assert_eq!(registry.ledger().balance(&owner()), 40);
        assert!(registry.ledger().refund(&owner(), job.id).is_err());
    }

    #[tokio::test]
    async fn test_failure_refunds_to_pre_reservation_balance() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();
        registry.start(job.id).unwrap();

        registry.fail(job.id, &Error::translator("provider exploded"));

        let failed = registry.get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_ref().unwrap().kind, "translator_error");
        // Net zero: balance equals the value before the reservation
        assert_eq!(registry.ledger().balance(&owner()), 100);
    }

    #[tokio::test]
    async fn test_double_failure_refunds_once() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();
        registry.start(job.id).unwrap();

        // Two failure paths firing (timeout handler and error handler)
        registry.fail(job.id, &Error::internal("timeout"));
        registry.fail(job.id, &Error::translator("late error"));

        assert_eq!(registry.ledger().balance(&owner()), 100);
        let failed = registry.get(job.id).unwrap();
        // First failure wins; the second is a no-op
        assert_eq!(failed.error.as_ref().unwrap().kind, "internal_error");
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();
        registry.start(job.id).unwrap();

        registry.segment_translated(job.id, 5, 10);
        let mid = registry.get(job.id).unwrap().progress;
        registry.segment_translated(job.id, 2, 10);
        // The decreasing update is dropped
        assert_eq!(registry.get(job.id).unwrap().progress, mid);
        registry.segment_translated(job.id, 10, 10);
        assert_eq!(
            registry.get(job.id).unwrap().progress,
            TRANSLATE_BASE + TRANSLATE_RANGE
        );
    }

    #[tokio::test]
    async fn test_cancel_from_queued_refunds() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();

        let cancelled = registry.cancel(job.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(registry.ledger().balance(&owner()), 100);
    }

    #[tokio::test]
    async fn test_cancel_after_translated_is_rejected() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();
        registry.start(job.id).unwrap();
        registry.complete(job.id, "outputs/x".to_string()).unwrap();

        let err = registry.cancel(job.id).unwrap_err();
        assert_eq!(err.error_type(), "invalid_transition");
        // The consumed reservation stays consumed
        assert_eq!(registry.ledger().balance(&owner()), 40);
    }

    #[tokio::test]
    async fn test_snapshot_has_performance_only_when_terminal() {
        let (registry, _rx) = registry_with_credits(100);
        let job = registry.submit(spec()).await.unwrap();

        let queued = registry.snapshot(job.id).unwrap();
        assert!(queued.performance.is_none());
        assert!(!queued.terminal);

        registry.start(job.id).unwrap();
        registry.complete(job.id, "outputs/x".to_string()).unwrap();

        let done = registry.snapshot(job.id).unwrap();
        assert!(done.terminal);
        assert!(done.performance.is_some());
        assert!(done.result.is_some());
    }
}
