//! Priority-ordered background analysis processor
//!
//! A sibling pipeline to translation for longer-running document analyses.
//! Jobs carry a priority tier; the backlog pops high before medium before
//! low, FIFO within a tier. Progress while processing is extrapolated from
//! a duration estimate, so subscribers see movement without per-step
//! instrumentation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{JobError, JobSnapshot, PerformanceBlock};

/// Scheduling tier; ordering is Low < Medium < High
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    fn duration_multiplier(self) -> f64 {
        // Higher priority tiers get faster lanes in the estimate
        match self {
            Self::High => 0.8,
            Self::Medium => 1.0,
            Self::Low => 1.5,
        }
    }
}

/// Analysis kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Leading-sentence summary of the document text
    Summary,
    /// Most frequent terms with counts
    Keywords,
    /// Word/sentence/character statistics
    Statistics,
}

impl AnalysisKind {
    fn duration_multiplier(self) -> f64 {
        match self {
            Self::Summary => 2.0,
            Self::Keywords => 1.5,
            Self::Statistics => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Keywords => "keywords",
            Self::Statistics => "statistics",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntelligenceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl IntelligenceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One background analysis job
#[derive(Debug, Clone)]
pub struct IntelligenceJob {
    pub id: Uuid,
    pub kind: AnalysisKind,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub status: IntelligenceStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobError>,
    pub estimated_duration_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Backlog entry: priority descending, then submission order ascending
struct BacklogEntry {
    priority: Priority,
    seq: u64,
    job_id: Uuid,
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for BacklogEntry {}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Estimate base for progress extrapolation (not used for scheduling)
const BASE_DURATION_MS: f64 = 2_000.0;

/// Registry plus priority backlog for background analysis jobs
pub struct IntelligenceQueue {
    jobs: DashMap<Uuid, IntelligenceJob>,
    backlog: Mutex<BinaryHeap<BacklogEntry>>,
    seq: AtomicU64,
    notify: Notify,
}

impl Default for IntelligenceQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IntelligenceQueue {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            backlog: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Create a job and append it to the backlog
    pub fn add_job(
        &self,
        kind: AnalysisKind,
        priority: Priority,
        data: serde_json::Value,
    ) -> IntelligenceJob {
        let job = IntelligenceJob {
            id: Uuid::new_v4(),
            kind,
            priority,
            data,
            status: IntelligenceStatus::Pending,
            result: None,
            error: None,
            estimated_duration_ms: estimate_duration_ms(kind, priority),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs.insert(job.id, job.clone());
        self.backlog.lock().push(BacklogEntry {
            priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            job_id: job.id,
        });
        self.notify.notify_one();

        tracing::info!(
            "Intelligence job {} queued ({}, {:?} priority)",
            job.id,
            kind.as_str(),
            priority
        );
        job
    }

    pub fn get(&self, job_id: Uuid) -> Option<IntelligenceJob> {
        self.jobs.get(&job_id).map(|j| j.clone())
    }

    /// Pop the highest-priority pending job and mark it processing.
    /// Cancelled entries still sitting in the backlog are skipped.
    fn claim_next(&self) -> Option<IntelligenceJob> {
        loop {
            let entry = self.backlog.lock().pop()?;
            let mut job = match self.jobs.get_mut(&entry.job_id) {
                Some(job) => job,
                None => continue,
            };
            if job.status != IntelligenceStatus::Pending {
                continue;
            }
            job.status = IntelligenceStatus::Processing;
            job.started_at = Some(Utc::now());
            return Some(job.clone());
        }
    }

    /// Cancel a pending or processing job. A processing job stops at the
    /// worker's next cancellation check; its backlog entry, if any, is
    /// skipped lazily on pop.
    pub fn cancel(&self, job_id: Uuid) -> Result<IntelligenceJob> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: job.status.as_str().to_string(),
                to: IntelligenceStatus::Cancelled.as_str().to_string(),
            });
        }
        job.status = IntelligenceStatus::Cancelled;
        job.error = Some(JobError {
            kind: "cancelled".to_string(),
            message: "Job cancelled by owner".to_string(),
        });
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    /// Retry a terminal job: a new job is created carrying the original's
    /// kind, priority, and data. The original record is never rewritten.
    pub fn retry(&self, job_id: Uuid) -> Result<IntelligenceJob> {
        let (kind, priority, data) = {
            let job = self.jobs.get(&job_id).ok_or(Error::JobNotFound(job_id))?;
            if !job.status.is_terminal() {
                return Err(Error::InvalidTransition {
                    from: job.status.as_str().to_string(),
                    to: IntelligenceStatus::Pending.as_str().to_string(),
                });
            }
            (job.kind, job.priority, job.data.clone())
        };
        Ok(self.add_job(kind, priority, data))
    }

    fn complete(&self, job_id: Uuid, result: serde_json::Value) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            if job.status != IntelligenceStatus::Processing {
                return;
            }
            job.status = IntelligenceStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
        }
    }

    fn fail(&self, job_id: Uuid, error: &Error) {
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            if job.status.is_terminal() {
                return;
            }
            job.status = IntelligenceStatus::Failed;
            job.error = Some(JobError {
                kind: error.error_type().to_string(),
                message: error.to_string(),
            });
            job.completed_at = Some(Utc::now());
        }
    }

    /// Extrapolated progress: elapsed over the estimate, capped below 100
    /// until the job is actually terminal
    pub fn progress(&self, job: &IntelligenceJob) -> u8 {
        match job.status {
            IntelligenceStatus::Pending => 0,
            IntelligenceStatus::Completed => 100,
            IntelligenceStatus::Failed | IntelligenceStatus::Cancelled => job
                .started_at
                .map(|_| 95)
                .unwrap_or(0),
            IntelligenceStatus::Processing => {
                let elapsed = job
                    .started_at
                    .map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64)
                    .unwrap_or(0);
                let estimate = job.estimated_duration_ms.max(1);
                ((elapsed * 100 / estimate).min(95)) as u8
            }
        }
    }

    /// Uniform status payload, same shape as the translation pipeline's
    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(|job| {
            let performance = job
                .completed_at
                .map(|done| PerformanceBlock::from_timestamps(job.created_at, job.started_at, done));
            JobSnapshot {
                job_id: job.id,
                status: job.status.as_str().to_string(),
                progress: self.progress(&job),
                result: job.result.clone(),
                error: job.error.clone(),
                performance,
                terminal: job.status.is_terminal(),
            }
        })
    }

    /// Worker loop: claim and process backlog entries until the queue is
    /// dropped by every other holder
    pub async fn run(self: Arc<Self>) {
        tracing::info!("Intelligence worker started");
        loop {
            match self.claim_next() {
                Some(job) => {
                    let outcome = analyze(&job);
                    // Honor a cancel that landed while the analysis ran
                    match outcome {
                        Ok(result) => self.complete(job.id, result),
                        Err(e) => self.fail(job.id, &e),
                    }
                }
                None => {
                    if Arc::strong_count(&self) == 1 {
                        break;
                    }
                    self.notify.notified().await;
                }
            }
        }
        tracing::info!("Intelligence worker stopped");
    }
}

/// `baseTime * typeMultiplier * priorityMultiplier`, for progress
/// extrapolation only
pub fn estimate_duration_ms(kind: AnalysisKind, priority: Priority) -> u64 {
    (BASE_DURATION_MS * kind.duration_multiplier() * priority.duration_multiplier()) as u64
}

fn job_text(job: &IntelligenceJob) -> Result<&str> {
    job.data
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::validation("Analysis data must include a 'text' field"))
}

/// Deterministic analyses over the job's text payload
fn analyze(job: &IntelligenceJob) -> Result<serde_json::Value> {
    let text = job_text(job)?;
    match job.kind {
        AnalysisKind::Summary => Ok(summarize(text)),
        AnalysisKind::Keywords => Ok(keywords(text)),
        AnalysisKind::Statistics => Ok(statistics(text)),
    }
}

fn summarize(text: &str) -> serde_json::Value {
    let sentences: Vec<&str> = text
        .split_terminator(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let lead: Vec<String> = sentences
        .iter()
        .take(3)
        .map(|s| format!("{}.", s))
        .collect();
    serde_json::json!({
        "summary": lead.join(" "),
        "sentenceCount": sentences.len(),
    })
}

fn keywords(text: &str) -> serde_json::Value {
    let mut counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for word in text.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if word.len() >= 4 {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(10);
    serde_json::json!({
        "keywords": ranked
            .into_iter()
            .map(|(term, count)| serde_json::json!({ "term": term, "count": count }))
            .collect::<Vec<_>>(),
    })
}

fn statistics(text: &str) -> serde_json::Value {
    let words = text.split_whitespace().count();
    let sentences = text
        .split_terminator(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    serde_json::json!({
        "words": words,
        "sentences": sentences,
        "characters": text.chars().count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(text: &str) -> serde_json::Value {
        serde_json::json!({ "text": text })
    }

    #[test]
    fn test_backlog_pops_high_before_low_fifo_within_tier() {
        let queue = IntelligenceQueue::new();
        let low = queue.add_job(AnalysisKind::Statistics, Priority::Low, data("a"));
        let high_1 = queue.add_job(AnalysisKind::Statistics, Priority::High, data("b"));
        let medium = queue.add_job(AnalysisKind::Statistics, Priority::Medium, data("c"));
        let high_2 = queue.add_job(AnalysisKind::Statistics, Priority::High, data("d"));

        let order: Vec<Uuid> = std::iter::from_fn(|| queue.claim_next().map(|j| j.id)).collect();
        assert_eq!(order, vec![high_1.id, high_2.id, medium.id, low.id]);
    }

    #[test]
    fn test_claim_marks_processing_and_sets_started_at() {
        let queue = IntelligenceQueue::new();
        queue.add_job(AnalysisKind::Summary, Priority::Medium, data("x"));

        let claimed = queue.claim_next().unwrap();
        assert_eq!(claimed.status, IntelligenceStatus::Processing);
        assert!(claimed.started_at.is_some());
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_cancelled_pending_job_is_skipped_on_pop() {
        let queue = IntelligenceQueue::new();
        let first = queue.add_job(AnalysisKind::Keywords, Priority::High, data("a"));
        let second = queue.add_job(AnalysisKind::Keywords, Priority::High, data("b"));

        queue.cancel(first.id).unwrap();
        assert_eq!(queue.claim_next().unwrap().id, second.id);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_cancel_on_terminal_job_is_rejected() {
        let queue = IntelligenceQueue::new();
        let job = queue.add_job(AnalysisKind::Statistics, Priority::Low, data("a"));
        queue.claim_next().unwrap();
        queue.complete(job.id, serde_json::json!({}));

        let err = queue.cancel(job.id).unwrap_err();
        assert_eq!(err.error_type(), "invalid_transition");
    }

    #[test]
    fn test_retry_creates_new_job_and_leaves_original_untouched() {
        let queue = IntelligenceQueue::new();
        let job = queue.add_job(AnalysisKind::Summary, Priority::High, data("doc"));
        queue.claim_next().unwrap();
        queue.fail(job.id, &Error::internal("analysis crashed"));

        let retried = queue.retry(job.id).unwrap();
        assert_ne!(retried.id, job.id);
        assert_eq!(retried.kind, job.kind);
        assert_eq!(retried.priority, job.priority);
        assert_eq!(retried.data, job.data);
        assert_eq!(retried.status, IntelligenceStatus::Pending);

        let original = queue.get(job.id).unwrap();
        assert_eq!(original.status, IntelligenceStatus::Failed);
        assert_eq!(original.error.as_ref().unwrap().kind, "internal_error");
    }

    #[test]
    fn test_retry_of_running_job_is_rejected() {
        let queue = IntelligenceQueue::new();
        let job = queue.add_job(AnalysisKind::Summary, Priority::High, data("doc"));
        assert_eq!(
            queue.retry(job.id).unwrap_err().error_type(),
            "invalid_transition"
        );
    }

    #[test]
    fn test_duration_estimate_composes_multipliers() {
        assert_eq!(
            estimate_duration_ms(AnalysisKind::Summary, Priority::Low),
            6000
        );
        assert_eq!(
            estimate_duration_ms(AnalysisKind::Statistics, Priority::High),
            1600
        );
    }

    #[test]
    fn test_statistics_analysis_counts() {
        let result = statistics("One two three. Four five!");
        assert_eq!(result["words"], 5);
        assert_eq!(result["sentences"], 2);
    }

    #[test]
    fn test_keywords_ranked_by_frequency() {
        let result = keywords("alpha beta alpha gamma alpha beta");
        let top = &result["keywords"][0];
        assert_eq!(top["term"], "alpha");
        assert_eq!(top["count"], 3);
    }

    #[test]
    fn test_missing_text_field_fails_analysis() {
        let queue = IntelligenceQueue::new();
        let job = queue.add_job(
            AnalysisKind::Summary,
            Priority::Medium,
            serde_json::json!({ "blob": 1 }),
        );
        let claimed = queue.claim_next().unwrap();
        assert!(analyze(&claimed).is_err());
        let _ = job;
    }

    #[tokio::test]
    async fn test_worker_processes_jobs_to_completion() {
        let queue = Arc::new(IntelligenceQueue::new());
        let job = queue.add_job(
            AnalysisKind::Statistics,
            Priority::High,
            data("Quick test. Another sentence."),
        );

        let worker = tokio::spawn(queue.clone().run());
        for _ in 0..200 {
            if queue.get(job.id).map(|j| j.status.is_terminal()).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let done = queue.get(job.id).unwrap();
        assert_eq!(done.status, IntelligenceStatus::Completed);
        assert_eq!(done.result.as_ref().unwrap()["words"], 5);

        let snapshot = queue.snapshot(job.id).unwrap();
        assert_eq!(snapshot.progress, 100);
        assert!(snapshot.performance.is_some());
        worker.abort();
    }
}
