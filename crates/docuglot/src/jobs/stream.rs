//! Progress streaming gateway
//!
//! `subscribe` turns a job's status into a pull-based event stream: one
//! `connection` greeting, then a `progress` event per tick while the job is
//! non-terminal, then exactly one terminal event (`complete` or `error`)
//! before the stream ends. Because the ticking lives inside the stream
//! itself, dropping the consumer cancels everything; there is no detached
//! timer to leak.

use chrono::Utc;
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::JobSnapshot;

/// Status source the gateway reads from; both job pipelines implement it
pub trait JobLookup: Send + Sync {
    fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot>;
}

/// One event on the progress channel
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Connected { job_id: Uuid },
    Progress(JobSnapshot),
    Complete(JobSnapshot),
    Error { job_id: Uuid, kind: String, message: String },
}

impl ProgressEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connection",
            Self::Progress(_) => "progress",
            Self::Complete(_) => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// JSON payload; every event carries `jobId` and `timestamp`
    pub fn payload(&self) -> serde_json::Value {
        let mut value = match self {
            Self::Connected { job_id } => serde_json::json!({
                "jobId": job_id,
                "message": "Connected to job stream",
            }),
            Self::Progress(snapshot) | Self::Complete(snapshot) => {
                serde_json::to_value(snapshot).unwrap_or_default()
            }
            Self::Error {
                job_id,
                kind,
                message,
            } => serde_json::json!({
                "jobId": job_id,
                "error": { "kind": kind, "message": message },
            }),
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        value
    }

    fn terminal(snapshot: JobSnapshot) -> Self {
        match snapshot.error {
            Some(error) => Self::Error {
                job_id: snapshot.job_id,
                kind: error.kind,
                message: error.message,
            },
            None => Self::Complete(snapshot),
        }
    }
}

enum Phase {
    Greet,
    Tick(tokio::time::Interval),
    Done,
}

/// Open a progress stream for a job. Fails up front with `JobNotFound` if
/// the job does not exist; a job vanishing mid-stream surfaces as a terminal
/// `error` event instead.
pub fn subscribe(
    lookup: Arc<dyn JobLookup>,
    job_id: Uuid,
    tick: Duration,
) -> Result<impl Stream<Item = ProgressEvent>> {
    if lookup.snapshot(job_id).is_none() {
        return Err(Error::JobNotFound(job_id));
    }

    Ok(stream::unfold(Phase::Greet, move |phase| {
        let lookup = lookup.clone();
        async move {
            match phase {
                Phase::Greet => {
                    let interval = tokio::time::interval(tick.max(Duration::from_millis(1)));
                    Some((ProgressEvent::Connected { job_id }, Phase::Tick(interval)))
                }
                Phase::Tick(mut interval) => {
                    interval.tick().await;
                    match lookup.snapshot(job_id) {
                        None => Some((
                            ProgressEvent::Error {
                                job_id,
                                kind: "streaming_error".to_string(),
                                message: "Job disappeared while streaming".to_string(),
                            },
                            Phase::Done,
                        )),
                        Some(snapshot) if snapshot.terminal => {
                            Some((ProgressEvent::terminal(snapshot), Phase::Done))
                        }
                        Some(snapshot) => {
                            Some((ProgressEvent::Progress(snapshot), Phase::Tick(interval)))
                        }
                    }
                }
                Phase::Done => None,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLookup {
        snapshots: DashMap<Uuid, JobSnapshot>,
        lookups: AtomicUsize,
    }

    impl FakeLookup {
        fn new() -> Self {
            Self {
                snapshots: DashMap::new(),
                lookups: AtomicUsize::new(0),
            }
        }

        fn set(&self, snapshot: JobSnapshot) {
            self.snapshots.insert(snapshot.job_id, snapshot);
        }
    }

    impl JobLookup for FakeLookup {
        fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.snapshots.get(&job_id).map(|s| s.clone())
        }
    }

    fn snapshot(job_id: Uuid, status: &str, progress: u8, terminal: bool) -> JobSnapshot {
        JobSnapshot {
            job_id,
            status: status.to_string(),
            progress,
            result: None,
            error: None,
            performance: None,
            terminal,
        }
    }

    #[tokio::test]
    async fn test_unknown_job_fails_before_any_event() {
        let lookup = Arc::new(FakeLookup::new());
        let err = match subscribe(lookup, Uuid::new_v4(), Duration::from_millis(5)) {
            Err(err) => err,
            Ok(_) => panic!("expected subscribe to fail for unknown job"),
        };
        assert_eq!(err.error_type(), "job_not_found");
    }

    #[tokio::test]
    async fn test_connection_then_progress_then_terminal_then_end() {
        let job_id = Uuid::new_v4();
        let lookup = Arc::new(FakeLookup::new());
        lookup.set(snapshot(job_id, "translating", 40, false));

        let mut stream = Box::pin(
            subscribe(lookup.clone(), job_id, Duration::from_millis(5)).unwrap(),
        );

        let first = stream.next().await.unwrap();
        assert_eq!(first.name(), "connection");
        assert_eq!(first.payload()["jobId"], job_id.to_string());

        let second = stream.next().await.unwrap();
        assert_eq!(second.name(), "progress");
        assert_eq!(second.payload()["progress"], 40);

        let mut done = snapshot(job_id, "translated", 100, true);
        done.result = Some(serde_json::json!({ "outputRef": "outputs/x" }));
        lookup.set(done);

        // Skip any progress ticks that raced the update
        let terminal = loop {
            let event = stream.next().await.unwrap();
            if event.name() != "progress" {
                break event;
            }
        };
        assert_eq!(terminal.name(), "complete");
        assert_eq!(terminal.payload()["result"]["outputRef"], "outputs/x");

        // Exactly one terminal event, then the stream ends
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_yields_error_event() {
        let job_id = Uuid::new_v4();
        let lookup = Arc::new(FakeLookup::new());
        let mut failed = snapshot(job_id, "failed", 30, true);
        failed.error = Some(crate::jobs::JobError {
            kind: "translator_error".to_string(),
            message: "provider unavailable".to_string(),
        });
        lookup.set(failed);

        let mut stream =
            Box::pin(subscribe(lookup, job_id, Duration::from_millis(5)).unwrap());

        assert_eq!(stream.next().await.unwrap().name(), "connection");
        let terminal = stream.next().await.unwrap();
        assert_eq!(terminal.name(), "error");
        assert_eq!(terminal.payload()["error"]["kind"], "translator_error");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_the_stream_stops_lookups() {
        let job_id = Uuid::new_v4();
        let lookup = Arc::new(FakeLookup::new());
        lookup.set(snapshot(job_id, "translating", 10, false));

        let mut stream = Box::pin(
            subscribe(lookup.clone(), job_id, Duration::from_millis(5)).unwrap(),
        );
        stream.next().await.unwrap();
        stream.next().await.unwrap();
        drop(stream);

        let after_drop = lookup.lookups.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // No detached timer keeps polling once the consumer is gone
        assert_eq!(lookup.lookups.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn test_job_vanishing_mid_stream_closes_with_error() {
        let job_id = Uuid::new_v4();
        let lookup = Arc::new(FakeLookup::new());
        lookup.set(snapshot(job_id, "translating", 10, false));

        let mut stream = Box::pin(
            subscribe(lookup.clone(), job_id, Duration::from_millis(5)).unwrap(),
        );
        assert_eq!(stream.next().await.unwrap().name(), "connection");
        assert_eq!(stream.next().await.unwrap().name(), "progress");

        lookup.snapshots.remove(&job_id);
        let terminal = loop {
            let event = stream.next().await.unwrap();
            if event.name() != "progress" {
                break event;
            }
        };
        assert_eq!(terminal.name(), "error");
        assert!(stream.next().await.is_none());
    }
}
