//! Background translation worker
//!
//! Drains the registry's queue one job at a time: load the source blob,
//! split it into segments, translate segment by segment with progress
//! updates, store the output. Any error (including the per-job timeout)
//! routes through `JobRegistry::fail`, so the reservation is always
//! refunded on the failure path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::error::{Error, Result};
use crate::providers::blob_store::BlobStore;
use crate::providers::translator::{TranslateOptions, Translator};

use super::translation::{JobRegistry, JobStatus, TranslationJob};

pub struct TranslationWorker {
    registry: Arc<JobRegistry>,
    translator: Arc<dyn Translator>,
    blobs: Arc<dyn BlobStore>,
    config: ProcessingConfig,
}

impl TranslationWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        translator: Arc<dyn Translator>,
        blobs: Arc<dyn BlobStore>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            registry,
            translator,
            blobs,
            config,
        }
    }

    /// Drain the queue until the sending side is dropped
    pub async fn run(self, mut receiver: mpsc::Receiver<Uuid>) {
        tracing::info!(
            "Translation worker started (provider: {})",
            self.translator.name()
        );

        while let Some(job_id) = receiver.recv().await {
            let timeout = Duration::from_secs(self.config.job_timeout_secs);
            match tokio::time::timeout(timeout, self.process(job_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.registry.fail(job_id, &e),
                Err(_) => self.registry.fail(
                    job_id,
                    &Error::translator(format!(
                        "Job exceeded the {}s processing limit",
                        self.config.job_timeout_secs
                    )),
                ),
            }
        }

        tracing::info!("Translation worker stopped");
    }

    async fn process(&self, job_id: Uuid) -> Result<()> {
        let job = match self.registry.start(job_id) {
            Ok(job) => job,
            // A job cancelled while still queued is not claimable; skip it
            Err(Error::InvalidTransition { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Processing job {}: {} -> {}",
            job.id,
            job.spec.source_lang,
            job.spec.target_lang
        );

        let bytes = self.blobs.get(&job.spec.input_ref).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let segments = split_segments(&text, self.config.segment_chars);
        if segments.is_empty() {
            return Err(Error::validation("Document contains no translatable text"));
        }

        let opts = TranslateOptions {
            source_lang: job.spec.source_lang.clone(),
            target_lang: job.spec.target_lang.clone(),
            service: job.spec.service,
        };

        let mut translated = Vec::with_capacity(segments.len());
        let total = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            if self.is_cancelled(&job) {
                tracing::info!("Job {} cancelled mid-translation", job.id);
                return Ok(());
            }
            translated.push(self.translator.translate(segment, &opts).await?);
            self.registry.segment_translated(job.id, i + 1, total);
        }

        let output_ref = format!("outputs/{}.txt", job.id);
        self.blobs
            .put(&output_ref, translated.join("\n\n").as_bytes())
            .await?;

        self.registry.complete(job.id, output_ref)?;
        Ok(())
    }

    fn is_cancelled(&self, job: &TranslationJob) -> bool {
        self.registry
            .get(job.id)
            .map(|j| j.status == JobStatus::Cancelled)
            .unwrap_or(true)
    }
}

/// Split text into translation segments on paragraph boundaries, packing
/// consecutive paragraphs up to `max_chars` per segment. A single paragraph
/// longer than the limit becomes its own segment.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + 2 + paragraph.len() > max_chars {
            segments.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        if current.len() >= max_chars {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::{CreditLedger, OwnerRef, PricingTable};
    use crate::jobs::translation::JobSpec;
    use crate::providers::blob_store::FsBlobStore;
    use crate::providers::translator::{EchoTranslator, TranslationService};
    use async_trait::async_trait;

    struct FailingTranslator;

    #[async_trait]
    impl Translator for FailingTranslator {
        async fn translate(&self, _text: &str, _opts: &TranslateOptions) -> Result<String> {
            Err(Error::translator("provider unavailable"))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn owner() -> OwnerRef {
        OwnerRef::from("user-1")
    }

    async fn setup(
        translator: Arc<dyn Translator>,
        input: &str,
    ) -> (Arc<JobRegistry>, Arc<dyn BlobStore>, TranslationJob, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()).unwrap());
        blobs.put("files/input", input.as_bytes()).await.unwrap();

        let ledger = Arc::new(CreditLedger::new());
        ledger.deposit(&owner(), 500, "topup");
        let (registry, receiver) = JobRegistry::new(ledger, PricingTable::default(), 16);
        let registry = Arc::new(registry);

        let job = registry
            .submit(JobSpec {
                owner: owner(),
                file_id: Uuid::new_v4(),
                input_ref: "files/input".to_string(),
                word_count: 1000,
                source_lang: "en".to_string(),
                target_lang: "vi".to_string(),
                service: TranslationService::GoogleTranslate,
            })
            .await
            .unwrap();

        let worker = TranslationWorker::new(
            registry.clone(),
            translator,
            blobs.clone(),
            ProcessingConfig {
                segment_chars: 40,
                ..ProcessingConfig::default()
            },
        );
        tokio::spawn(worker.run(receiver));

        (registry, blobs, job, dir)
    }

    async fn wait_terminal(registry: &JobRegistry, job_id: Uuid) -> TranslationJob {
        for _ in 0..200 {
            if let Some(job) = registry.get(job_id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_pipeline_translates_and_stores_output() {
        let input = "First paragraph of the report.\n\nSecond paragraph, somewhat longer than the first one.\n\nThird.";
        let (registry, blobs, job, _dir) = setup(Arc::new(EchoTranslator), input).await;

        let done = wait_terminal(&registry, job.id).await;
        assert_eq!(done.status, JobStatus::Translated);
        assert_eq!(done.progress, 100);

        let output_ref = done.output_ref.unwrap();
        let out = String::from_utf8(blobs.get(&output_ref).await.unwrap()).unwrap();
        assert!(out.contains("[en->vi]"));
        assert!(out.contains("First paragraph"));
        assert!(out.contains("Third"));
        // Finalized on completion
        assert_eq!(registry.ledger().balance(&owner()), 440);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_job_and_refunds() {
        let (registry, _blobs, job, _dir) =
            setup(Arc::new(FailingTranslator), "Some text to translate.").await;

        let done = wait_terminal(&registry, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_ref().unwrap().kind, "translator_error");
        // Refunded: net zero against the pre-reservation balance
        assert_eq!(registry.ledger().balance(&owner()), 500);
    }

    #[tokio::test]
    async fn test_missing_input_blob_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()).unwrap());
        let ledger = Arc::new(CreditLedger::new());
        ledger.deposit(&owner(), 500, "topup");
        let (registry, receiver) = JobRegistry::new(ledger, PricingTable::default(), 16);
        let registry = Arc::new(registry);

        let job = registry
            .submit(JobSpec {
                owner: owner(),
                file_id: Uuid::new_v4(),
                input_ref: "files/never-written".to_string(),
                word_count: 100,
                source_lang: "en".to_string(),
                target_lang: "fr".to_string(),
                service: TranslationService::LlmEnhanced,
            })
            .await
            .unwrap();

        tokio::spawn(
            TranslationWorker::new(
                registry.clone(),
                Arc::new(EchoTranslator),
                blobs,
                ProcessingConfig::default(),
            )
            .run(receiver),
        );

        let done = wait_terminal(&registry, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_ref().unwrap().kind, "storage_error");
        assert_eq!(registry.ledger().balance(&owner()), 500);
    }

    #[test]
    fn test_split_packs_paragraphs_up_to_limit() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        // Two short paragraphs fit together, the third spills over
        let segments = split_segments(text, 12);
        assert_eq!(segments, vec!["aaaa\n\nbbbb", "cccc"]);
    }

    #[test]
    fn test_split_keeps_oversized_paragraph_whole() {
        let long = "x".repeat(100);
        let segments = split_segments(&format!("{}\n\nshort", long), 40);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], long);
        assert_eq!(segments[1], "short");
    }

    #[test]
    fn test_split_drops_blank_paragraphs() {
        assert!(split_segments("\n\n  \n\n", 100).is_empty());
        assert_eq!(split_segments("only one", 100), vec!["only one"]);
    }
}
