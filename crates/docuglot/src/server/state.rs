//! Application state for the translation server

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{DocuglotConfig, TranslatorBackend};
use crate::credits::{CreditLedger, PricingTable};
use crate::error::Result;
use crate::jobs::intelligence::IntelligenceQueue;
use crate::jobs::stream::JobLookup;
use crate::jobs::translation::JobRegistry;
use crate::jobs::worker::TranslationWorker;
use crate::jobs::JobSnapshot;
use crate::providers::blob_store::{BlobStore, FsBlobStore};
use crate::providers::translator::{EchoTranslator, HttpTranslator, Translator};
use crate::upload::UploadSessionStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: DocuglotConfig,
    /// Credit ledger
    ledger: Arc<CreditLedger>,
    /// Cost table derived from config
    pricing: PricingTable,
    /// Upload session registry
    sessions: Arc<UploadSessionStore>,
    /// Translation job registry
    registry: Arc<JobRegistry>,
    /// Background analysis queue
    intelligence: Arc<IntelligenceQueue>,
    /// Blob storage
    blobs: Arc<dyn BlobStore>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create the application state and spawn the background workers
    pub async fn new(config: DocuglotConfig) -> Result<Self> {
        tracing::info!(
            "Initializing application state (backend: {:?})...",
            config.backend
        );

        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.root.clone())?);
        tracing::info!("Blob store initialized ({})", blobs.name());

        let translator: Arc<dyn Translator> = match config.backend {
            TranslatorBackend::Echo => Arc::new(EchoTranslator),
            TranslatorBackend::Http => Arc::new(HttpTranslator::new(&config.translator)),
        };
        tracing::info!("Translator initialized ({})", translator.name());

        let ledger = Arc::new(CreditLedger::new());
        let pricing = PricingTable::new(&config.pricing);

        let sessions = Arc::new(UploadSessionStore::new(
            blobs.clone(),
            config.upload.clone(),
        ));

        let (registry, receiver) = JobRegistry::new(
            ledger.clone(),
            pricing.clone(),
            config.processing.queue_capacity,
        );
        let registry = Arc::new(registry);
        tokio::spawn(
            TranslationWorker::new(
                registry.clone(),
                translator.clone(),
                blobs.clone(),
                config.processing.clone(),
            )
            .run(receiver),
        );

        let intelligence = Arc::new(IntelligenceQueue::new());
        tokio::spawn(intelligence.clone().run());

        // Hourly sweep of abandoned upload sessions
        let sweep_sessions = sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            interval.tick().await;
            loop {
                interval.tick().await;
                let expired = sweep_sessions.expire_stale().await;
                if expired > 0 {
                    tracing::info!("Expired {} stale upload sessions", expired);
                }
            }
        });

        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                ledger,
                pricing,
                sessions,
                registry,
                intelligence,
                blobs,
                ready: RwLock::new(true),
            }),
        };
        tracing::info!("Application state ready");
        Ok(state)
    }

    pub fn config(&self) -> &DocuglotConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.inner.ledger
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.inner.pricing
    }

    pub fn sessions(&self) -> &Arc<UploadSessionStore> {
        &self.inner.sessions
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn intelligence(&self) -> &Arc<IntelligenceQueue> {
        &self.inner.intelligence
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }

    /// Status lookup spanning both job pipelines
    pub fn job_lookup(&self) -> Arc<dyn JobLookup> {
        Arc::new(CombinedLookup {
            registry: self.inner.registry.clone(),
            intelligence: self.inner.intelligence.clone(),
        })
    }
}

/// Tries the translation registry first, then the intelligence queue
struct CombinedLookup {
    registry: Arc<JobRegistry>,
    intelligence: Arc<IntelligenceQueue>,
}

impl JobLookup for CombinedLookup {
    fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.registry
            .snapshot(job_id)
            .or_else(|| self.intelligence.snapshot(job_id))
    }
}
