//! Translation provider boundary
//!
//! Implementations:
//! - `HttpTranslator`: remote translation service over HTTP
//! - `EchoTranslator`: deterministic local provider for development and tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TranslatorConfig;
use crate::error::{Error, Result};

/// Translation service tier (distinct credit rates per tier)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TranslationService {
    /// Machine translation
    GoogleTranslate,
    /// LLM-enhanced translation
    LlmEnhanced,
}

/// Options passed with every translate call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub service: TranslationService,
}

/// Trait for text translation
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate a segment of text
    async fn translate(&self, text: &str, opts: &TranslateOptions) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// HTTP-backed translation provider
pub struct HttpTranslator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    model: &'a str,
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
    service: TranslationService,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

impl HttpTranslator {
    /// Create a new HTTP translator from config
    pub fn new(config: &TranslatorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }
    }

    async fn translate_once(&self, text: &str, opts: &TranslateOptions) -> Result<String> {
        let request = TranslateRequest {
            model: &self.model,
            text,
            source_lang: &opts.source_lang,
            target_lang: &opts.target_lang,
            service: opts.service,
        };

        let response = self
            .client
            .post(format!("{}/api/translate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::translator(format!(
                "Provider returned {}: {}",
                status, body
            )));
        }

        let parsed: TranslateResponse = response.json().await?;
        Ok(parsed.translated_text)
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, opts: &TranslateOptions) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.translate_once(text, opts).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    tracing::warn!(
                        "Translate attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::translator("No attempts made")))
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await;
        Ok(matches!(response, Ok(r) if r.status().is_success()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Deterministic local provider: tags each segment with the language pair.
/// Used as the default backend so the pipeline runs without a remote service.
pub struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(&self, text: &str, opts: &TranslateOptions) -> Result<String> {
        Ok(format!(
            "[{}->{}] {}",
            opts.source_lang, opts.target_lang, text
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "echo"
    }
}
