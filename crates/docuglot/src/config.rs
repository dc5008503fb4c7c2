//! Configuration for the translation pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocuglotConfig {
    /// Translator backend (echo or http)
    #[serde(default)]
    pub backend: TranslatorBackend,
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload protocol configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Credit pricing configuration
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Translation provider configuration
    #[serde(default)]
    pub translator: TranslatorConfig,
    /// Job processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl DocuglotConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Upload protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum file size in bytes (default: 1 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Chunk size in bytes (default: 5 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Chunks uploaded concurrently per batch (default: 3)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Allowed file extensions
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Stale upload sessions are discarded after this many seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}
fn default_chunk_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}
fn default_batch_size() -> usize {
    3
}
fn default_allowed_types() -> Vec<String> {
    ["pdf", "docx", "doc", "txt", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_session_ttl() -> u64 {
    24 * 60 * 60 // 24 hours
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
            allowed_types: default_allowed_types(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

/// Credit pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Words per billable page
    #[serde(default = "default_words_per_page")]
    pub words_per_page: u64,
    /// Credits per page for machine translation
    #[serde(default = "default_machine_rate")]
    pub machine_rate: i64,
    /// Credits per page for LLM-enhanced translation
    #[serde(default = "default_llm_rate")]
    pub llm_rate: i64,
}

fn default_words_per_page() -> u64 {
    500
}
fn default_machine_rate() -> i64 {
    30
}
fn default_llm_rate() -> i64 {
    80
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            words_per_page: default_words_per_page(),
            machine_rate: default_machine_rate(),
            llm_rate: default_llm_rate(),
        }
    }
}

/// Translation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Provider base URL
    pub base_url: String,
    /// Model name sent to the provider
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "translate-v2".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Job processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Timeout for a single translation job in seconds
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    /// Progress stream tick interval in milliseconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
    /// Maximum characters per translation segment
    #[serde(default = "default_segment_chars")]
    pub segment_chars: usize,
    /// Job channel capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_job_timeout() -> u64 {
    600 // 10 minutes
}
fn default_progress_interval() -> u64 {
    1000
}
fn default_segment_chars() -> usize {
    2000
}
fn default_queue_capacity() -> usize {
    1000
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout(),
            progress_interval_ms: default_progress_interval(),
            segment_chars: default_segment_chars(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for staged chunks, stored files, and outputs
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("docuglot");
        Self { root }
    }
}

/// Translator backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorBackend {
    /// Deterministic local provider (development and tests)
    #[default]
    Echo,
    /// HTTP translation provider
    Http,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constraints() {
        let config = UploadConfig::default();
        assert_eq!(config.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.batch_size, 3);
        assert!(config.allowed_types.contains(&"pdf".to_string()));
        assert!(config.allowed_types.contains(&"md".to_string()));
    }

    #[test]
    fn test_config_parses_partial_toml() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9090
            enable_cors = false

            [upload]
            chunk_size = 1048576
        "#;
        let config: DocuglotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.upload.chunk_size, 1048576);
        // Unspecified fields fall back to defaults
        assert_eq!(config.upload.batch_size, 3);
        assert_eq!(config.pricing.words_per_page, 500);
    }
}
