//! Translation server binary
//!
//! Run with: cargo run -p docuglot --bin docuglot-server [config.toml]

use docuglot::{config::DocuglotConfig, server::DocuglotServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docuglot=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration (optional TOML path as the first argument)
    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            DocuglotConfig::from_file(&path)?
        }
        None => DocuglotConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Backend: {:?}", config.backend);
    tracing::info!("  - Max file size: {} bytes", config.upload.max_file_size);
    tracing::info!("  - Chunk size: {} bytes", config.upload.chunk_size);
    tracing::info!("  - Storage root: {}", config.storage.root.display());

    let server = DocuglotServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /upload/initialize   - Open an upload session");
    println!("  POST /upload/chunk        - Send one chunk");
    println!("  POST /upload/complete     - Assemble the file");
    println!("  POST /jobs/translate      - Queue a translation job");
    println!("  GET  /jobs/status         - Poll job status");
    println!("  GET  /jobs/stream         - Stream job progress (SSE)");
    println!("  POST /jobs/action         - Cancel or retry a job");
    println!("  POST /jobs/intelligence   - Queue a background analysis");
    println!("  GET  /credits             - Check a balance");
    println!("  POST /credits/deposit     - Add credits");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
