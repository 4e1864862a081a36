//! briefwire-digest - Security News Digest Service
//!
//! Ingests cyber-security news per user, enriches and clusters it into
//! stories, generates briefings and period reports, and tracks CVE
//! exposure against each user's tech stack.

use anyhow::Result;
use briefwire_common::config::AppConfig;
use briefwire_digest::services::{
    DigestOrchestrator, EmailNotifier, FeedScraper, Scheduler,
};
use briefwire_digest::services::llm_client::{CompletionService, OpenAiClient};
use briefwire_digest::{build_router, AppState};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting briefwire-digest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    info!("Database: {}", config.db_path.display());

    let db_pool = briefwire_common::db::init_database(&config.db_path).await?;
    info!("Database connection established");

    let scraper = Arc::new(FeedScraper::new()?);

    let llm: Option<Arc<dyn CompletionService>> = match config.openai_api_key.clone() {
        Some(key) => match OpenAiClient::new(key) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "Completion client init failed, AI stages disabled");
                None
            }
        },
        None => None,
    };

    let orchestrator = Arc::new(DigestOrchestrator::new(
        db_pool.clone(),
        scraper.clone(),
        llm,
        config.nvd_api_key.clone(),
    )?);

    let email = match config.resend_api_key.clone() {
        Some(key) => match EmailNotifier::new(key, config.frontend_url.clone()) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!(error = %e, "Email notifier init failed, notifications disabled");
                None
            }
        },
        None => None,
    };

    // Scheduler runs as a background task for the life of the process
    let scheduler = Arc::new(Scheduler::new(
        db_pool.clone(),
        orchestrator.clone(),
        scraper,
        email,
    ));
    tokio::spawn(scheduler.run());
    info!("Scheduler started (hourly tick)");

    let state = AppState::new(db_pool, orchestrator);
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
