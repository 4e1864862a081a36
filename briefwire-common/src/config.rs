//! Configuration resolution for briefwire services
//!
//! All configuration comes from the environment. Required values have
//! defaults suitable for local development; optional API keys degrade the
//! corresponding capability when absent (the service starts regardless and
//! logs what was skipped).

use std::path::PathBuf;
use tracing::{info, warn};

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database path (`BRIEFWIRE_DB`, default `briefwire.db`)
    pub db_path: PathBuf,
    /// HTTP listen port (`BRIEFWIRE_PORT`, default 5860)
    pub port: u16,
    /// OpenAI API key; entity extraction, briefings, and report summaries
    /// are skipped without it
    pub openai_api_key: Option<String>,
    /// NVD API key; enrichment still works without it at the anonymous
    /// rate-limit tier
    pub nvd_api_key: Option<String>,
    /// Resend API key; digest notification emails are skipped without it
    pub resend_api_key: Option<String>,
    /// Frontend base URL used in notification links
    pub frontend_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Self {
        let db_path = std::env::var("BRIEFWIRE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("briefwire.db"));

        let port = std::env::var("BRIEFWIRE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5860);

        let openai_api_key = non_empty_env("OPENAI_API_KEY");
        if openai_api_key.is_none() {
            warn!("OPENAI_API_KEY not set - entity extraction, briefings, and report summaries disabled");
        }

        let nvd_api_key = non_empty_env("NVD_API_KEY");
        if nvd_api_key.is_none() {
            info!("NVD_API_KEY not set - using anonymous NVD rate limits (5 requests / 30s)");
        }

        let resend_api_key = non_empty_env("RESEND_API_KEY");
        if resend_api_key.is_none() {
            info!("RESEND_API_KEY not set - digest notification emails disabled");
        }

        let frontend_url = non_empty_env("FRONTEND_URL");

        Self {
            db_path,
            port,
            openai_api_key,
            nvd_api_key,
            resend_api_key,
            frontend_url,
        }
    }
}

/// Read an environment variable, treating empty or whitespace-only values
/// as absent
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
