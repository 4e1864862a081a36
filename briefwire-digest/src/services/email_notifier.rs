//! Digest notification emails
//!
//! Thin Resend client used by the scheduler when a run produced matches
//! for a user with email enabled. Built only when a key is configured;
//! absence just skips notifications.

use anyhow::{anyhow, Result};
use briefwire_common::db::models::User;
use serde::Serialize;
use std::time::Duration;

use crate::services::digest_orchestrator::RunSummary;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const FROM_ADDRESS: &str = "Briefwire <briefs@briefwire.io>";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    html: String,
}

/// Resend-backed notifier
pub struct EmailNotifier {
    client: reqwest::Client,
    api_key: String,
    frontend_url: Option<String>,
}

impl EmailNotifier {
    pub fn new(api_key: String, frontend_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key,
            frontend_url,
        })
    }

    /// Notify a user that their digest has fresh stories
    pub async fn send_digest_ready(&self, user: &User, summary: &RunSummary) -> Result<()> {
        let subject = format!(
            "Your security digest: {} new matched article{}",
            summary.matched,
            if summary.matched == 1 { "" } else { "s" }
        );

        let link = self
            .frontend_url
            .as_deref()
            .map(|base| format!("{}/feed", base.trim_end_matches('/')))
            .unwrap_or_default();

        let html = format!(
            "<p>Your latest digest matched {} article{} across your sources.</p>{}",
            summary.matched,
            if summary.matched == 1 { "" } else { "s" },
            if link.is_empty() {
                String::new()
            } else {
                format!("<p><a href=\"{}\">Read your briefing</a></p>", link)
            }
        );

        let request = SendRequest {
            from: FROM_ADDRESS,
            to: vec![user.email.as_str()],
            subject,
            html,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Resend API error {}: {}", status.as_u16(), error_text));
        }

        tracing::info!(user_id = %user.id, matched = summary.matched, "Digest notification sent");

        Ok(())
    }
}
