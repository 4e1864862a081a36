//! CISA Known Exploited Vulnerabilities catalog
//!
//! Fetched at most once per day per process. The cache lives behind a
//! single async mutex, so the first caller fetches while concurrent
//! callers block on the lock and then read the fresh entry. On fetch
//! failure a stale catalog is served if one exists; otherwise the lookup
//! map is empty and enrichment proceeds without KEV data.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const KEV_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const KEV_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One KEV catalog entry keyed by CVE id
#[derive(Debug, Clone)]
pub struct KevEntry {
    pub date_added: Option<String>,
    pub due_date: Option<String>,
    pub ransomware_use: Option<bool>,
    pub vendor: String,
    pub product: String,
}

#[derive(Debug, Deserialize)]
struct KevFile {
    #[serde(default)]
    vulnerabilities: Vec<KevVulnerability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KevVulnerability {
    #[serde(rename = "cveID")]
    cve_id: String,
    #[serde(default)]
    vendor_project: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    known_ransomware_campaign_use: Option<String>,
}

struct KevState {
    fetched_at: Option<Instant>,
    entries: HashMap<String, KevEntry>,
}

/// Process-wide KEV cache
pub struct KevCatalog {
    client: reqwest::Client,
    state: Mutex<KevState>,
}

impl KevCatalog {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            state: Mutex::new(KevState {
                fetched_at: None,
                entries: HashMap::new(),
            }),
        })
    }

    /// Current KEV lookup map, refreshing when the cache is older than 24 h
    pub async fn lookup_map(&self) -> HashMap<String, KevEntry> {
        let mut state = self.state.lock().await;

        let fresh = state
            .fetched_at
            .map(|at| at.elapsed() < KEV_TTL)
            .unwrap_or(false);
        if fresh {
            return state.entries.clone();
        }

        match self.fetch().await {
            Ok(entries) => {
                tracing::info!(entries = entries.len(), "Refreshed KEV catalog");
                state.fetched_at = Some(Instant::now());
                state.entries = entries;
            }
            Err(e) => {
                // Stale entries (possibly empty) are better than nothing
                tracing::warn!(error = %e, cached = state.entries.len(), "KEV fetch failed, serving cached catalog");
            }
        }

        state.entries.clone()
    }

    async fn fetch(&self) -> anyhow::Result<HashMap<String, KevEntry>> {
        let response = self.client.get(KEV_URL).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("KEV catalog returned HTTP {}", status.as_u16());
        }

        let file: KevFile = response.json().await?;
        Ok(parse_catalog(file))
    }
}

fn parse_catalog(file: KevFile) -> HashMap<String, KevEntry> {
    file.vulnerabilities
        .into_iter()
        .map(|v| {
            (
                v.cve_id.to_uppercase(),
                KevEntry {
                    date_added: v.date_added,
                    due_date: v.due_date,
                    ransomware_use: v
                        .known_ransomware_campaign_use
                        .map(|s| s.eq_ignore_ascii_case("known")),
                    vendor: v.vendor_project,
                    product: v.product,
                },
            )
        })
        .collect()
}
