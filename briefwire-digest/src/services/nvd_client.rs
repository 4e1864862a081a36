//! NVD vulnerability database client
//!
//! One lookup per CVE id through a sliding-window rate limiter. The window
//! is 30 seconds with capacity 50 when an API key is configured and 5
//! without one; a caller that would exceed capacity sleeps until the
//! oldest call ages out of the window (plus a small safety margin).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const RATE_WINDOW: Duration = Duration::from_secs(30);
const CAPACITY_WITH_KEY: usize = 50;
const CAPACITY_ANONYMOUS: usize = 5;
const WAIT_SAFETY_MARGIN: Duration = Duration::from_millis(100);
/// Descriptions longer than this are truncated before persistence
const MAX_DESCRIPTION_CHARS: usize = 2_000;

/// NVD client errors
#[derive(Debug, Error)]
pub enum NvdError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Enrichment data for one CVE
#[derive(Debug, Clone)]
pub struct CveRecord {
    pub cve_id: String,
    pub cvss_score: Option<f64>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub cpe_matches: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
}

/// Sliding-window rate limiter over completed call start times
pub struct SlidingWindowLimiter {
    window: Duration,
    capacity: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            window,
            capacity,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a slot is available in the window, then claim it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();

                while let Some(front) = timestamps.front() {
                    if now.duration_since(*front) >= self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                if timestamps.len() < self.capacity {
                    timestamps.push_back(now);
                    return;
                }

                // Oldest call must age out before a slot frees up
                let oldest = *timestamps.front().expect("non-empty at capacity");
                self.window - now.duration_since(oldest) + WAIT_SAFETY_MARGIN
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "NVD rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    configurations: Vec<NvdConfiguration>,
}

#[derive(Debug, Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdMetrics {
    #[serde(default)]
    cvss_metric_v31: Vec<NvdCvssMetric>,
    #[serde(default)]
    cvss_metric_v30: Vec<NvdCvssMetric>,
    #[serde(default)]
    cvss_metric_v2: Vec<NvdCvssMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssMetric {
    cvss_data: NvdCvssData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssData {
    base_score: f64,
    #[serde(default)]
    base_severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdConfiguration {
    #[serde(default)]
    nodes: Vec<NvdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdNode {
    #[serde(default)]
    cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Deserialize)]
struct NvdCpeMatch {
    criteria: String,
}

impl NvdResponse {
    /// Reduce the raw response to the fields the pipeline persists
    fn into_record(self, cve_id: &str) -> Option<CveRecord> {
        let cve = self.vulnerabilities.into_iter().next()?.cve;

        // CVSS selection order: v3.1, then v3.0, then v2
        let (cvss_score, severity) = if let Some(m) = cve.metrics.cvss_metric_v31.first() {
            (Some(m.cvss_data.base_score), m.cvss_data.base_severity.clone())
        } else if let Some(m) = cve.metrics.cvss_metric_v30.first() {
            (Some(m.cvss_data.base_score), m.cvss_data.base_severity.clone())
        } else if let Some(m) = cve.metrics.cvss_metric_v2.first() {
            (Some(m.cvss_data.base_score), None)
        } else {
            (None, None)
        };

        let description = cve
            .descriptions
            .iter()
            .find(|d| d.lang == "en")
            .map(|d| d.value.chars().take(MAX_DESCRIPTION_CHARS).collect());

        let cpe_matches = cve
            .configurations
            .into_iter()
            .flat_map(|c| c.nodes)
            .flat_map(|n| n.cpe_match)
            .map(|m| m.criteria)
            .collect();

        Some(CveRecord {
            cve_id: cve_id.to_string(),
            cvss_score,
            severity,
            description,
            cpe_matches,
            published_date: cve.published.as_deref().and_then(parse_nvd_timestamp),
        })
    }
}

/// NVD timestamps come as `2024-04-12T08:15:07.430` without an offset
fn parse_nvd_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Rate-limited NVD lookup client
pub struct NvdClient {
    client: reqwest::Client,
    api_key: Option<String>,
    limiter: SlidingWindowLimiter,
}

impl NvdClient {
    pub fn new(api_key: Option<String>) -> Result<Self, NvdError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NvdError::Network(e.to_string()))?;

        let capacity = if api_key.is_some() {
            CAPACITY_WITH_KEY
        } else {
            CAPACITY_ANONYMOUS
        };

        Ok(Self {
            client,
            api_key,
            limiter: SlidingWindowLimiter::new(capacity, RATE_WINDOW),
        })
    }

    /// Look up one CVE. Returns `Ok(None)` when NVD has no record for the
    /// id (the row is persisted unenriched and not retried this run).
    pub async fn fetch_cve(&self, cve_id: &str) -> Result<Option<CveRecord>, NvdError> {
        self.limiter.acquire().await;

        let mut request = self.client.get(NVD_API_URL).query(&[("cveId", cve_id)]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NvdError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(NvdError::Api(status.as_u16(), error_text));
        }

        let parsed: NvdResponse = response
            .json()
            .await
            .map_err(|e| NvdError::Parse(e.to_string()))?;

        Ok(parsed.into_record(cve_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limiter_allows_burst_within_capacity() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(30));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_limiter_blocks_over_capacity() {
        // Short window so the test observes one full wait cycle
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(300));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    fn sample_response() -> NvdResponse {
        serde_json::from_value(serde_json::json!({
            "vulnerabilities": [{
                "cve": {
                    "id": "CVE-2024-3400",
                    "published": "2024-04-12T08:15:07.430",
                    "descriptions": [
                        {"lang": "es", "value": "descripcion"},
                        {"lang": "en", "value": "A command injection vulnerability in PAN-OS."}
                    ],
                    "metrics": {
                        "cvssMetricV31": [{"cvssData": {"baseScore": 10.0, "baseSeverity": "CRITICAL"}}],
                        "cvssMetricV2": [{"cvssData": {"baseScore": 9.3}}]
                    },
                    "configurations": [{
                        "nodes": [
                            {"cpeMatch": [{"criteria": "cpe:2.3:o:paloaltonetworks:pan-os:11.0.0:*:*:*:*:*:*:*", "vulnerable": true}]},
                            {"cpeMatch": [{"criteria": "cpe:2.3:o:paloaltonetworks:pan-os:11.1.0:*:*:*:*:*:*:*", "vulnerable": true}]}
                        ]
                    }]
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_prefers_v31_and_english() {
        let record = sample_response().into_record("CVE-2024-3400").unwrap();
        assert_eq!(record.cvss_score, Some(10.0));
        assert_eq!(record.severity.as_deref(), Some("CRITICAL"));
        assert!(record.description.unwrap().starts_with("A command injection"));
        assert_eq!(record.cpe_matches.len(), 2);
        assert!(record.published_date.is_some());
    }

    #[test]
    fn test_parse_falls_back_to_v2_without_severity() {
        let response: NvdResponse = serde_json::from_value(serde_json::json!({
            "vulnerabilities": [{
                "cve": {
                    "id": "CVE-2015-0001",
                    "descriptions": [{"lang": "en", "value": "old bug"}],
                    "metrics": {"cvssMetricV2": [{"cvssData": {"baseScore": 4.3}}]}
                }
            }]
        }))
        .unwrap();
        let record = response.into_record("CVE-2015-0001").unwrap();
        assert_eq!(record.cvss_score, Some(4.3));
        assert!(record.severity.is_none());
    }

    #[test]
    fn test_parse_empty_response_is_none() {
        let response: NvdResponse = serde_json::from_value(serde_json::json!({"vulnerabilities": []})).unwrap();
        assert!(response.into_record("CVE-2024-0000").is_none());
    }

    #[test]
    fn test_nvd_timestamp_formats() {
        assert!(parse_nvd_timestamp("2024-04-12T08:15:07.430").is_some());
        assert!(parse_nvd_timestamp("2024-04-12T08:15:07+00:00").is_some());
        assert!(parse_nvd_timestamp("yesterday").is_none());
    }
}
