//! Exposure engine
//!
//! Matches article-derived CVEs against a user's declared tech stack via
//! CPE 2.3 identity, classifies each match into an exposure state, and
//! computes remediation metrics. Classification is write-once against
//! human judgment: rows with `auto_classified = 0` are never rewritten by
//! this engine.

use anyhow::Result;
use briefwire_common::db::models::{
    ArticleCve, ExposureState, Period, PeriodSnapshot, TechStackItem, UserCveExposure,
};
use briefwire_common::time::utc_midnight;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::exposures::{self, ExposureRow};
use crate::db::{cves, tech_stack};

/// Parsed CPE 2.3 identity (structural head only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpe {
    pub part: String,
    pub vendor: String,
    pub product: String,
    pub version: String,
}

impl Cpe {
    /// Parse a CPE 2.3 string. Rejects anything whose head is not
    /// `cpe:2.3:<part>:<vendor>:<product>:<version>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.split(':').collect();
        if fields.len() < 6 || fields[0] != "cpe" || fields[1] != "2.3" {
            return None;
        }

        Some(Self {
            part: fields[2].to_string(),
            vendor: fields[3].to_lowercase(),
            product: fields[4].to_lowercase(),
            version: fields[5].to_string(),
        })
    }

    /// Serialize back to a full CPE 2.3 string with wildcard tail
    pub fn to_cpe_string(&self) -> String {
        format!(
            "cpe:2.3:{}:{}:{}:{}:*:*:*:*:*:*:*",
            self.part, self.vendor, self.product, self.version
        )
    }
}

/// Match tier, strongest last so `Ord` picks the best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchLevel {
    Vendor,
    Product,
    Exact,
}

/// Best stack match for one CVE
#[derive(Debug, Clone)]
pub struct StackMatch {
    pub level: MatchLevel,
    pub matched_cpe: String,
    pub item_id: Uuid,
}

/// Match one CPE against one stack item, returning the tier or `None`
/// when not even the vendor lines up
pub fn match_level(cpe: &Cpe, item: &TechStackItem) -> Option<MatchLevel> {
    if cpe.vendor != item.vendor {
        return None;
    }
    if cpe.product != item.product {
        return Some(MatchLevel::Vendor);
    }

    // Vendor and product agree; the version decides exact vs product.
    // A wildcard CPE version never yields an exact match.
    match (&item.version, cpe.version.as_str()) {
        (Some(v), cpe_version) if cpe_version != "*" => {
            if v == cpe_version || v.starts_with(cpe_version) {
                Some(MatchLevel::Exact)
            } else {
                Some(MatchLevel::Product)
            }
        }
        _ => Some(MatchLevel::Product),
    }
}

/// Map a match tier to an exposure state
pub fn classify(level: Option<MatchLevel>) -> ExposureState {
    match level {
        None => ExposureState::NotApplicable,
        Some(MatchLevel::Vendor) => ExposureState::Indirect,
        Some(MatchLevel::Product) | Some(MatchLevel::Exact) => ExposureState::Vulnerable,
    }
}

/// Highest-ranked match across all CPE strings and stack items. Ties keep
/// the first-seen match, so results are stable in input order.
pub fn best_match(cpe_strings: &[String], items: &[TechStackItem]) -> Option<StackMatch> {
    let mut best: Option<StackMatch> = None;

    for raw in cpe_strings {
        let Some(cpe) = Cpe::parse(raw) else {
            continue;
        };
        for item in items {
            if let Some(level) = match_level(&cpe, item) {
                let better = best.as_ref().map(|b| level > b.level).unwrap_or(true);
                if better {
                    best = Some(StackMatch {
                        level,
                        matched_cpe: raw.clone(),
                        item_id: item.id,
                    });
                }
            }
        }
    }

    best
}

/// KEV due dates arrive as `YYYY-MM-DD`; deadlines are midnight UTC
fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// First occurrence of each distinct CVE id, preserving input order
fn distinct_cves(article_cves: &[ArticleCve]) -> Vec<&ArticleCve> {
    let mut seen = HashSet::new();
    article_cves
        .iter()
        .filter(|cve| seen.insert(cve.cve_id.clone()))
        .collect()
}

/// Batch-classify all of a user's article CVEs against their stack.
/// CVEs without CPE data are skipped entirely; CVEs with CPE data but no
/// stack match produce a stack-item-free NOT_APPLICABLE row. That holds
/// for an empty stack too: every CPE-bearing CVE still lands in the
/// ledger as NOT_APPLICABLE.
pub async fn classify_user_cves(
    pool: &SqlitePool,
    user_id: Uuid,
    article_cves: &[ArticleCve],
    now: DateTime<Utc>,
) -> Result<usize> {
    let items = tech_stack::load_active_items(pool, user_id).await?;

    let mut written = 0;

    for cve in distinct_cves(article_cves) {
        if cve.cpe_matches.is_empty() {
            continue;
        }

        let matched = best_match(&cve.cpe_matches, &items);
        let state = classify(matched.as_ref().map(|m| m.level));

        let exposure = UserCveExposure {
            id: Uuid::new_v4(),
            user_id,
            cve_id: cve.cve_id.clone(),
            article_cve_id: Some(cve.id),
            tech_stack_item_id: matched.as_ref().map(|m| m.item_id),
            exposure_state: state,
            auto_classified: true,
            matched_cpe: matched.map(|m| m.matched_cpe),
            first_detected_at: now,
            patched_at: None,
            remediation_deadline: cve.kev_due_date.as_deref().and_then(parse_due_date),
            notes: None,
        };

        exposures::upsert_auto_exposure(pool, &exposure).await?;
        written += 1;
    }

    tracing::debug!(user_id = %user_id, exposures = written, "Exposure classification complete");

    Ok(written)
}

/// Retroactive match when a stack item is created: re-examine the user's
/// known CVEs against the new item. Manual rows are skipped, and only
/// exact/product matches are written retroactively.
pub async fn retroactive_match(
    pool: &SqlitePool,
    user_id: Uuid,
    item: &TechStackItem,
    now: DateTime<Utc>,
) -> Result<usize> {
    let article_cves = cves::load_for_user_matched(pool, user_id).await?;

    let manual: HashSet<String> = exposures::load_exposures(pool, user_id)
        .await?
        .into_iter()
        .filter(|e| !e.auto_classified)
        .map(|e| e.cve_id)
        .collect();

    let items = std::slice::from_ref(item);
    let mut written = 0;

    for cve in distinct_cves(&article_cves) {
        if manual.contains(&cve.cve_id) || cve.cpe_matches.is_empty() {
            continue;
        }

        let Some(matched) = best_match(&cve.cpe_matches, items) else {
            continue;
        };
        if matched.level == MatchLevel::Vendor {
            continue;
        }

        let exposure = UserCveExposure {
            id: Uuid::new_v4(),
            user_id,
            cve_id: cve.cve_id.clone(),
            article_cve_id: Some(cve.id),
            tech_stack_item_id: Some(matched.item_id),
            exposure_state: ExposureState::Vulnerable,
            auto_classified: true,
            matched_cpe: Some(matched.matched_cpe),
            first_detected_at: now,
            patched_at: None,
            remediation_deadline: cve.kev_due_date.as_deref().and_then(parse_due_date),
            notes: None,
        };

        exposures::upsert_auto_exposure(pool, &exposure).await?;
        written += 1;
    }

    tracing::info!(user_id = %user_id, item = %item.product, matches = written, "Retroactive exposure match complete");

    Ok(written)
}

/// Remediation posture over the exposure ledger. All rates and averages
/// are rounded to one decimal.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationMetrics {
    pub total: usize,
    pub vulnerable: usize,
    pub fixed: usize,
    pub not_applicable: usize,
    pub indirect: usize,
    pub patch_rate: f64,
    pub sla_compliance: f64,
    pub mttr_avg_days: f64,
    pub mttr_median_days: f64,
    pub kev_exposed: usize,
    pub kev_overdue: usize,
    pub critical_exposed: usize,
    pub avg_cvss_exposed: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Pure metric computation over joined exposure rows
pub fn compute_metrics(rows: &[ExposureRow], now: DateTime<Utc>) -> RemediationMetrics {
    let count_state = |state: ExposureState| {
        rows.iter()
            .filter(|r| r.exposure.exposure_state == state)
            .count()
    };

    let vulnerable = count_state(ExposureState::Vulnerable);
    let fixed = count_state(ExposureState::Fixed);
    let not_applicable = count_state(ExposureState::NotApplicable);
    let indirect = count_state(ExposureState::Indirect);

    let patch_rate = if vulnerable + fixed > 0 {
        fixed as f64 / (vulnerable + fixed) as f64 * 100.0
    } else {
        0.0
    };

    let fixed_with_deadline: Vec<&ExposureRow> = rows
        .iter()
        .filter(|r| {
            r.exposure.exposure_state == ExposureState::Fixed
                && r.exposure.remediation_deadline.is_some()
        })
        .collect();
    let sla_met = fixed_with_deadline
        .iter()
        .filter(|r| match (r.exposure.patched_at, r.exposure.remediation_deadline) {
            (Some(patched), Some(deadline)) => patched <= deadline,
            _ => false,
        })
        .count();
    let sla_compliance = if fixed_with_deadline.is_empty() {
        100.0
    } else {
        sla_met as f64 / fixed_with_deadline.len() as f64 * 100.0
    };

    let mut remediation_days: Vec<f64> = rows
        .iter()
        .filter(|r| r.exposure.exposure_state == ExposureState::Fixed)
        .filter_map(|r| {
            let patched = r.exposure.patched_at?;
            let days = (patched - r.exposure.first_detected_at).num_seconds() as f64 / 86_400.0;
            Some(days.max(0.0))
        })
        .collect();
    remediation_days.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mttr_avg = if remediation_days.is_empty() {
        0.0
    } else {
        remediation_days.iter().sum::<f64>() / remediation_days.len() as f64
    };
    let mttr_median = if remediation_days.is_empty() {
        0.0
    } else {
        let mid = remediation_days.len() / 2;
        if remediation_days.len() % 2 == 0 {
            (remediation_days[mid - 1] + remediation_days[mid]) / 2.0
        } else {
            remediation_days[mid]
        }
    };

    let vulnerable_rows = || {
        rows.iter()
            .filter(|r| r.exposure.exposure_state == ExposureState::Vulnerable)
    };

    let kev_exposed = vulnerable_rows().filter(|r| r.in_kev).count();
    let kev_overdue = vulnerable_rows()
        .filter(|r| r.in_kev)
        .filter(|r| {
            r.exposure
                .remediation_deadline
                .map(|d| d < now)
                .unwrap_or(false)
        })
        .count();
    let critical_exposed = vulnerable_rows()
        .filter(|r| r.cvss_score.map(|s| s >= 9.0).unwrap_or(false))
        .count();

    let exposed_scores: Vec<f64> = vulnerable_rows().filter_map(|r| r.cvss_score).collect();
    let avg_cvss_exposed = if exposed_scores.is_empty() {
        0.0
    } else {
        exposed_scores.iter().sum::<f64>() / exposed_scores.len() as f64
    };

    RemediationMetrics {
        total: rows.len(),
        vulnerable,
        fixed,
        not_applicable,
        indirect,
        patch_rate: round1(patch_rate),
        sla_compliance: round1(sla_compliance),
        mttr_avg_days: round1(mttr_avg),
        mttr_median_days: round1(mttr_median),
        kev_exposed,
        kev_overdue,
        critical_exposed,
        avg_cvss_exposed: round1(avg_cvss_exposed),
    }
}

/// Load the ledger and compute current metrics
pub async fn remediation_metrics(
    pool: &SqlitePool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<RemediationMetrics> {
    let rows = exposures::load_exposure_rows(pool, user_id).await?;
    Ok(compute_metrics(&rows, now))
}

/// Record today's snapshot and compute deltas against the newest snapshot
/// at or before `now - period`
pub async fn snapshot_and_deltas(
    pool: &SqlitePool,
    user_id: Uuid,
    period: Period,
    metrics: &RemediationMetrics,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let metrics_json = serde_json::to_value(metrics)?;

    exposures::upsert_snapshot(
        pool,
        &PeriodSnapshot {
            user_id,
            period,
            snap_date: utc_midnight(now),
            metrics: metrics_json.clone(),
        },
    )
    .await?;

    let baseline = exposures::load_snapshot_before(
        pool,
        user_id,
        period,
        now - Duration::days(period.days()),
    )
    .await?;

    Ok(match baseline {
        Some(snapshot) => metric_deltas(&metrics_json, &snapshot.metrics),
        None => serde_json::json!({}),
    })
}

/// Numeric field-by-field difference between two metrics blobs
fn metric_deltas(current: &serde_json::Value, previous: &serde_json::Value) -> serde_json::Value {
    let mut deltas = serde_json::Map::new();

    if let (Some(cur), Some(prev)) = (current.as_object(), previous.as_object()) {
        for (key, value) in cur {
            let (Some(c), Some(p)) = (value.as_f64(), prev.get(key).and_then(|v| v.as_f64()))
            else {
                continue;
            };
            if let Some(number) = serde_json::Number::from_f64(round1(c - p)) {
                deltas.insert(key.clone(), serde_json::Value::Number(number));
            }
        }
    }

    serde_json::Value::Object(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(vendor: &str, product: &str, version: Option<&str>) -> TechStackItem {
        TechStackItem::new(
            Uuid::new_v4(),
            vendor,
            product,
            version.map(str::to_string),
            "network",
        )
    }

    #[test]
    fn test_cpe_parse_and_serialize_roundtrip() {
        let raw = "cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*";
        let cpe = Cpe::parse(raw).unwrap();
        assert_eq!(cpe.part, "a");
        assert_eq!(cpe.vendor, "fortinet");
        assert_eq!(cpe.product, "fortios");
        assert_eq!(cpe.version, "7.0.0");
        // Lossless on the six head fields
        assert_eq!(Cpe::parse(&cpe.to_cpe_string()).unwrap(), cpe);
    }

    #[test]
    fn test_cpe_parse_rejects_bad_head() {
        assert!(Cpe::parse("cpe:2.2:a:x:y:1").is_none());
        assert!(Cpe::parse("cpe:2.3:a:x").is_none());
        assert!(Cpe::parse("not-a-cpe").is_none());
    }

    #[test]
    fn test_match_level_tiers() {
        let cpe = Cpe::parse("cpe:2.3:o:fortinet:fortios:7.0.0:*:*:*:*:*:*:*").unwrap();

        let exact = item("fortinet", "fortios", Some("7.0.0"));
        assert_eq!(match_level(&cpe, &exact), Some(MatchLevel::Exact));

        // Version prefix of the item string also counts as exact
        let prefix = Cpe::parse("cpe:2.3:o:fortinet:fortios:7.0:*:*:*:*:*:*:*").unwrap();
        let patched = item("fortinet", "fortios", Some("7.0.12"));
        assert_eq!(match_level(&prefix, &patched), Some(MatchLevel::Exact));

        let other_version = item("fortinet", "fortios", Some("6.4.0"));
        assert_eq!(match_level(&cpe, &other_version), Some(MatchLevel::Product));

        let other_product = item("fortinet", "fortigate", Some("7.0.0"));
        assert_eq!(match_level(&cpe, &other_product), Some(MatchLevel::Vendor));

        let other_vendor = item("cisco", "ios", Some("15.1"));
        assert_eq!(match_level(&cpe, &other_vendor), None);
    }

    #[test]
    fn test_wildcard_version_is_product_tier() {
        let wildcard = Cpe::parse("cpe:2.3:o:fortinet:fortios:*:*:*:*:*:*:*:*").unwrap();
        let concrete = item("fortinet", "fortios", Some("7.0.0"));
        assert_eq!(match_level(&wildcard, &concrete), Some(MatchLevel::Product));
    }

    #[test]
    fn test_classify_states() {
        assert_eq!(classify(None), ExposureState::NotApplicable);
        assert_eq!(classify(Some(MatchLevel::Vendor)), ExposureState::Indirect);
        assert_eq!(classify(Some(MatchLevel::Product)), ExposureState::Vulnerable);
        assert_eq!(classify(Some(MatchLevel::Exact)), ExposureState::Vulnerable);
    }

    #[test]
    fn test_best_match_prefers_strongest() {
        let items = vec![
            item("fortinet", "fortigate", Some("1.0")),
            item("fortinet", "fortios", Some("7.0.0")),
        ];
        let cpes = vec![
            "cpe:2.3:o:fortinet:fortimanager:6.0:*:*:*:*:*:*:*".to_string(),
            "cpe:2.3:o:fortinet:fortios:7.0.0:*:*:*:*:*:*:*".to_string(),
        ];
        let best = best_match(&cpes, &items).unwrap();
        assert_eq!(best.level, MatchLevel::Exact);
        assert_eq!(best.item_id, items[1].id);
    }

    fn exposure_row(
        state: ExposureState,
        detected_day: u32,
        patched_day: Option<u32>,
        deadline_day: Option<u32>,
        cvss: Option<f64>,
        in_kev: bool,
    ) -> ExposureRow {
        let day = |d: u32| Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap();
        ExposureRow {
            exposure: UserCveExposure {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                cve_id: "CVE-2025-0001".to_string(),
                article_cve_id: None,
                tech_stack_item_id: None,
                exposure_state: state,
                auto_classified: true,
                matched_cpe: None,
                first_detected_at: day(detected_day),
                patched_at: patched_day.map(day),
                remediation_deadline: deadline_day.map(day),
                notes: None,
            },
            cvss_score: cvss,
            in_kev,
        }
    }

    #[test]
    fn test_metrics_patch_rate_and_mttr() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 12, 0, 0).unwrap();
        let rows = vec![
            exposure_row(ExposureState::Fixed, 1, Some(5), Some(10), Some(9.8), true),
            exposure_row(ExposureState::Fixed, 1, Some(11), Some(10), Some(7.5), false),
            exposure_row(ExposureState::Vulnerable, 2, None, Some(10), Some(9.1), true),
            exposure_row(ExposureState::NotApplicable, 3, None, None, None, false),
        ];

        let metrics = compute_metrics(&rows, now);
        assert_eq!(metrics.vulnerable, 1);
        assert_eq!(metrics.fixed, 2);
        // 2 fixed / (1 vulnerable + 2 fixed)
        assert_eq!(metrics.patch_rate, 66.7);
        // One of two deadline-bearing fixes landed in time
        assert_eq!(metrics.sla_compliance, 50.0);
        // Remediation took 4 and 10 days
        assert_eq!(metrics.mttr_avg_days, 7.0);
        assert_eq!(metrics.mttr_median_days, 7.0);
        assert_eq!(metrics.kev_exposed, 1);
        assert_eq!(metrics.kev_overdue, 1);
        assert_eq!(metrics.critical_exposed, 1);
        assert_eq!(metrics.avg_cvss_exposed, 9.1);
    }

    #[test]
    fn test_metrics_empty_denominators() {
        let now = Utc::now();
        let metrics = compute_metrics(&[], now);
        assert_eq!(metrics.patch_rate, 0.0);
        assert_eq!(metrics.sla_compliance, 100.0);
        assert_eq!(metrics.mttr_avg_days, 0.0);
    }

    #[test]
    fn test_metric_deltas_numeric_only() {
        let current = serde_json::json!({"vulnerable": 5, "patch_rate": 60.0, "label": "x"});
        let previous = serde_json::json!({"vulnerable": 3, "patch_rate": 50.0});
        let deltas = metric_deltas(&current, &previous);
        assert_eq!(deltas["vulnerable"], 2.0);
        assert_eq!(deltas["patch_rate"], 10.0);
        assert!(deltas.get("label").is_none());
    }
}
