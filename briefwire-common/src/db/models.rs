//! Shared entity models
//!
//! These mirror the database tables created in [`crate::db`]. Closed sets
//! (source type, entity type, exposure state, case type, digest frequency,
//! report period) are enums with a stable textual form used both in the
//! database and on the wire.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source kind: RSS feed or plain website page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    Rss,
    Website,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "RSS",
            SourceType::Website => "WEBSITE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RSS" => Some(SourceType::Rss),
            "WEBSITE" => Some(SourceType::Website),
            _ => None,
        }
    }
}

/// Typed entity categories produced by the extraction stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Company,
    Person,
    Product,
    Geography,
    Sector,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "COMPANY",
            EntityType::Person => "PERSON",
            EntityType::Product => "PRODUCT",
            EntityType::Geography => "GEOGRAPHY",
            EntityType::Sector => "SECTOR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "COMPANY" => Some(EntityType::Company),
            "PERSON" => Some(EntityType::Person),
            "PRODUCT" => Some(EntityType::Product),
            "GEOGRAPHY" => Some(EntityType::Geography),
            "SECTOR" => Some(EntityType::Sector),
            _ => None,
        }
    }
}

/// User's relationship to a CVE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureState {
    Vulnerable,
    Fixed,
    NotApplicable,
    Indirect,
}

impl ExposureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureState::Vulnerable => "VULNERABLE",
            ExposureState::Fixed => "FIXED",
            ExposureState::NotApplicable => "NOT_APPLICABLE",
            ExposureState::Indirect => "INDIRECT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "VULNERABLE" => Some(ExposureState::Vulnerable),
            "FIXED" => Some(ExposureState::Fixed),
            "NOT_APPLICABLE" => Some(ExposureState::NotApplicable),
            "INDIRECT" => Some(ExposureState::Indirect),
            _ => None,
        }
    }
}

/// Severity bucket assigned to a story by the briefing stage
///
/// 1 = actively exploited, 2 = vulnerable with no known exploit,
/// 3 = fixed, 4 = informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseType {
    ActivelyExploited,
    VulnerableNoExploit,
    Fixed,
    Informational,
}

impl CaseType {
    pub fn as_i64(&self) -> i64 {
        match self {
            CaseType::ActivelyExploited => 1,
            CaseType::VulnerableNoExploit => 2,
            CaseType::Fixed => 3,
            CaseType::Informational => 4,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(CaseType::ActivelyExploited),
            2 => Some(CaseType::VulnerableNoExploit),
            3 => Some(CaseType::Fixed),
            4 => Some(CaseType::Informational),
            _ => None,
        }
    }
}

/// How often a user's digest runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestFrequency {
    Hours1,
    Hours3,
    Hours6,
    Hours12,
    Days1,
    Days3,
    Days7,
}

impl DigestFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFrequency::Hours1 => "1h",
            DigestFrequency::Hours3 => "3h",
            DigestFrequency::Hours6 => "6h",
            DigestFrequency::Hours12 => "12h",
            DigestFrequency::Days1 => "1d",
            DigestFrequency::Days3 => "3d",
            DigestFrequency::Days7 => "7d",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1h" => Some(DigestFrequency::Hours1),
            "3h" => Some(DigestFrequency::Hours3),
            "6h" => Some(DigestFrequency::Hours6),
            "12h" => Some(DigestFrequency::Hours12),
            "1d" => Some(DigestFrequency::Days1),
            "3d" => Some(DigestFrequency::Days3),
            "7d" => Some(DigestFrequency::Days7),
            _ => None,
        }
    }

    /// Interval between digest runs
    pub fn interval(&self) -> Duration {
        match self {
            DigestFrequency::Hours1 => Duration::hours(1),
            DigestFrequency::Hours3 => Duration::hours(3),
            DigestFrequency::Hours6 => Duration::hours(6),
            DigestFrequency::Hours12 => Duration::hours(12),
            DigestFrequency::Days1 => Duration::days(1),
            DigestFrequency::Days3 => Duration::days(3),
            DigestFrequency::Days7 => Duration::days(7),
        }
    }
}

/// Report period: rolling 1-day, 7-day, or 30-day window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Daily, Period::Weekly, Period::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "1d",
            Period::Weekly => "7d",
            Period::Monthly => "30d",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1d" => Some(Period::Daily),
            "7d" => Some(Period::Weekly),
            "30d" => Some(Period::Monthly),
            _ => None,
        }
    }

    /// Window length in days
    pub fn days(&self) -> i64 {
        match self {
            Period::Daily => 1,
            Period::Weekly => 7,
            Period::Monthly => 30,
        }
    }
}

/// Digest subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub industry_id: Option<String>,
    /// `None` when the stored value is outside the closed frequency set;
    /// such users are never considered due
    pub digest_frequency: Option<DigestFrequency>,
    /// Preferred delivery hour as "HH:MM" UTC; only the hour is honored
    pub digest_time: String,
    pub last_digest_at: Option<DateTime<Utc>>,
    pub email_enabled: bool,
    pub onboarded: bool,
}

/// A feed subscription belonging to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub name: String,
    pub source_type: SourceType,
    pub active: bool,
}

/// Watch keyword, normalized lowercase, unique per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub user_id: Uuid,
    pub word: String,
}

impl Keyword {
    pub fn new(user_id: Uuid, word: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            word: word.trim().to_lowercase(),
        }
    }
}

/// A scraped article. Articles are cross-user: one row per URL, with
/// `clean_text` and the extraction flags acting as shared caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    /// RSS snippet or page excerpt captured at scrape time
    pub content: String,
    pub clean_text: Option<String>,
    pub raw_html: Option<String>,
    pub external_links: Vec<String>,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub entities_extracted: bool,
    pub cves_extracted: bool,
}

/// Per-user view of an article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserArticle {
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub matched: bool,
    pub matched_keywords: Vec<String>,
    pub news_group_id: Option<Uuid>,
    pub read: bool,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Extracted named entity with confidence in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleEntity {
    pub article_id: Uuid,
    pub entity_type: EntityType,
    pub name: String,
    pub confidence: f64,
}

/// Closed-vocabulary industry phenomenon (e.g. `ransomware`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndustrySignal {
    pub id: Uuid,
    pub industry_id: String,
    pub slug: String,
    pub name: String,
}

/// Article-to-signal classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSignal {
    pub article_id: Uuid,
    pub industry_signal_id: Uuid,
    pub confidence: f64,
}

/// CVE mention enriched from the vulnerability database and KEV catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleCve {
    pub id: Uuid,
    pub article_id: Uuid,
    pub cve_id: String,
    pub cvss_score: Option<f64>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub cpe_matches: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub in_kev: bool,
    /// KEV catalog dates kept in their native YYYY-MM-DD form
    pub kev_date_added: Option<String>,
    pub kev_due_date: Option<String>,
    pub kev_ransomware_use: Option<bool>,
}

/// One product in a user's declared technology inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechStackItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vendor: String,
    pub product: String,
    pub version: Option<String>,
    pub category: String,
    pub cpe_pattern: String,
    pub active: bool,
}

impl TechStackItem {
    /// Create a stack item, normalizing vendor/product and deriving the
    /// CPE search pattern
    pub fn new(
        user_id: Uuid,
        vendor: &str,
        product: &str,
        version: Option<String>,
        category: &str,
    ) -> Self {
        let vendor = normalize_cpe_component(vendor);
        let product = normalize_cpe_component(product);
        let cpe_pattern = generate_cpe_pattern(&vendor, &product);
        Self {
            id: Uuid::new_v4(),
            user_id,
            vendor,
            product,
            version,
            category: category.to_string(),
            cpe_pattern,
            active: true,
        }
    }
}

/// Lowercase and collapse whitespace to underscores, per CPE 2.3 naming
pub fn normalize_cpe_component(raw: &str) -> String {
    raw.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

/// Build the `cpe:2.3:*:<vendor>:<product>` search prefix for a stack item
pub fn generate_cpe_pattern(vendor: &str, product: &str) -> String {
    format!(
        "cpe:2.3:*:{}:{}",
        normalize_cpe_component(vendor),
        normalize_cpe_component(product)
    )
}

/// Exposure ledger row, unique per `(user, cve)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCveExposure {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cve_id: String,
    pub article_cve_id: Option<Uuid>,
    pub tech_stack_item_id: Option<Uuid>,
    pub exposure_state: ExposureState,
    /// False once a human has overridden the state; auto-classification
    /// never touches such rows again
    pub auto_classified: bool,
    pub matched_cpe: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    pub patched_at: Option<DateTime<Utc>>,
    pub remediation_deadline: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// A story: cluster of related articles with its AI briefing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub synopsis: Option<String>,
    pub executive_summary: Option<String>,
    pub impact_analysis: Option<String>,
    pub actionability: Option<String>,
    pub case_type: Option<CaseType>,
    pub confidence: f64,
    pub date: DateTime<Utc>,
}

/// Periodic rollup report, unique per `(user, period)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodReport {
    pub user_id: Uuid,
    pub period: Period,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub summary: Option<String>,
    pub stats: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

/// Daily metrics snapshot used for delta computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    pub user_id: Uuid,
    pub period: Period,
    pub snap_date: DateTime<Utc>,
    pub metrics: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_type_roundtrip() {
        for raw in 1..=4 {
            assert_eq!(CaseType::from_i64(raw).unwrap().as_i64(), raw);
        }
        assert!(CaseType::from_i64(0).is_none());
        assert!(CaseType::from_i64(5).is_none());
    }

    #[test]
    fn test_digest_frequency_intervals() {
        assert_eq!(DigestFrequency::Hours1.interval(), Duration::hours(1));
        assert_eq!(DigestFrequency::Days7.interval(), Duration::days(7));
        assert_eq!(DigestFrequency::parse("3h"), Some(DigestFrequency::Hours3));
        assert_eq!(DigestFrequency::parse("2h"), None);
    }

    #[test]
    fn test_cpe_pattern_normalization() {
        // Case and whitespace variants collapse to the same pattern
        assert_eq!(
            generate_cpe_pattern("Palo Alto", "PAN-OS"),
            generate_cpe_pattern("palo  alto", "pan-os")
        );
        assert_eq!(
            generate_cpe_pattern("Fortinet", "FortiOS"),
            "cpe:2.3:*:fortinet:fortios"
        );
    }

    #[test]
    fn test_keyword_normalized_lowercase() {
        let kw = Keyword::new(Uuid::new_v4(), "  RansomWare ");
        assert_eq!(kw.word, "ransomware");
    }
}
