//! CVE identifier extraction
//!
//! Pure text scan for `CVE-YYYY-NNNN[NNN]` identifiers. Output is
//! upper-cased and de-duplicated while preserving first-seen order.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn cve_pattern() -> &'static Regex {
    static CVE_RE: OnceLock<Regex> = OnceLock::new();
    CVE_RE.get_or_init(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,7}\b").unwrap())
}

/// Extract unique, upper-cased CVE identifiers from free text
pub fn extract_cve_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    cve_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
