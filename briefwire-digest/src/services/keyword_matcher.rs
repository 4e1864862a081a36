//! Keyword matcher
//!
//! Pure, order-independent matching of article text against a user's watch
//! keywords. Each keyword becomes a case-insensitive word-boundary pattern
//! with regex metacharacters escaped, so `c++` or `log4j (cve)` match
//! literally.

use regex::Regex;

/// Match outcome for one article
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub matched_keywords: Vec<String>,
}

/// Compiled keyword set, built once per user per run
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    /// Compile word-boundary patterns for the given keywords. Keywords
    /// that fail to compile are skipped with a warning.
    pub fn new(keywords: &[String]) -> Self {
        let patterns = keywords
            .iter()
            .filter(|kw| !kw.trim().is_empty())
            .filter_map(|kw| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(kw.trim()));
                match Regex::new(&pattern) {
                    Ok(re) => Some((kw.trim().to_string(), re)),
                    Err(e) => {
                        tracing::warn!(keyword = %kw, error = %e, "Skipping uncompilable keyword");
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    /// Match an article's title and content. An empty keyword set matches
    /// nothing.
    pub fn match_text(&self, title: &str, content: &str) -> MatchResult {
        if self.patterns.is_empty() {
            return MatchResult::default();
        }

        let haystack = format!("{} {}", title, content);
        let matched_keywords: Vec<String> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(&haystack))
            .map(|(kw, _)| kw.clone())
            .collect();

        MatchResult {
            matched: !matched_keywords.is_empty(),
            matched_keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundary_matching() {
        let matcher = KeywordMatcher::new(&["ransomware".to_string()]);
        let hit = matcher.match_text("LockBit ransomware hits X", "");
        assert!(hit.matched);
        assert_eq!(hit.matched_keywords, vec!["ransomware"]);

        // Substring inside a larger word is not a match
        let miss = matcher.match_text("antiransomwaretool released", "");
        assert!(!miss.matched);
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = KeywordMatcher::new(&["fortinet".to_string()]);
        assert!(matcher.match_text("FORTINET patches FortiOS", "").matched);
    }

    #[test]
    fn test_metacharacters_escaped() {
        let matcher = KeywordMatcher::new(&["c++".to_string(), "log4j (cve)".to_string()]);
        let result = matcher.match_text("memory bugs in c++ code", "details on log4j (cve)");
        assert_eq!(result.matched_keywords.len(), 2);
    }

    #[test]
    fn test_empty_keyword_list_matches_nothing() {
        let matcher = KeywordMatcher::new(&[]);
        assert!(!matcher.match_text("ransomware everywhere", "breach").matched);
    }

    #[test]
    fn test_content_searched_alongside_title() {
        let matcher = KeywordMatcher::new(&["zero-day".to_string()]);
        let result = matcher.match_text("Vendor update", "fixes an exploited zero-day");
        assert!(result.matched);
    }
}
