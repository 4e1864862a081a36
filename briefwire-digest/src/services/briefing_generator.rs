//! Story briefing generator
//!
//! One JSON-mode completion call per story. The response must carry a
//! non-empty title and synopsis or the story keeps its clusterer-derived
//! fields; a missing or out-of-range case type degrades to informational
//! rather than failing the briefing.

use anyhow::{anyhow, Result};
use briefwire_common::db::models::CaseType;
use serde::Deserialize;

use crate::services::llm_client::{CompletionRequest, CompletionService};

/// Joined article text budget per briefing call
const MAX_JOINED_CHARS: usize = 20_000;
const BRIEFING_MAX_TOKENS: u32 = 1_500;

const BRIEFING_SYSTEM_PROMPT: &str = "\
You are a senior cyber-threat intelligence analyst writing a briefing about one security story \
composed of one or more related articles.\n\
Respond with a JSON object with exactly these fields:\n\
{\"title\": string, \"synopsis\": string, \"executiveSummary\": string, \
\"impactAnalysis\": string, \"actionability\": string, \"caseType\": number}\n\
caseType is 1 when the issue is actively exploited in the wild, 2 when systems are vulnerable \
but no exploitation is known, 3 when fixes are available and the story is about remediation, \
and 4 for purely informational coverage.\n\
The synopsis is 2-3 sentences. The executive summary, impact analysis, and actionability \
sections are each a short paragraph aimed at security leadership.";

/// A complete, validated briefing
#[derive(Debug, Clone)]
pub struct Briefing {
    pub title: String,
    pub synopsis: String,
    pub executive_summary: String,
    pub impact_analysis: String,
    pub actionability: String,
    pub case_type: CaseType,
}

#[derive(Debug, Deserialize)]
struct RawBriefing {
    #[serde(default)]
    title: String,
    #[serde(default)]
    synopsis: String,
    #[serde(default, rename = "executiveSummary")]
    executive_summary: String,
    #[serde(default, rename = "impactAnalysis")]
    impact_analysis: String,
    #[serde(default)]
    actionability: String,
    #[serde(default, rename = "caseType")]
    case_type: Option<i64>,
}

/// Parse and validate a briefing response. Empty title or synopsis is a
/// failure; a bad case type is not.
pub fn parse_briefing(raw: &str) -> Result<Briefing> {
    let parsed: RawBriefing = serde_json::from_str(raw)?;

    if parsed.title.trim().is_empty() || parsed.synopsis.trim().is_empty() {
        return Err(anyhow!("briefing missing title or synopsis"));
    }

    let case_type = parsed
        .case_type
        .and_then(CaseType::from_i64)
        .unwrap_or(CaseType::Informational);

    Ok(Briefing {
        title: parsed.title.trim().to_string(),
        synopsis: parsed.synopsis.trim().to_string(),
        executive_summary: parsed.executive_summary.trim().to_string(),
        impact_analysis: parsed.impact_analysis.trim().to_string(),
        actionability: parsed.actionability.trim().to_string(),
        case_type,
    })
}

/// Join article texts under the prompt budget. When the combined length
/// exceeds the cap every article is truncated to an equal share.
pub fn join_article_texts(texts: &[String]) -> String {
    if texts.is_empty() {
        return String::new();
    }

    let total: usize = texts.iter().map(|t| t.chars().count()).sum();
    let parts: Vec<String> = if total <= MAX_JOINED_CHARS {
        texts.to_vec()
    } else {
        let share = MAX_JOINED_CHARS / texts.len();
        texts
            .iter()
            .map(|t| t.chars().take(share).collect())
            .collect()
    };

    parts.join("\n\n---\n\n")
}

/// Generate a briefing for one story from its articles' best-available
/// text
pub async fn generate_briefing(
    llm: &dyn CompletionService,
    article_texts: &[String],
) -> Result<Briefing> {
    let request = CompletionRequest::new(BRIEFING_SYSTEM_PROMPT, join_article_texts(article_texts))
        .json()
        .max_tokens(BRIEFING_MAX_TOKENS);

    let raw = llm.complete(request).await?;
    parse_briefing(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_briefing() {
        let raw = serde_json::json!({
            "title": "PAN-OS exploitation wave",
            "synopsis": "Active exploitation of CVE-2024-3400.",
            "executiveSummary": "Summary.",
            "impactAnalysis": "Impact.",
            "actionability": "Patch now.",
            "caseType": 1
        })
        .to_string();

        let briefing = parse_briefing(&raw).unwrap();
        assert_eq!(briefing.title, "PAN-OS exploitation wave");
        assert_eq!(briefing.case_type, CaseType::ActivelyExploited);
    }

    #[test]
    fn test_empty_title_or_synopsis_fails() {
        let no_title = serde_json::json!({"title": " ", "synopsis": "x", "caseType": 2}).to_string();
        assert!(parse_briefing(&no_title).is_err());

        let no_synopsis = serde_json::json!({"title": "x", "synopsis": "", "caseType": 2}).to_string();
        assert!(parse_briefing(&no_synopsis).is_err());
    }

    #[test]
    fn test_bad_case_type_defaults_to_informational() {
        for case_type in [serde_json::json!(9), serde_json::json!(0), serde_json::Value::Null] {
            let raw = serde_json::json!({
                "title": "t", "synopsis": "s", "caseType": case_type
            })
            .to_string();
            assert_eq!(parse_briefing(&raw).unwrap().case_type, CaseType::Informational);
        }
    }

    #[test]
    fn test_join_under_budget_keeps_full_text() {
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let joined = join_article_texts(&texts);
        assert!(joined.contains("alpha") && joined.contains("beta"));
    }

    #[test]
    fn test_join_over_budget_equal_shares() {
        let texts = vec!["a".repeat(30_000), "b".repeat(30_000)];
        let joined = join_article_texts(&texts);
        // Each article is cut to an equal share of the budget
        let a_count = joined.chars().filter(|c| *c == 'a').count();
        let b_count = joined.chars().filter(|c| *c == 'b').count();
        assert_eq!(a_count, 10_000);
        assert_eq!(b_count, 10_000);
    }
}
