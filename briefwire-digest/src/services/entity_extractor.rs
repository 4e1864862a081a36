//! Entity and industry-signal extraction
//!
//! One JSON-mode completion call covers up to five articles. The response
//! is filtered before anything is persisted: low-confidence entities and
//! signals are dropped, and signal slugs outside the user's industry
//! catalog are discarded so the model cannot invent taxonomy.

use anyhow::Result;
use briefwire_common::db::models::{ArticleEntity, ArticleSignal, EntityType};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::db::{articles, entities};
use crate::services::llm_client::{CompletionRequest, CompletionService};

/// Articles per completion call
pub const ENTITY_BATCH_SIZE: usize = 5;
/// Entities below this confidence are dropped
const ENTITY_CONFIDENCE_FLOOR: f64 = 0.3;
/// Signals below this confidence are dropped
const SIGNAL_CONFIDENCE_FLOOR: f64 = 0.5;
/// Per-article text budget inside the prompt
const PER_ARTICLE_TEXT_CAP: usize = 4_000;
const EXTRACTION_MAX_TOKENS: u32 = 2_000;

/// One article's worth of input text
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub article_id: Uuid,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedConfidence {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlugConfidence {
    pub slug: String,
    pub confidence: f64,
}

/// Filtered extraction result for one article
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedEntities {
    pub companies: Vec<NamedConfidence>,
    pub people: Vec<NamedConfidence>,
    pub products: Vec<NamedConfidence>,
    pub geographies: Vec<NamedConfidence>,
    pub sectors: Vec<NamedConfidence>,
    pub signals: Vec<SlugConfidence>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    articles: HashMap<String, ExtractedEntities>,
}

fn extraction_system_prompt(allowed_slugs: &[String]) -> String {
    format!(
        "You are a cyber-security intelligence analyst. For each article you are given, \
         extract named entities and classify industry signals.\n\
         Respond with a JSON object of the form:\n\
         {{\"articles\": {{\"<article_id>\": {{\
         \"companies\": [{{\"name\": \"...\", \"confidence\": 0.0}}], \
         \"people\": [...], \"products\": [...], \"geographies\": [...], \"sectors\": [...], \
         \"signals\": [{{\"slug\": \"...\", \"confidence\": 0.0}}]}}}}}}\n\
         Confidence is a number between 0 and 1. \
         Signal slugs MUST come from this closed list, anything else will be discarded: {}",
        allowed_slugs.join(", ")
    )
}

fn batch_user_prompt(batch: &[ExtractionInput]) -> String {
    batch
        .iter()
        .map(|input| {
            let text: String = input.text.chars().take(PER_ARTICLE_TEXT_CAP).collect();
            format!(
                "ARTICLE {}\nTITLE: {}\nTEXT: {}\n",
                input.article_id, input.title, text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Drop low-confidence entries and out-of-catalog signal slugs
pub fn filter_response(
    mut extracted: ExtractedEntities,
    allowed_slugs: &HashSet<String>,
) -> ExtractedEntities {
    let keep_entity = |list: &mut Vec<NamedConfidence>| {
        list.retain(|e| e.confidence >= ENTITY_CONFIDENCE_FLOOR && !e.name.trim().is_empty());
    };

    keep_entity(&mut extracted.companies);
    keep_entity(&mut extracted.people);
    keep_entity(&mut extracted.products);
    keep_entity(&mut extracted.geographies);
    keep_entity(&mut extracted.sectors);

    extracted
        .signals
        .retain(|s| s.confidence >= SIGNAL_CONFIDENCE_FLOOR && allowed_slugs.contains(&s.slug));

    extracted
}

/// Run one batched extraction call and return the filtered per-article map
pub async fn extract_batch(
    llm: &dyn CompletionService,
    batch: &[ExtractionInput],
    allowed_slugs: &[String],
) -> Result<HashMap<Uuid, ExtractedEntities>> {
    let allowed: HashSet<String> = allowed_slugs.iter().cloned().collect();

    let request = CompletionRequest::new(
        extraction_system_prompt(allowed_slugs),
        batch_user_prompt(batch),
    )
    .json()
    .max_tokens(EXTRACTION_MAX_TOKENS);

    let raw = llm.complete(request).await?;
    let parsed: BatchResponse = serde_json::from_str(&raw)?;

    let mut result = HashMap::new();
    for (key, extracted) in parsed.articles {
        let Ok(article_id) = Uuid::parse_str(&key) else {
            tracing::warn!(key = %key, "Extraction response keyed by unknown article id");
            continue;
        };
        result.insert(article_id, filter_response(extracted, &allowed));
    }

    Ok(result)
}

/// Persist one article's filtered extraction and flip its flag
pub async fn persist_extraction(
    pool: &SqlitePool,
    article_id: Uuid,
    extracted: &ExtractedEntities,
    signal_ids_by_slug: &HashMap<String, Uuid>,
) -> Result<()> {
    let rows: Vec<ArticleEntity> = [
        (EntityType::Company, &extracted.companies),
        (EntityType::Person, &extracted.people),
        (EntityType::Product, &extracted.products),
        (EntityType::Geography, &extracted.geographies),
        (EntityType::Sector, &extracted.sectors),
    ]
    .into_iter()
    .flat_map(|(entity_type, list)| {
        list.iter().map(move |e| ArticleEntity {
            article_id,
            entity_type,
            name: e.name.clone(),
            confidence: e.confidence,
        })
    })
    .collect();

    entities::insert_entities_skip_duplicates(pool, &rows).await?;

    for signal in &extracted.signals {
        if let Some(signal_id) = signal_ids_by_slug.get(&signal.slug) {
            entities::upsert_article_signal(
                pool,
                &ArticleSignal {
                    article_id,
                    industry_signal_id: *signal_id,
                    confidence: signal.confidence,
                },
            )
            .await?;
        }
    }

    articles::set_entities_extracted(pool, article_id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> HashSet<String> {
        ["ransomware", "data-breach", "vulnerability"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_filter_drops_low_confidence_entities() {
        let extracted = ExtractedEntities {
            companies: vec![
                NamedConfidence { name: "Fortinet".into(), confidence: 0.9 },
                NamedConfidence { name: "Maybe Corp".into(), confidence: 0.2 },
            ],
            ..Default::default()
        };
        let filtered = filter_response(extracted, &allowed());
        assert_eq!(filtered.companies.len(), 1);
        assert_eq!(filtered.companies[0].name, "Fortinet");
    }

    #[test]
    fn test_filter_drops_low_confidence_and_invented_signals() {
        let extracted = ExtractedEntities {
            signals: vec![
                SlugConfidence { slug: "ransomware".into(), confidence: 0.8 },
                SlugConfidence { slug: "ransomware".into(), confidence: 0.4 },
                SlugConfidence { slug: "alien-invasion".into(), confidence: 0.99 },
            ],
            ..Default::default()
        };
        let filtered = filter_response(extracted, &allowed());
        assert_eq!(filtered.signals.len(), 1);
        assert_eq!(filtered.signals[0].slug, "ransomware");
    }

    #[test]
    fn test_entity_floor_is_inclusive() {
        let extracted = ExtractedEntities {
            products: vec![NamedConfidence { name: "FortiOS".into(), confidence: 0.3 }],
            signals: vec![SlugConfidence { slug: "vulnerability".into(), confidence: 0.5 }],
            ..Default::default()
        };
        let filtered = filter_response(extracted, &allowed());
        assert_eq!(filtered.products.len(), 1);
        assert_eq!(filtered.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_extract_batch_parses_keyed_response() {
        use crate::services::llm_client::testing::ScriptedCompletions;

        let article_id = Uuid::new_v4();
        let response = serde_json::json!({
            "articles": {
                (article_id.to_string()): {
                    "companies": [{"name": "Fortinet", "confidence": 0.95}],
                    "signals": [
                        {"slug": "vulnerability", "confidence": 0.9},
                        {"slug": "made-up", "confidence": 0.9}
                    ]
                },
                "not-a-uuid": {"companies": [{"name": "Ghost", "confidence": 0.9}]}
            }
        });
        let llm = ScriptedCompletions::new(vec![response.to_string()]);

        let batch = vec![ExtractionInput {
            article_id,
            title: "FortiOS bug".into(),
            text: "details".into(),
        }];
        let slugs = vec!["vulnerability".to_string()];

        let result = extract_batch(&llm, &batch, &slugs).await.unwrap();
        assert_eq!(result.len(), 1);
        let entry = &result[&article_id];
        assert_eq!(entry.companies[0].name, "Fortinet");
        assert_eq!(entry.signals.len(), 1);
    }
}
