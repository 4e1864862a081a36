//! Shared test utilities
#![allow(dead_code)]

use anyhow::Result;
use briefwire_common::db::models::{
    Article, ArticleEntity, DigestFrequency, EntityType, IndustrySignal, User, UserArticle,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use briefwire_digest::db::{articles, entities, user_articles, users};
use briefwire_digest::services::llm_client::CompletionService;
use briefwire_digest::services::{DigestOrchestrator, FeedScraper};

/// In-memory database with the full schema applied
pub async fn create_test_db() -> Result<SqlitePool> {
    Ok(briefwire_common::db::init_memory_database().await?)
}

/// Orchestrator wired for tests: no NVD key, caller-provided completions
pub fn create_test_orchestrator(
    pool: SqlitePool,
    llm: Option<Arc<dyn CompletionService>>,
) -> DigestOrchestrator {
    let scraper = Arc::new(FeedScraper::new().expect("scraper"));
    DigestOrchestrator::new(pool, scraper, llm, None).expect("orchestrator")
}

/// Seed a user with a given industry
pub async fn seed_user(pool: &SqlitePool, industry_id: Option<&str>) -> Result<User> {
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", Uuid::new_v4()),
        industry_id: industry_id.map(str::to_string),
        digest_frequency: Some(DigestFrequency::Days1),
        digest_time: "08:00".to_string(),
        last_digest_at: None,
        email_enabled: false,
        onboarded: true,
    };
    users::save_user(pool, &user).await?;
    Ok(user)
}

/// Seed an industry signal and return it
pub async fn seed_signal(pool: &SqlitePool, industry_id: &str, slug: &str) -> Result<IndustrySignal> {
    let signal = IndustrySignal {
        id: Uuid::new_v4(),
        industry_id: industry_id.to_string(),
        slug: slug.to_string(),
        name: slug.replace('-', " "),
    };
    entities::save_industry_signal(pool, &signal).await?;
    Ok(signal)
}

/// Seed a matched article (with its user link) ready for clustering
pub async fn seed_matched_article(
    pool: &SqlitePool,
    user_id: Uuid,
    title: &str,
    keywords: &[&str],
    published_at: Option<DateTime<Utc>>,
) -> Result<Article> {
    let article = Article {
        id: Uuid::new_v4(),
        source_id: Uuid::new_v4(),
        url: format!("https://news.example.com/{}", Uuid::new_v4()),
        title: title.to_string(),
        content: format!("{title} content"),
        clean_text: Some(format!("{title} clean text")),
        raw_html: None,
        external_links: Vec::new(),
        author: None,
        guid: None,
        published_at,
        // Marked complete so pipeline runs skip the enrichment calls
        entities_extracted: true,
        cves_extracted: true,
    };

    let stored = articles::find_or_create(pool, &article).await?;
    user_articles::upsert_user_article(
        pool,
        &UserArticle {
            user_id,
            article_id: stored.id,
            matched: true,
            matched_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            news_group_id: None,
            read: false,
            sent: false,
            sent_at: None,
        },
    )
    .await?;

    Ok(stored)
}

/// Attach an entity row to an article
pub async fn seed_entity(
    pool: &SqlitePool,
    article_id: Uuid,
    entity_type: EntityType,
    name: &str,
) -> Result<()> {
    entities::insert_entities_skip_duplicates(
        pool,
        &[ArticleEntity {
            article_id,
            entity_type,
            name: name.to_string(),
            confidence: 0.9,
        }],
    )
    .await?;
    Ok(())
}

/// A well-formed briefing response for scripted completions
pub fn briefing_json(title: &str, case_type: i64) -> String {
    serde_json::json!({
        "title": title,
        "synopsis": format!("{title} synopsis"),
        "executiveSummary": "Executive summary.",
        "impactAnalysis": "Impact analysis.",
        "actionability": "Actionability.",
        "caseType": case_type
    })
    .to_string()
}
