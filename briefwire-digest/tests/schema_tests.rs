//! Database schema validation
//!
//! Verifies the on-disk initialization path and the unique constraints
//! the pipeline's upserts coordinate through.

mod helpers;

use briefwire_common::db::models::{Keyword, UserArticle};
use briefwire_digest::db::{keywords, user_articles};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_init_creates_all_tables_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("briefwire_test.db");

    let pool = briefwire_common::db::init_database(&db_path).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for expected in [
        "article_cves",
        "article_entities",
        "article_signals",
        "articles",
        "industry_signals",
        "keywords",
        "news_groups",
        "period_reports",
        "period_snapshots",
        "sources",
        "tech_stack_items",
        "user_articles",
        "user_cve_exposures",
        "users",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
    }

    // Re-running initialization is a no-op
    briefwire_common::db::init_tables(&pool).await.unwrap();
}

#[tokio::test]
async fn test_article_url_is_globally_unique() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let first = helpers::seed_matched_article(&pool, user.id, "Story", &["kw"], None)
        .await
        .unwrap();

    // Same URL through find-or-create resolves to the same row
    let mut dup = first.clone();
    dup.id = Uuid::new_v4();
    let resolved = briefwire_digest::db::articles::find_or_create(&pool, &dup)
        .await
        .unwrap();
    assert_eq!(resolved.id, first.id);
}

#[tokio::test]
async fn test_user_article_upsert_absorbs_duplicates() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();
    let article = helpers::seed_matched_article(&pool, user.id, "Story", &["kw"], None)
        .await
        .unwrap();

    // A second upsert for the same pair updates in place
    user_articles::upsert_user_article(
        &pool,
        &UserArticle {
            user_id: user.id,
            article_id: article.id,
            matched: true,
            matched_keywords: vec!["kw".to_string(), "extra".to_string()],
            news_group_id: None,
            read: false,
            sent: false,
            sent_at: None,
        },
    )
    .await
    .unwrap();

    let links = user_articles::load_ungrouped_matched(&pool, user.id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].matched_keywords, vec!["kw", "extra"]);
}

#[tokio::test]
async fn test_keyword_unique_per_user() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    keywords::save_keyword(&pool, &Keyword::new(user.id, "Ransomware")).await.unwrap();
    keywords::save_keyword(&pool, &Keyword::new(user.id, "ransomware")).await.unwrap();

    let stored = keywords::load_keywords(&pool, user.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].word, "ransomware");
}
