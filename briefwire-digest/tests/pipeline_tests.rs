//! Digest pipeline integration tests over a seeded database
//!
//! Scrape/content/enrichment stages are exercised through their own unit
//! tests; these tests drive the persisted stages (cluster, brief,
//! reports) end-to-end through the orchestrator with scripted
//! completions and no network.

mod helpers;

use briefwire_common::db::models::{EntityType, Period};
use briefwire_digest::db::{news_groups, reports, user_articles};
use briefwire_digest::services::llm_client::testing::ScriptedCompletions;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

#[tokio::test]
async fn test_empty_user_produces_empty_summary() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();
    let orchestrator = helpers::create_test_orchestrator(pool.clone(), None);

    let summary = orchestrator.run_digest(&user).await;

    assert_eq!(summary.scraped, 0);
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.summarized, 0);
    assert!(summary.errors.is_empty(), "errors: {:?}", summary.errors);
}

#[tokio::test]
async fn test_cluster_brief_and_report_stages() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let published = Some(Utc::now() - chrono::Duration::hours(2));

    // Three articles about the same vendor, two unrelated ones
    let mut fortinet_ids = Vec::new();
    for title in ["FortiOS flaw exploited", "Fortinet ships patch", "FortiOS fallout widens"] {
        let article =
            helpers::seed_matched_article(&pool, user.id, title, &["fortios"], published)
                .await
                .unwrap();
        helpers::seed_entity(&pool, article.id, EntityType::Company, "Fortinet")
            .await
            .unwrap();
        fortinet_ids.push(article.id);
    }
    for (title, entity) in [("Retail breach disclosed", "Acme Retail"), ("Phishing wave hits banks", "MailCo")] {
        let article = helpers::seed_matched_article(&pool, user.id, title, &[entity], published)
            .await
            .unwrap();
        helpers::seed_entity(&pool, article.id, EntityType::Company, entity)
            .await
            .unwrap();
    }

    // Three briefings (one per story), then three report summaries
    let llm = Arc::new(ScriptedCompletions::new(vec![
        helpers::briefing_json("Briefed Story", 1),
        helpers::briefing_json("Briefed Story", 1),
        helpers::briefing_json("Briefed Story", 1),
        "Daily summary.".to_string(),
        "Weekly summary.".to_string(),
        "Monthly summary.".to_string(),
    ]));

    let orchestrator = helpers::create_test_orchestrator(pool.clone(), Some(llm.clone()));
    let run_start = Utc::now();
    let summary = orchestrator.run_digest(&user).await;

    assert_eq!(summary.summarized, 3, "errors: {:?}", summary.errors);
    assert!(summary.errors.is_empty(), "errors: {:?}", summary.errors);

    // The Fortinet articles clustered into one story of three
    let briefs = news_groups::list_briefs(&pool, user.id).await.unwrap();
    assert_eq!(briefs.len(), 3);

    let mut sizes = Vec::new();
    for brief in &briefs {
        let ids = user_articles::article_ids_for_group(&pool, brief.id).await.unwrap();
        sizes.push(ids.len());
        // Every story got its briefing applied
        assert_eq!(brief.title, "Briefed Story");
        assert!(brief.case_type.is_some());
        assert!(brief.synopsis.is_some());
    }
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 1, 3]);

    // Reports were generated for every period, fresh and with stats
    for period in Period::ALL {
        let report = reports::load_report(&pool, user.id, period)
            .await
            .unwrap()
            .expect("report row");
        assert!(report.generated_at >= run_start - chrono::Duration::seconds(1));
        assert!(report.summary.is_some());
        assert_eq!(report.stats["story_totals"]["total"], 3);
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent_and_skips_enrichment_calls() {
    let pool = helpers::create_test_db().await.unwrap();
    let industry = "finance";
    let user = helpers::seed_user(&pool, Some(industry)).await.unwrap();
    helpers::seed_signal(&pool, industry, "ransomware").await.unwrap();

    let published = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    // Old publish date keeps the article outside every report window, so
    // report summaries never consume completions in this test
    let article = helpers::seed_matched_article(
        &pool,
        user.id,
        "LockBit ransomware hits X",
        &["ransomware"],
        published,
    )
    .await
    .unwrap();
    assert!(article.entities_extracted);

    let llm = Arc::new(ScriptedCompletions::new(vec![helpers::briefing_json(
        "LockBit story",
        1,
    )]));
    let orchestrator = helpers::create_test_orchestrator(pool.clone(), Some(llm.clone()));

    let first = orchestrator.run_digest(&user).await;
    assert_eq!(first.summarized, 1, "errors: {:?}", first.errors);
    // Single-article story: one briefing call, no entity calls
    // (entities_extracted was already set)
    assert_eq!(llm.call_count(), 1);

    let briefs_after_first = news_groups::list_briefs(&pool, user.id).await.unwrap();
    assert_eq!(briefs_after_first.len(), 1);
    assert_eq!(briefs_after_first[0].confidence, 0.5);

    // Second run over the same state: nothing regroups, no new calls
    let second = orchestrator.run_digest(&user).await;
    assert_eq!(second.summarized, 0);
    assert!(second.errors.is_empty(), "errors: {:?}", second.errors);
    assert_eq!(llm.call_count(), 1);

    let briefs_after_second = news_groups::list_briefs(&pool, user.id).await.unwrap();
    assert_eq!(briefs_after_second.len(), 1);
    assert_eq!(briefs_after_second[0].id, briefs_after_first[0].id);
}
