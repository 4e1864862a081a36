//! Exposure engine integration tests: classification, manual-override
//! fixpoint, retroactive matching, metrics persistence

mod helpers;

use briefwire_common::db::models::{ArticleCve, ExposureState, TechStackItem};
use briefwire_digest::db::{cves, exposures, tech_stack};
use briefwire_digest::services::exposure_engine;
use chrono::Utc;
use uuid::Uuid;

async fn seed_article_cve(
    pool: &sqlx::SqlitePool,
    article_id: Uuid,
    cve_id: &str,
    cpes: &[&str],
) -> ArticleCve {
    let cve = ArticleCve {
        id: Uuid::new_v4(),
        article_id,
        cve_id: cve_id.to_string(),
        cvss_score: Some(9.8),
        severity: Some("CRITICAL".to_string()),
        description: Some("test vulnerability".to_string()),
        cpe_matches: cpes.iter().map(|c| c.to_string()).collect(),
        published_date: None,
        in_kev: true,
        kev_date_added: Some("2025-06-01".to_string()),
        kev_due_date: Some("2025-06-22".to_string()),
        kev_ransomware_use: Some(true),
    };
    cves::upsert_article_cve(pool, &cve).await.unwrap();
    cve
}

#[tokio::test]
async fn test_exact_cpe_match_classifies_vulnerable() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "FortiOS exploited", &["fortios"], None)
        .await
        .unwrap();
    let cve = seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-1111",
        &["cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*"],
    )
    .await;

    let item = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.0".into()), "network");
    tech_stack::save_item(&pool, &item).await.unwrap();

    let written = exposure_engine::classify_user_cves(&pool, user.id, &[cve], Utc::now())
        .await
        .unwrap();
    assert_eq!(written, 1);

    let exposure = exposures::load_exposure(&pool, user.id, "CVE-2025-1111")
        .await
        .unwrap()
        .expect("exposure row");
    assert_eq!(exposure.exposure_state, ExposureState::Vulnerable);
    assert!(exposure.auto_classified);
    assert_eq!(
        exposure.matched_cpe.as_deref(),
        Some("cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*")
    );
    assert_eq!(exposure.tech_stack_item_id, Some(item.id));
    // KEV due date became the remediation deadline
    assert!(exposure.remediation_deadline.is_some());
}

#[tokio::test]
async fn test_no_stack_match_yields_not_applicable_without_item() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "Cisco bug", &["cisco"], None)
        .await
        .unwrap();
    let cve = seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-2222",
        &["cpe:2.3:o:cisco:ios:15.1:*:*:*:*:*:*:*"],
    )
    .await;

    let item = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.0".into()), "network");
    tech_stack::save_item(&pool, &item).await.unwrap();

    exposure_engine::classify_user_cves(&pool, user.id, &[cve], Utc::now())
        .await
        .unwrap();

    let exposure = exposures::load_exposure(&pool, user.id, "CVE-2025-2222")
        .await
        .unwrap()
        .expect("exposure row");
    assert_eq!(exposure.exposure_state, ExposureState::NotApplicable);
    assert!(exposure.tech_stack_item_id.is_none());
    assert!(exposure.matched_cpe.is_none());
}

#[tokio::test]
async fn test_empty_tech_stack_still_ledgers_not_applicable() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "PAN-OS exploited", &["pan-os"], None)
        .await
        .unwrap();
    let with_cpes = seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-7777",
        &["cpe:2.3:o:paloaltonetworks:pan-os:11.0.0:*:*:*:*:*:*:*"],
    )
    .await;
    // No CPE data at all: skipped entirely
    let without_cpes = seed_article_cve(&pool, article.id, "CVE-2025-8888", &[]).await;

    // User has declared no tech stack
    let written =
        exposure_engine::classify_user_cves(&pool, user.id, &[with_cpes, without_cpes], Utc::now())
            .await
            .unwrap();
    assert_eq!(written, 1);

    let exposure = exposures::load_exposure(&pool, user.id, "CVE-2025-7777")
        .await
        .unwrap()
        .expect("exposure row");
    assert_eq!(exposure.exposure_state, ExposureState::NotApplicable);
    assert!(exposure.auto_classified);
    assert!(exposure.tech_stack_item_id.is_none());
    assert!(exposure.matched_cpe.is_none());

    assert!(exposures::load_exposure(&pool, user.id, "CVE-2025-8888")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_manual_override_is_a_fixpoint() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "FortiOS exploited", &["fortios"], None)
        .await
        .unwrap();
    let cve = seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-3333",
        &["cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*"],
    )
    .await;

    let item = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.0".into()), "network");
    tech_stack::save_item(&pool, &item).await.unwrap();

    exposure_engine::classify_user_cves(&pool, user.id, std::slice::from_ref(&cve), Utc::now())
        .await
        .unwrap();

    // Human marks it fixed
    let updated = exposures::set_manual_state(
        &pool,
        user.id,
        "CVE-2025-3333",
        ExposureState::Fixed,
        Some(Utc::now()),
        Some("patched in maintenance window".to_string()),
    )
    .await
    .unwrap();
    assert!(updated);

    // A scheduled reclassification leaves the row untouched
    exposure_engine::classify_user_cves(&pool, user.id, std::slice::from_ref(&cve), Utc::now())
        .await
        .unwrap();
    let after_auto = exposures::load_exposure(&pool, user.id, "CVE-2025-3333")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_auto.exposure_state, ExposureState::Fixed);
    assert!(!after_auto.auto_classified);

    // Deleting and re-adding the stack item triggers retroactive match,
    // which also must not overwrite
    tech_stack::delete_item(&pool, user.id, item.id).await.unwrap();
    let readded = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.0".into()), "network");
    tech_stack::save_item(&pool, &readded).await.unwrap();
    exposure_engine::retroactive_match(&pool, user.id, &readded, Utc::now())
        .await
        .unwrap();

    let after_retro = exposures::load_exposure(&pool, user.id, "CVE-2025-3333")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_retro.exposure_state, ExposureState::Fixed);
    assert!(!after_retro.auto_classified);
    assert_eq!(
        after_retro.notes.as_deref(),
        Some("patched in maintenance window")
    );
}

#[tokio::test]
async fn test_retroactive_match_only_writes_product_and_exact() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "Fortinet roundup", &["fortinet"], None)
        .await
        .unwrap();
    // Same vendor, different product: vendor-tier only
    seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-4444",
        &["cpe:2.3:a:fortinet:fortimanager:6.0:*:*:*:*:*:*:*"],
    )
    .await;
    seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-5555",
        &["cpe:2.3:a:fortinet:fortios:7.0:*:*:*:*:*:*:*"],
    )
    .await;

    let item = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.3".into()), "network");
    tech_stack::save_item(&pool, &item).await.unwrap();

    let written = exposure_engine::retroactive_match(&pool, user.id, &item, Utc::now())
        .await
        .unwrap();
    assert_eq!(written, 1);

    // The vendor-tier CVE got no retroactive row
    assert!(exposures::load_exposure(&pool, user.id, "CVE-2025-4444")
        .await
        .unwrap()
        .is_none());

    let exposure = exposures::load_exposure(&pool, user.id, "CVE-2025-5555")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exposure.exposure_state, ExposureState::Vulnerable);
}

#[tokio::test]
async fn test_metrics_over_ledger_with_kev_join() {
    let pool = helpers::create_test_db().await.unwrap();
    let user = helpers::seed_user(&pool, None).await.unwrap();

    let article = helpers::seed_matched_article(&pool, user.id, "KEV story", &["kev"], None)
        .await
        .unwrap();
    let cve = seed_article_cve(
        &pool,
        article.id,
        "CVE-2025-6666",
        &["cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*"],
    )
    .await;

    let item = TechStackItem::new(user.id, "fortinet", "fortios", Some("7.0.0".into()), "network");
    tech_stack::save_item(&pool, &item).await.unwrap();
    exposure_engine::classify_user_cves(&pool, user.id, &[cve], Utc::now())
        .await
        .unwrap();

    let metrics = exposure_engine::remediation_metrics(&pool, user.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(metrics.total, 1);
    assert_eq!(metrics.vulnerable, 1);
    assert_eq!(metrics.kev_exposed, 1);
    // Deadline 2025-06-22 is in the past relative to any current run
    assert_eq!(metrics.kev_overdue, 1);
    assert_eq!(metrics.critical_exposed, 1);
    assert_eq!(metrics.avg_cvss_exposed, 9.8);
    assert_eq!(metrics.patch_rate, 0.0);
    assert_eq!(metrics.sla_compliance, 100.0);
}
