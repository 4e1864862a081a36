//! Article CVE persistence

use anyhow::Result;
use briefwire_common::db::models::ArticleCve;
use briefwire_common::time::parse_db_timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::placeholders;

pub async fn upsert_article_cve(pool: &SqlitePool, cve: &ArticleCve) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO article_cves (id, article_id, cve_id, cvss_score, severity, description,
                                  cpe_matches, published_date, in_kev, kev_date_added,
                                  kev_due_date, kev_ransomware_use)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(article_id, cve_id) DO UPDATE SET
            cvss_score = excluded.cvss_score,
            severity = excluded.severity,
            description = excluded.description,
            cpe_matches = excluded.cpe_matches,
            published_date = excluded.published_date,
            in_kev = excluded.in_kev,
            kev_date_added = excluded.kev_date_added,
            kev_due_date = excluded.kev_due_date,
            kev_ransomware_use = excluded.kev_ransomware_use
        "#,
    )
    .bind(cve.id.to_string())
    .bind(cve.article_id.to_string())
    .bind(&cve.cve_id)
    .bind(cve.cvss_score)
    .bind(&cve.severity)
    .bind(&cve.description)
    .bind(serde_json::to_string(&cve.cpe_matches).unwrap_or_else(|_| "[]".into()))
    .bind(cve.published_date.map(|t| t.to_rfc3339()))
    .bind(cve.in_kev)
    .bind(&cve.kev_date_added)
    .bind(&cve.kev_due_date)
    .bind(cve.kev_ransomware_use)
    .execute(pool)
    .await?;

    Ok(())
}

/// One representative enriched row per CVE id, used to copy enrichment
/// across articles without re-querying the vulnerability database
pub async fn load_enriched_by_cve_ids(
    pool: &SqlitePool,
    cve_ids: &[String],
) -> Result<HashMap<String, ArticleCve>> {
    if cve_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        r#"
        SELECT * FROM article_cves
        WHERE cve_id IN ({})
          AND (cvss_score IS NOT NULL OR description IS NOT NULL OR cpe_matches != '[]')
        "#,
        placeholders(cve_ids.len())
    );

    let mut query = sqlx::query(&sql);
    for id in cve_ids {
        query = query.bind(id);
    }

    let rows = query.fetch_all(pool).await?;
    let mut map = HashMap::new();
    for row in &rows {
        let cve = row_to_article_cve(row)?;
        map.entry(cve.cve_id.clone()).or_insert(cve);
    }

    Ok(map)
}

pub async fn load_for_articles(pool: &SqlitePool, article_ids: &[Uuid]) -> Result<Vec<ArticleCve>> {
    if article_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM article_cves WHERE article_id IN ({})",
        placeholders(article_ids.len())
    );

    let mut query = sqlx::query(&sql);
    for id in article_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_article_cve).collect()
}

/// All CVE rows attached to a user's matched articles, for exposure
/// matching
pub async fn load_for_user_matched(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<ArticleCve>> {
    let rows = sqlx::query(
        r#"
        SELECT ac.* FROM article_cves ac
        JOIN user_articles ua ON ua.article_id = ac.article_id
        WHERE ua.user_id = ? AND ua.matched = 1
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_article_cve).collect()
}

pub(crate) fn row_to_article_cve(row: &SqliteRow) -> Result<ArticleCve> {
    let cpes_raw: String = row.try_get("cpe_matches")?;
    let published: Option<String> = row.try_get("published_date")?;

    Ok(ArticleCve {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        article_id: Uuid::parse_str(row.try_get::<String, _>("article_id")?.as_str())?,
        cve_id: row.try_get("cve_id")?,
        cvss_score: row.try_get("cvss_score")?,
        severity: row.try_get("severity")?,
        description: row.try_get("description")?,
        cpe_matches: serde_json::from_str(&cpes_raw).unwrap_or_default(),
        published_date: published.as_deref().and_then(parse_db_timestamp),
        in_kev: row.try_get("in_kev")?,
        kev_date_added: row.try_get("kev_date_added")?,
        kev_due_date: row.try_get("kev_due_date")?,
        kev_ransomware_use: row.try_get("kev_ransomware_use")?,
    })
}
