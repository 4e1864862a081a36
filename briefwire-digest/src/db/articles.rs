//! Article persistence
//!
//! Articles are cross-user rows keyed by URL. Creation uses
//! find-or-create: a duplicate-key race against a concurrent run is
//! swallowed and the find re-run, so both runs end up referencing the
//! same row.

use anyhow::Result;
use briefwire_common::db::models::Article;
use briefwire_common::time::parse_db_timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{is_unique_violation, placeholders};

/// Find an article by URL, or create it if absent
pub async fn find_or_create(pool: &SqlitePool, article: &Article) -> Result<Article> {
    if let Some(existing) = find_by_url(pool, &article.url).await? {
        return Ok(existing);
    }

    match insert_article(pool, article).await {
        Ok(()) => Ok(article.clone()),
        Err(e) if is_unique_violation(&e) => {
            // Lost the race; another writer created the row
            find_by_url(pool, &article.url)
                .await?
                .ok_or_else(|| anyhow::anyhow!("article vanished after duplicate insert: {}", article.url))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_url(pool: &SqlitePool, url: &str) -> Result<Option<Article>> {
    let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_article).transpose()
}

async fn insert_article(pool: &SqlitePool, article: &Article) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO articles (id, source_id, url, title, content, clean_text, raw_html,
                              external_links, author, guid, published_at,
                              entities_extracted, cves_extracted)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(article.id.to_string())
    .bind(article.source_id.to_string())
    .bind(&article.url)
    .bind(&article.title)
    .bind(&article.content)
    .bind(&article.clean_text)
    .bind(&article.raw_html)
    .bind(serde_json::to_string(&article.external_links).unwrap_or_else(|_| "[]".into()))
    .bind(&article.author)
    .bind(&article.guid)
    .bind(article.published_at.map(|t| t.to_rfc3339()))
    .bind(article.entities_extracted)
    .bind(article.cves_extracted)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store extracted content for an article
pub async fn update_content(
    pool: &SqlitePool,
    article_id: Uuid,
    clean_text: &str,
    raw_html: &str,
    external_links: &[String],
) -> Result<()> {
    sqlx::query(
        "UPDATE articles SET clean_text = ?, raw_html = ?, external_links = ? WHERE id = ?",
    )
    .bind(clean_text)
    .bind(raw_html)
    .bind(serde_json::to_string(external_links).unwrap_or_else(|_| "[]".into()))
    .bind(article_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Monotonic flip after a successful entity extraction
pub async fn set_entities_extracted(pool: &SqlitePool, article_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE articles SET entities_extracted = 1 WHERE id = ?")
        .bind(article_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Monotonic flip after the CVE stage
pub async fn set_cves_extracted(pool: &SqlitePool, article_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE articles SET cves_extracted = 1 WHERE id = ?")
        .bind(article_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Administrative reset of the enrichment flags
pub async fn reset_enrichment(pool: &SqlitePool, article_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE articles SET entities_extracted = 0, cves_extracted = 0 WHERE id = ?")
        .bind(article_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Subset of `article_ids` still lacking clean text
pub async fn load_missing_clean_text(
    pool: &SqlitePool,
    article_ids: &[Uuid],
) -> Result<Vec<Article>> {
    load_filtered(pool, article_ids, "clean_text IS NULL").await
}

/// Subset of `article_ids` not yet entity-extracted
pub async fn load_needing_entities(
    pool: &SqlitePool,
    article_ids: &[Uuid],
) -> Result<Vec<Article>> {
    load_filtered(pool, article_ids, "entities_extracted = 0").await
}

/// Subset of `article_ids` not yet CVE-extracted
pub async fn load_needing_cves(pool: &SqlitePool, article_ids: &[Uuid]) -> Result<Vec<Article>> {
    load_filtered(pool, article_ids, "cves_extracted = 0").await
}

pub async fn load_by_ids(pool: &SqlitePool, article_ids: &[Uuid]) -> Result<Vec<Article>> {
    load_filtered(pool, article_ids, "1 = 1").await
}

async fn load_filtered(
    pool: &SqlitePool,
    article_ids: &[Uuid],
    condition: &str,
) -> Result<Vec<Article>> {
    if article_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM articles WHERE id IN ({}) AND {}",
        placeholders(article_ids.len()),
        condition
    );

    let mut query = sqlx::query(&sql);
    for id in article_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_article).collect()
}

pub(crate) fn row_to_article(row: &SqliteRow) -> Result<Article> {
    let links_raw: String = row.try_get("external_links")?;
    let published_at: Option<String> = row.try_get("published_at")?;

    Ok(Article {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        source_id: Uuid::parse_str(row.try_get::<String, _>("source_id")?.as_str())?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        clean_text: row.try_get("clean_text")?,
        raw_html: row.try_get("raw_html")?,
        external_links: serde_json::from_str(&links_raw).unwrap_or_default(),
        author: row.try_get("author")?,
        guid: row.try_get("guid")?,
        published_at: published_at.as_deref().and_then(parse_db_timestamp),
        entities_extracted: row.try_get("entities_extracted")?,
        cves_extracted: row.try_get("cves_extracted")?,
    })
}
