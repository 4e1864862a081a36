//! User-article link persistence

use anyhow::Result;
use briefwire_common::db::models::UserArticle;
use briefwire_common::time::parse_db_timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::placeholders;

pub async fn upsert_user_article(pool: &SqlitePool, link: &UserArticle) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_articles (user_id, article_id, matched, matched_keywords, news_group_id, read, sent, sent_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, article_id) DO UPDATE SET
            matched = excluded.matched,
            matched_keywords = excluded.matched_keywords
        "#,
    )
    .bind(link.user_id.to_string())
    .bind(link.article_id.to_string())
    .bind(link.matched)
    .bind(serde_json::to_string(&link.matched_keywords).unwrap_or_else(|_| "[]".into()))
    .bind(link.news_group_id.map(|id| id.to_string()))
    .bind(link.read)
    .bind(link.sent)
    .bind(link.sent_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// URLs this user already has links for, used to subtract known articles
/// after a scrape
pub async fn existing_urls(pool: &SqlitePool, user_id: Uuid) -> Result<HashSet<String>> {
    let urls = sqlx::query_scalar::<_, String>(
        r#"
        SELECT a.url FROM user_articles ua
        JOIN articles a ON a.id = ua.article_id
        WHERE ua.user_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(urls.into_iter().collect())
}

/// Matched links not yet assigned to a story
pub async fn load_ungrouped_matched(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<UserArticle>> {
    let rows = sqlx::query(
        "SELECT * FROM user_articles WHERE user_id = ? AND matched = 1 AND news_group_id IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_user_article).collect()
}

/// Bulk-assign a story id to a set of links
pub async fn assign_group(
    pool: &SqlitePool,
    user_id: Uuid,
    article_ids: &[Uuid],
    group_id: Uuid,
) -> Result<()> {
    if article_ids.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "UPDATE user_articles SET news_group_id = ? WHERE user_id = ? AND article_id IN ({})",
        placeholders(article_ids.len())
    );

    let mut query = sqlx::query(&sql)
        .bind(group_id.to_string())
        .bind(user_id.to_string());
    for id in article_ids {
        query = query.bind(id.to_string());
    }

    query.execute(pool).await?;

    Ok(())
}

/// Article ids linked to a story
pub async fn article_ids_for_group(pool: &SqlitePool, group_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT article_id FROM user_articles WHERE news_group_id = ?",
    )
    .bind(group_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter()
        .map(|id| Ok(Uuid::parse_str(id)?))
        .collect()
}

pub(crate) fn row_to_user_article(row: &SqliteRow) -> Result<UserArticle> {
    let keywords_raw: String = row.try_get("matched_keywords")?;
    let group_id: Option<String> = row.try_get("news_group_id")?;
    let sent_at: Option<String> = row.try_get("sent_at")?;

    Ok(UserArticle {
        user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
        article_id: Uuid::parse_str(row.try_get::<String, _>("article_id")?.as_str())?,
        matched: row.try_get("matched")?,
        matched_keywords: serde_json::from_str(&keywords_raw).unwrap_or_default(),
        news_group_id: group_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
        read: row.try_get("read")?,
        sent: row.try_get("sent")?,
        sent_at: sent_at.as_deref().and_then(parse_db_timestamp),
    })
}
