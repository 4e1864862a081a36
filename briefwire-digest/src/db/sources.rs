//! Source persistence

use anyhow::Result;
use briefwire_common::db::models::{Source, SourceType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::placeholders;

pub async fn save_source(pool: &SqlitePool, source: &Source) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sources (id, user_id, url, name, source_type, active)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            url = excluded.url,
            name = excluded.name,
            source_type = excluded.source_type,
            active = excluded.active
        "#,
    )
    .bind(source.id.to_string())
    .bind(source.user_id.to_string())
    .bind(&source.url)
    .bind(&source.name)
    .bind(source.source_type.as_str())
    .bind(source.active)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_active_sources(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources WHERE user_id = ? AND active = 1")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_source).collect()
}

pub async fn list_sources(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources WHERE user_id = ? ORDER BY created_at")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_source).collect()
}

/// Distinct active RSS URLs across a set of users, for cache pre-warming
pub async fn distinct_rss_urls(pool: &SqlitePool, user_ids: &[Uuid]) -> Result<Vec<String>> {
    if user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT url FROM sources WHERE active = 1 AND source_type = 'RSS' AND user_id IN ({})",
        placeholders(user_ids.len())
    );

    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for id in user_ids {
        query = query.bind(id.to_string());
    }

    Ok(query.fetch_all(pool).await?)
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    let type_raw: String = row.try_get("source_type")?;

    Ok(Source {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        source_type: SourceType::parse(&type_raw)
            .ok_or_else(|| briefwire_common::Error::unknown_variant("source type", &type_raw))?,
        active: row.try_get("active")?,
    })
}
