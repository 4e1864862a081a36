//! Entity and industry-signal persistence

use anyhow::Result;
use briefwire_common::db::models::{ArticleEntity, ArticleSignal, EntityType, IndustrySignal};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::placeholders;

/// Insert extracted entities, silently skipping duplicates
pub async fn insert_entities_skip_duplicates(
    pool: &SqlitePool,
    entities: &[ArticleEntity],
) -> Result<()> {
    for entity in entities {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO article_entities (article_id, entity_type, name, confidence)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(entity.article_id.to_string())
        .bind(entity.entity_type.as_str())
        .bind(&entity.name)
        .bind(entity.confidence)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Upsert an article-signal classification, refreshing confidence
pub async fn upsert_article_signal(pool: &SqlitePool, signal: &ArticleSignal) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO article_signals (article_id, industry_signal_id, confidence)
        VALUES (?, ?, ?)
        ON CONFLICT(article_id, industry_signal_id) DO UPDATE SET
            confidence = excluded.confidence
        "#,
    )
    .bind(signal.article_id.to_string())
    .bind(signal.industry_signal_id.to_string())
    .bind(signal.confidence)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn save_industry_signal(pool: &SqlitePool, signal: &IndustrySignal) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO industry_signals (id, industry_id, slug, name)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(industry_id, slug) DO UPDATE SET name = excluded.name
        "#,
    )
    .bind(signal.id.to_string())
    .bind(&signal.industry_id)
    .bind(&signal.slug)
    .bind(&signal.name)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_signals_for_industry(
    pool: &SqlitePool,
    industry_id: &str,
) -> Result<Vec<IndustrySignal>> {
    let rows = sqlx::query("SELECT * FROM industry_signals WHERE industry_id = ?")
        .bind(industry_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(IndustrySignal {
                id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
                industry_id: row.try_get("industry_id")?,
                slug: row.try_get("slug")?,
                name: row.try_get("name")?,
            })
        })
        .collect()
}

pub async fn load_entities_for_articles(
    pool: &SqlitePool,
    article_ids: &[Uuid],
) -> Result<Vec<ArticleEntity>> {
    if article_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM article_entities WHERE article_id IN ({})",
        placeholders(article_ids.len())
    );

    let mut query = sqlx::query(&sql);
    for id in article_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_entity).collect()
}

/// `(article_id, signal_slug, confidence)` triples for a set of articles
pub async fn load_signal_slugs_for_articles(
    pool: &SqlitePool,
    article_ids: &[Uuid],
) -> Result<Vec<(Uuid, String, f64)>> {
    if article_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        SELECT asig.article_id, isig.slug, asig.confidence
        FROM article_signals asig
        JOIN industry_signals isig ON isig.id = asig.industry_signal_id
        WHERE asig.article_id IN ({})
        "#,
        placeholders(article_ids.len())
    );

    let mut query = sqlx::query(&sql);
    for id in article_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok((
                Uuid::parse_str(row.try_get::<String, _>("article_id")?.as_str())?,
                row.try_get("slug")?,
                row.try_get("confidence")?,
            ))
        })
        .collect()
}

fn row_to_entity(row: &SqliteRow) -> Result<ArticleEntity> {
    let type_raw: String = row.try_get("entity_type")?;

    Ok(ArticleEntity {
        article_id: Uuid::parse_str(row.try_get::<String, _>("article_id")?.as_str())?,
        entity_type: EntityType::parse(&type_raw)
            .ok_or_else(|| briefwire_common::Error::unknown_variant("entity type", &type_raw))?,
        name: row.try_get("name")?,
        confidence: row.try_get("confidence")?,
    })
}
