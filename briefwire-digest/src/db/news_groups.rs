//! Story (news group) persistence

use anyhow::Result;
use briefwire_common::db::models::{CaseType, NewsGroup};
use briefwire_common::time::parse_db_timestamp;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn insert_group(pool: &SqlitePool, group: &NewsGroup) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO news_groups (id, user_id, title, synopsis, executive_summary,
                                 impact_analysis, actionability, case_type, confidence, date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(group.id.to_string())
    .bind(group.user_id.to_string())
    .bind(&group.title)
    .bind(&group.synopsis)
    .bind(&group.executive_summary)
    .bind(&group.impact_analysis)
    .bind(&group.actionability)
    .bind(group.case_type.map(|c| c.as_i64()))
    .bind(group.confidence)
    .bind(group.date.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite a story's narrative fields after a successful briefing
pub async fn update_briefing(
    pool: &SqlitePool,
    group_id: Uuid,
    title: &str,
    synopsis: &str,
    executive_summary: &str,
    impact_analysis: &str,
    actionability: &str,
    case_type: CaseType,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE news_groups
        SET title = ?, synopsis = ?, executive_summary = ?,
            impact_analysis = ?, actionability = ?, case_type = ?
        WHERE id = ?
        "#,
    )
    .bind(title)
    .bind(synopsis)
    .bind(executive_summary)
    .bind(impact_analysis)
    .bind(actionability)
    .bind(case_type.as_i64())
    .bind(group_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_group(pool: &SqlitePool, group_id: Uuid) -> Result<Option<NewsGroup>> {
    let row = sqlx::query("SELECT * FROM news_groups WHERE id = ?")
        .bind(group_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_group).transpose()
}

/// Stories that have at least one article published on or after `since`
pub async fn load_groups_with_articles_since(
    pool: &SqlitePool,
    user_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<NewsGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT ng.* FROM news_groups ng
        JOIN user_articles ua ON ua.news_group_id = ng.id
        JOIN articles a ON a.id = ua.article_id
        WHERE ng.user_id = ? AND a.published_at >= ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(since.to_rfc3339())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_group).collect()
}

/// Feed ordering: most severe case type first, newest first within it
pub async fn list_briefs(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<NewsGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM news_groups
        WHERE user_id = ?
        ORDER BY CASE WHEN case_type IS NULL THEN 5 ELSE case_type END ASC, date DESC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_group).collect()
}

pub(crate) fn row_to_group(row: &SqliteRow) -> Result<NewsGroup> {
    let case_type: Option<i64> = row.try_get("case_type")?;
    let date_raw: String = row.try_get("date")?;

    Ok(NewsGroup {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
        title: row.try_get("title")?,
        synopsis: row.try_get("synopsis")?,
        executive_summary: row.try_get("executive_summary")?,
        impact_analysis: row.try_get("impact_analysis")?,
        actionability: row.try_get("actionability")?,
        case_type: case_type.and_then(CaseType::from_i64),
        confidence: row.try_get("confidence")?,
        date: parse_db_timestamp(&date_raw)
            .ok_or_else(|| briefwire_common::Error::bad_timestamp(&date_raw))?,
    })
}
