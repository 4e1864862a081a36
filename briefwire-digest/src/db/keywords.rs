//! Keyword persistence

use anyhow::Result;
use briefwire_common::db::models::Keyword;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a keyword; duplicates per user are ignored
pub async fn save_keyword(pool: &SqlitePool, keyword: &Keyword) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO keywords (id, user_id, word)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id, word) DO NOTHING
        "#,
    )
    .bind(keyword.id.to_string())
    .bind(keyword.user_id.to_string())
    .bind(&keyword.word)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_keywords(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Keyword>> {
    let rows = sqlx::query("SELECT * FROM keywords WHERE user_id = ? ORDER BY word")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Keyword {
                id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
                user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
                word: row.try_get("word")?,
            })
        })
        .collect()
}
