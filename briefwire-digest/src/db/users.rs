//! User persistence

use anyhow::Result;
use briefwire_common::db::models::{DigestFrequency, User};
use briefwire_common::time::parse_db_timestamp;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

pub async fn save_user(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, industry_id, digest_frequency, digest_time, last_digest_at, email_enabled, onboarded)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            email = excluded.email,
            industry_id = excluded.industry_id,
            digest_frequency = excluded.digest_frequency,
            digest_time = excluded.digest_time,
            email_enabled = excluded.email_enabled,
            onboarded = excluded.onboarded
        "#,
    )
    .bind(user.id.to_string())
    .bind(&user.email)
    .bind(&user.industry_id)
    .bind(user.digest_frequency.map(|f| f.as_str()).unwrap_or("1d"))
    .bind(&user.digest_time)
    .bind(user.last_digest_at.map(|t| t.to_rfc3339()))
    .bind(user.email_enabled)
    .bind(user.onboarded)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_all_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query("SELECT * FROM users").fetch_all(pool).await?;
    rows.iter().map(row_to_user).collect()
}

pub async fn load_user(pool: &SqlitePool, user_id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

pub async fn update_last_digest(
    pool: &SqlitePool,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE users SET last_digest_at = ? WHERE id = ?")
        .bind(at.to_rfc3339())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let frequency_raw: String = row.try_get("digest_frequency")?;
    let last_digest_at: Option<String> = row.try_get("last_digest_at")?;

    Ok(User {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        email: row.try_get("email")?,
        industry_id: row.try_get("industry_id")?,
        digest_frequency: DigestFrequency::parse(&frequency_raw),
        digest_time: row.try_get("digest_time")?,
        last_digest_at: last_digest_at.as_deref().and_then(parse_db_timestamp),
        email_enabled: row.try_get("email_enabled")?,
        onboarded: row.try_get("onboarded")?,
    })
}
