//! Period report persistence

use anyhow::Result;
use briefwire_common::db::models::{Period, PeriodReport};
use briefwire_common::time::parse_db_timestamp;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn upsert_report(pool: &SqlitePool, report: &PeriodReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO period_reports (user_id, period, from_date, to_date, summary, stats, generated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, period) DO UPDATE SET
            from_date = excluded.from_date,
            to_date = excluded.to_date,
            summary = excluded.summary,
            stats = excluded.stats,
            generated_at = excluded.generated_at
        "#,
    )
    .bind(report.user_id.to_string())
    .bind(report.period.as_str())
    .bind(report.from_date.to_rfc3339())
    .bind(report.to_date.to_rfc3339())
    .bind(&report.summary)
    .bind(report.stats.to_string())
    .bind(report.generated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_report(
    pool: &SqlitePool,
    user_id: Uuid,
    period: Period,
) -> Result<Option<PeriodReport>> {
    let row = sqlx::query("SELECT * FROM period_reports WHERE user_id = ? AND period = ?")
        .bind(user_id.to_string())
        .bind(period.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        let stats_raw: String = row.try_get("stats")?;
        let from_raw: String = row.try_get("from_date")?;
        let to_raw: String = row.try_get("to_date")?;
        let generated_raw: String = row.try_get("generated_at")?;

        anyhow::Ok(PeriodReport {
            user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
            period,
            from_date: parse_db_timestamp(&from_raw)
                .ok_or_else(|| briefwire_common::Error::bad_timestamp(&from_raw))?,
            to_date: parse_db_timestamp(&to_raw)
                .ok_or_else(|| briefwire_common::Error::bad_timestamp(&to_raw))?,
            summary: row.try_get("summary")?,
            stats: serde_json::from_str(&stats_raw).unwrap_or_default(),
            generated_at: parse_db_timestamp(&generated_raw)
                .ok_or_else(|| briefwire_common::Error::bad_timestamp(&generated_raw))?,
        })
    })
    .transpose()
}
