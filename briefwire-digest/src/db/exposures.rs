//! Exposure ledger and snapshot persistence
//!
//! Auto-classification writes go through [`upsert_auto_exposure`], whose
//! conflict clause refuses to touch rows a human has overridden
//! (`auto_classified = 0`). Manual overrides are the only writes that may
//! flip that flag.

use anyhow::Result;
use briefwire_common::db::models::{ExposureState, Period, PeriodSnapshot, UserCveExposure};
use briefwire_common::time::parse_db_timestamp;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Exposure joined with the strongest enrichment available for its CVE
#[derive(Debug, Clone)]
pub struct ExposureRow {
    pub exposure: UserCveExposure,
    pub cvss_score: Option<f64>,
    pub in_kev: bool,
}

/// Upsert an auto-classified exposure. Manually overridden rows are left
/// untouched by the conflict clause.
pub async fn upsert_auto_exposure(pool: &SqlitePool, exposure: &UserCveExposure) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_cve_exposures (id, user_id, cve_id, article_cve_id, tech_stack_item_id,
                                        exposure_state, auto_classified, matched_cpe,
                                        first_detected_at, patched_at, remediation_deadline, notes)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, cve_id) DO UPDATE SET
            exposure_state = excluded.exposure_state,
            article_cve_id = excluded.article_cve_id,
            tech_stack_item_id = excluded.tech_stack_item_id,
            matched_cpe = excluded.matched_cpe,
            remediation_deadline = excluded.remediation_deadline
        WHERE user_cve_exposures.auto_classified = 1
        "#,
    )
    .bind(exposure.id.to_string())
    .bind(exposure.user_id.to_string())
    .bind(&exposure.cve_id)
    .bind(exposure.article_cve_id.map(|id| id.to_string()))
    .bind(exposure.tech_stack_item_id.map(|id| id.to_string()))
    .bind(exposure.exposure_state.as_str())
    .bind(&exposure.matched_cpe)
    .bind(exposure.first_detected_at.to_rfc3339())
    .bind(exposure.patched_at.map(|t| t.to_rfc3339()))
    .bind(exposure.remediation_deadline.map(|t| t.to_rfc3339()))
    .bind(&exposure.notes)
    .execute(pool)
    .await?;

    Ok(())
}

/// Manual override: sets the state, records patch time for FIXED, and
/// pins the row against future auto-classification
pub async fn set_manual_state(
    pool: &SqlitePool,
    user_id: Uuid,
    cve_id: &str,
    state: ExposureState,
    patched_at: Option<DateTime<Utc>>,
    notes: Option<String>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE user_cve_exposures
        SET exposure_state = ?, auto_classified = 0, patched_at = ?, notes = COALESCE(?, notes)
        WHERE user_id = ? AND cve_id = ?
        "#,
    )
    .bind(state.as_str())
    .bind(patched_at.map(|t| t.to_rfc3339()))
    .bind(notes)
    .bind(user_id.to_string())
    .bind(cve_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_exposures(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<UserCveExposure>> {
    let rows = sqlx::query("SELECT * FROM user_cve_exposures WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_exposure).collect()
}

pub async fn load_exposure(
    pool: &SqlitePool,
    user_id: Uuid,
    cve_id: &str,
) -> Result<Option<UserCveExposure>> {
    let row = sqlx::query("SELECT * FROM user_cve_exposures WHERE user_id = ? AND cve_id = ?")
        .bind(user_id.to_string())
        .bind(cve_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_exposure).transpose()
}

/// Exposures joined with per-CVE CVSS and KEV flags for metric computation
pub async fn load_exposure_rows(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<ExposureRow>> {
    let rows = sqlx::query(
        r#"
        SELECT e.*,
               (SELECT MAX(ac.cvss_score) FROM article_cves ac WHERE ac.cve_id = e.cve_id) AS best_cvss,
               (SELECT MAX(ac.in_kev) FROM article_cves ac WHERE ac.cve_id = e.cve_id) AS any_kev
        FROM user_cve_exposures e
        WHERE e.user_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let any_kev: Option<i64> = row.try_get("any_kev")?;
            Ok(ExposureRow {
                exposure: row_to_exposure(row)?,
                cvss_score: row.try_get("best_cvss")?,
                in_kev: any_kev.unwrap_or(0) != 0,
            })
        })
        .collect()
}

/// Upsert the daily metrics snapshot at a UTC-midnight snap date
pub async fn upsert_snapshot(pool: &SqlitePool, snapshot: &PeriodSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO period_snapshots (user_id, period, snap_date, metrics)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, period, snap_date) DO UPDATE SET
            metrics = excluded.metrics
        "#,
    )
    .bind(snapshot.user_id.to_string())
    .bind(snapshot.period.as_str())
    .bind(snapshot.snap_date.to_rfc3339())
    .bind(snapshot.metrics.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Newest snapshot at or before `cutoff`, used as the delta baseline
pub async fn load_snapshot_before(
    pool: &SqlitePool,
    user_id: Uuid,
    period: Period,
    cutoff: DateTime<Utc>,
) -> Result<Option<PeriodSnapshot>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM period_snapshots
        WHERE user_id = ? AND period = ? AND snap_date <= ?
        ORDER BY snap_date DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(period.as_str())
    .bind(cutoff.to_rfc3339())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let metrics_raw: String = row.try_get("metrics")?;
        let snap_raw: String = row.try_get("snap_date")?;
        let period_raw: String = row.try_get("period")?;

        anyhow::Ok(PeriodSnapshot {
            user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
            period: Period::parse(&period_raw)
                .ok_or_else(|| briefwire_common::Error::unknown_variant("period", &period_raw))?,
            snap_date: parse_db_timestamp(&snap_raw)
                .ok_or_else(|| briefwire_common::Error::bad_timestamp(&snap_raw))?,
            metrics: serde_json::from_str(&metrics_raw).unwrap_or_default(),
        })
    })
    .transpose()
}

fn row_to_exposure(row: &SqliteRow) -> Result<UserCveExposure> {
    let state_raw: String = row.try_get("exposure_state")?;
    let article_cve_id: Option<String> = row.try_get("article_cve_id")?;
    let item_id: Option<String> = row.try_get("tech_stack_item_id")?;
    let first_detected: String = row.try_get("first_detected_at")?;
    let patched_at: Option<String> = row.try_get("patched_at")?;
    let deadline: Option<String> = row.try_get("remediation_deadline")?;

    Ok(UserCveExposure {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
        cve_id: row.try_get("cve_id")?,
        article_cve_id: article_cve_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
        tech_stack_item_id: item_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
        exposure_state: ExposureState::parse(&state_raw)
            .ok_or_else(|| briefwire_common::Error::unknown_variant("exposure state", &state_raw))?,
        auto_classified: row.try_get("auto_classified")?,
        matched_cpe: row.try_get("matched_cpe")?,
        first_detected_at: parse_db_timestamp(&first_detected)
            .ok_or_else(|| briefwire_common::Error::bad_timestamp(&first_detected))?,
        patched_at: patched_at.as_deref().and_then(parse_db_timestamp),
        remediation_deadline: deadline.as_deref().and_then(parse_db_timestamp),
        notes: row.try_get("notes")?,
    })
}
