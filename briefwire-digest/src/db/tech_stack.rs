//! Tech stack persistence

use anyhow::Result;
use briefwire_common::db::models::TechStackItem;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a stack item; the `(user, vendor, product, version)` constraint
/// absorbs duplicate submissions
pub async fn save_item(pool: &SqlitePool, item: &TechStackItem) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tech_stack_items (id, user_id, vendor, product, version, category, cpe_pattern, active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, vendor, product, version) DO UPDATE SET
            category = excluded.category,
            cpe_pattern = excluded.cpe_pattern,
            active = excluded.active
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.user_id.to_string())
    .bind(&item.vendor)
    .bind(&item.product)
    .bind(&item.version)
    .bind(&item.category)
    .bind(&item.cpe_pattern)
    .bind(item.active)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_active_items(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<TechStackItem>> {
    let rows = sqlx::query("SELECT * FROM tech_stack_items WHERE user_id = ? AND active = 1")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_item).collect()
}

pub async fn delete_item(pool: &SqlitePool, user_id: Uuid, item_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tech_stack_items WHERE id = ? AND user_id = ?")
        .bind(item_id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn row_to_item(row: &SqliteRow) -> Result<TechStackItem> {
    Ok(TechStackItem {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())?,
        user_id: Uuid::parse_str(row.try_get::<String, _>("user_id")?.as_str())?,
        vendor: row.try_get("vendor")?,
        product: row.try_get("product")?,
        version: row.try_get("version")?,
        category: row.try_get("category")?,
        cpe_pattern: row.try_get("cpe_pattern")?,
        active: row.try_get("active")?,
    })
}
