//! Database initialization for briefwire services
//!
//! Creates the shared SQLite schema on startup. Table creation is
//! idempotent (`CREATE TABLE IF NOT EXISTS`), and uniqueness constraints
//! are the coordination mechanism for all concurrent writes: upserts use
//! `ON CONFLICT` against them rather than in-process locks.

pub mod models;

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create an in-memory pool with the full schema, for tests. The pool is
/// pinned to one connection: every fresh `:memory:` connection would
/// otherwise see its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;
    create_sources_table(pool).await?;
    create_keywords_table(pool).await?;
    create_articles_table(pool).await?;
    create_user_articles_table(pool).await?;
    create_article_entities_table(pool).await?;
    create_industry_signals_table(pool).await?;
    create_article_signals_table(pool).await?;
    create_article_cves_table(pool).await?;
    create_tech_stack_items_table(pool).await?;
    create_user_cve_exposures_table(pool).await?;
    create_news_groups_table(pool).await?;
    create_period_reports_table(pool).await?;
    create_period_snapshots_table(pool).await?;

    info!("Database tables initialized");

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            industry_id TEXT,
            digest_frequency TEXT NOT NULL DEFAULT '1d',
            digest_time TEXT NOT NULL DEFAULT '08:00',
            last_digest_at TEXT,
            email_enabled INTEGER NOT NULL DEFAULT 1,
            onboarded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            url TEXT NOT NULL,
            name TEXT NOT NULL,
            source_type TEXT NOT NULL DEFAULT 'RSS',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_keywords_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keywords (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            word TEXT NOT NULL,
            UNIQUE (user_id, word)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_articles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            clean_text TEXT,
            raw_html TEXT,
            external_links TEXT NOT NULL DEFAULT '[]',
            author TEXT,
            guid TEXT,
            published_at TEXT,
            entities_extracted INTEGER NOT NULL DEFAULT 0,
            cves_extracted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_articles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_articles (
            user_id TEXT NOT NULL REFERENCES users(id),
            article_id TEXT NOT NULL REFERENCES articles(id),
            matched INTEGER NOT NULL DEFAULT 0,
            matched_keywords TEXT NOT NULL DEFAULT '[]',
            news_group_id TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            sent INTEGER NOT NULL DEFAULT 0,
            sent_at TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, article_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_article_entities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_entities (
            article_id TEXT NOT NULL REFERENCES articles(id),
            entity_type TEXT NOT NULL,
            name TEXT NOT NULL,
            confidence REAL NOT NULL,
            UNIQUE (article_id, entity_type, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_industry_signals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS industry_signals (
            id TEXT PRIMARY KEY,
            industry_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (industry_id, slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_article_signals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_signals (
            article_id TEXT NOT NULL REFERENCES articles(id),
            industry_signal_id TEXT NOT NULL REFERENCES industry_signals(id),
            confidence REAL NOT NULL,
            PRIMARY KEY (article_id, industry_signal_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_article_cves_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_cves (
            id TEXT PRIMARY KEY,
            article_id TEXT NOT NULL REFERENCES articles(id),
            cve_id TEXT NOT NULL,
            cvss_score REAL,
            severity TEXT,
            description TEXT,
            cpe_matches TEXT NOT NULL DEFAULT '[]',
            published_date TEXT,
            in_kev INTEGER NOT NULL DEFAULT 0,
            kev_date_added TEXT,
            kev_due_date TEXT,
            kev_ransomware_use INTEGER,
            UNIQUE (article_id, cve_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tech_stack_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tech_stack_items (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            vendor TEXT NOT NULL,
            product TEXT NOT NULL,
            version TEXT,
            category TEXT NOT NULL DEFAULT '',
            cpe_pattern TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, vendor, product, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_cve_exposures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_cve_exposures (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            cve_id TEXT NOT NULL,
            article_cve_id TEXT,
            tech_stack_item_id TEXT,
            exposure_state TEXT NOT NULL,
            auto_classified INTEGER NOT NULL DEFAULT 1,
            matched_cpe TEXT,
            first_detected_at TEXT NOT NULL,
            patched_at TEXT,
            remediation_deadline TEXT,
            notes TEXT,
            UNIQUE (user_id, cve_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_news_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_groups (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            synopsis TEXT,
            executive_summary TEXT,
            impact_analysis TEXT,
            actionability TEXT,
            case_type INTEGER,
            confidence REAL NOT NULL DEFAULT 0.5,
            date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_period_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS period_reports (
            user_id TEXT NOT NULL REFERENCES users(id),
            period TEXT NOT NULL,
            from_date TEXT NOT NULL,
            to_date TEXT NOT NULL,
            summary TEXT,
            stats TEXT NOT NULL DEFAULT '{}',
            generated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, period)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_period_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS period_snapshots (
            user_id TEXT NOT NULL REFERENCES users(id),
            period TEXT NOT NULL,
            snap_date TEXT NOT NULL,
            metrics TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (user_id, period, snap_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
