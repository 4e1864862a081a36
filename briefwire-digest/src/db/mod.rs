//! Database access for the digest service
//!
//! Thin persistence modules over the shared schema created by
//! `briefwire_common::db`. Every write is its own transaction; upserts
//! lean on the schema's unique constraints so that retries and
//! overlapping runs stay idempotent.

pub mod articles;
pub mod cves;
pub mod entities;
pub mod exposures;
pub mod keywords;
pub mod news_groups;
pub mod reports;
pub mod sources;
pub mod tech_stack;
pub mod user_articles;
pub mod users;

/// True when an error is a unique-constraint violation, the expected
/// outcome of losing a duplicate-write race
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

/// Build a `?, ?, ...` placeholder list for dynamic IN clauses
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
