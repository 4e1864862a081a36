//! Shared error type for briefwire
//!
//! Covers the two things this crate actually does: bootstrapping the
//! SQLite database and decoding stored rows back into typed models.
//! Closed-set columns (exposure state, source type, report period) and
//! timestamp columns are written by us, so a value that no longer parses
//! is corruption worth surfacing, not something to paper over with a
//! default.

use thiserror::Error;

/// Result alias for briefwire-common operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database path unusable: {0}")]
    DatabasePath(#[from] std::io::Error),

    /// A JSON blob column (`stats`, `metrics`, link lists) failed to parse
    #[error("stored JSON column would not parse: {0}")]
    StoredJson(#[from] serde_json::Error),

    /// A closed-set column held a value outside its set
    #[error("unknown {kind} value in database: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// A timestamp column held something other than RFC 3339
    #[error("malformed timestamp in database: {0}")]
    Timestamp(String),
}

impl Error {
    /// Decoding failure for a closed-set column
    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Error::UnknownVariant {
            kind,
            value: value.into(),
        }
    }

    /// Decoding failure for a timestamp column
    pub fn bad_timestamp(raw: impl Into<String>) -> Self {
        Error::Timestamp(raw.into())
    }
}
