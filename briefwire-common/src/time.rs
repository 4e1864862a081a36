//! Time helpers shared across services

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

/// Truncate a timestamp to UTC midnight of the same day
pub fn utc_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    let date = ts.date_naive();
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Parse an RFC 3339 timestamp stored in the database
pub fn parse_db_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
