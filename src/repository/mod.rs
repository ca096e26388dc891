//! Repository layer for database persistence.
//!
//! All database access uses Diesel with diesel-async. SQLite is the default
//! backend; PostgreSQL is available behind the `postgres` feature.

pub mod context;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod util;

pub use context::DbContext;
pub use ledger::{ImportSummary, LedgerRepository};
pub use pool::{DbPool, DieselError};

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Fixed-width microsecond precision keeps lexicographic order equal to
/// chronological order, which `ORDER BY processed_at` relies on.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string.
pub fn parse_datetime_opt(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1500);
        let c = a + chrono::Duration::seconds(10);

        let (fa, fb, fc) = (format_timestamp(a), format_timestamp(b), format_timestamp(c));
        assert!(fa < fb && fb < fc);
        assert_eq!(fa, "2024-01-01T12:00:00.000000Z");
        assert_eq!(parse_datetime(&fb), b);
    }

    #[test]
    fn test_parse_datetime_fallbacks() {
        assert_eq!(parse_datetime("garbage"), DateTime::UNIX_EPOCH);
        assert!(parse_datetime_opt(Some("garbage")).is_none());
        assert!(parse_datetime_opt(None).is_none());
    }
}
