//! Gerrit-style timestamps.
//!
//! Gerrit reports times as `2024-01-01 10:00:00.000000000` (UTC). The format is
//! fixed-width, so plain string comparison orders timestamps correctly. Cache
//! stamps and retention thresholds are produced in the same format.

use chrono::{DateTime, Duration, NaiveDate, Utc};

const GERRIT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Format a point in time the way Gerrit does.
pub fn format(at: DateTime<Utc>) -> String {
  at.format(GERRIT_FORMAT).to_string()
}

/// Timestamp `days` before `now`. Records updated at or before it are expired.
pub fn retention_threshold(now: DateTime<Utc>, days: i64) -> String {
  format(now - Duration::days(days))
}

/// `YYYY-MM-DD` prefix used by the "today" filters.
pub fn date_prefix(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}
