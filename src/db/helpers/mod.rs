use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 form used for every stored timestamp.
///
/// All values are UTC with millisecond precision, so lexical order in SQLite
/// matches chronological order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn clamp_limit(limit: usize, max: usize) -> Result<i64> {
    let clamped = limit.clamp(1, max.max(1));
    i64::try_from(clamped).context("limit exceeds SQLite INTEGER range")
}
