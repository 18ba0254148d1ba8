//! Parsing of the leading timestamp token of a log line

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Formats carrying an explicit offset, most common in server logs first
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z", // 2024-01-01T00:00:00.000+0000 (iso8601-local)
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
];

/// Formats without an offset; these are read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f", // 2.4 with --timeStampFormat iso8601
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%dT%H:%M:%S%.f",
];

/// Parse the leading timestamp token of a log line.
///
/// Accepts RFC 3339, ISO 8601 with or without an offset (`+0000` or `+00:00`),
/// bare dates and 10/13/16/19 digit Unix timestamps. Timestamps without an
/// offset are interpreted as UTC so the same token always yields the same
/// instant regardless of the machine running the import.
pub fn parse_timestamp(token: &str) -> Option<DateTime<Utc>> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        if let Some(parsed) = try_parse_unix_timestamp(token) {
            return Some(parsed);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(token, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(token, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Try to parse Unix timestamp based on string length
fn try_parse_unix_timestamp(ts_str: &str) -> Option<DateTime<Utc>> {
    let timestamp_int = ts_str.parse::<i64>().ok()?;

    match ts_str.len() {
        10 => DateTime::from_timestamp(timestamp_int, 0),
        13 => DateTime::from_timestamp(
            timestamp_int / 1000,
            (timestamp_int % 1000) as u32 * 1_000_000,
        ),
        16 => DateTime::from_timestamp(
            timestamp_int / 1_000_000,
            (timestamp_int % 1_000_000) as u32 * 1_000,
        ),
        19 => DateTime::from_timestamp(
            timestamp_int / 1_000_000_000,
            (timestamp_int % 1_000_000_000) as u32,
        ),
        _ => None,
    }
}
