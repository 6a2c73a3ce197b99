//! Centralized date parsing. Storage and external payloads carry dates in
//! several formats; every call site goes through this module so the
//! accepted-format list lives in exactly one place. Unparseable values are
//! logged and yield `None`, never a panic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Formats tried in order, after the ISO-8601 fast path.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Parse a timestamp or civil date string into a UTC instant.
/// Date-only inputs map to midnight UTC.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    // ISO-8601 with offset ("2025-07-27T09:45:00Z", "+00:00" suffixes)
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }

    tracing::warn!("could not parse date string: {:?}", input);
    None
}

/// Parse a civil date, accepting full timestamps by truncation.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    parse_datetime(trimmed).map(|dt| dt.date_naive())
}

/// Parse a unix epoch (seconds) into a UTC instant.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_with_zone() {
        let dt = parse_datetime("2025-07-27T09:45:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-07-27T09:45:00+00:00");
    }

    #[test]
    fn parses_iso_without_zone() {
        assert!(parse_datetime("2025-07-27T09:45:00").is_some());
    }

    #[test]
    fn parses_space_separated() {
        assert!(parse_datetime("2025-07-27 09:45:00").is_some());
    }

    #[test]
    fn parses_date_only() {
        let dt = parse_datetime("2025-07-27").unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 27).unwrap());
    }

    #[test]
    fn parses_us_and_slash_formats() {
        assert_eq!(
            parse_date("2025/07/27"),
            NaiveDate::from_ymd_opt(2025, 7, 27)
        );
        assert_eq!(
            parse_date("07/27/2025"),
            NaiveDate::from_ymd_opt(2025, 7, 27)
        );
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        assert!(parse_datetime("not a date").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn date_from_full_timestamp() {
        assert_eq!(
            parse_date("2025-07-27T09:45:00Z"),
            NaiveDate::from_ymd_opt(2025, 7, 27)
        );
    }
}
