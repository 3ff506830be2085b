//! Timestamp normalization for ordering.
//!
//! Backend writers disagree on sub-second precision (Python emits six
//! fractional digits, JavaScript three) and sometimes drop the offset. Every
//! form is reduced to microseconds since the epoch so they compare directly.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601-like timestamp. Offset-less forms are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Current time as RFC 3339 with millisecond precision, e.g.
/// `2024-05-01T12:00:00.123Z`.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Microsecond sort key. Anything finer than a microsecond is truncated.
pub fn sort_key(raw: &str) -> Option<i64> {
    parse_timestamp(raw).map(|dt| dt.timestamp_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_millisecond_zulu() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert_eq!(now.len(), "2024-05-01T12:00:00.123Z".len());
        assert!(parse_timestamp(&now).is_some());
    }

    #[test]
    fn mixed_precision_compares_by_instant() {
        let micro = sort_key("2024-05-01T12:00:00.123456+00:00").unwrap();
        let milli = sort_key("2024-05-01T12:00:00.123Z").unwrap();
        let later = sort_key("2024-05-01T12:00:00.124Z").unwrap();
        assert!(milli < micro);
        assert!(micro < later);
    }

    #[test]
    fn equal_instants_in_different_precision_are_equal() {
        assert_eq!(
            sort_key("2024-05-01T12:00:00.500000+00:00"),
            sort_key("2024-05-01T12:00:00.5Z")
        );
    }

    #[test]
    fn nanoseconds_are_truncated_to_micros() {
        assert_eq!(
            sort_key("2024-05-01T12:00:00.123456789Z"),
            sort_key("2024-05-01T12:00:00.123456Z")
        );
    }

    #[test]
    fn offsets_are_normalized() {
        assert_eq!(
            sort_key("2024-05-01T14:00:00+02:00"),
            sort_key("2024-05-01T12:00:00Z")
        );
    }

    #[test]
    fn naive_forms_are_utc() {
        assert_eq!(
            sort_key("2024-05-01T12:00:00.25"),
            sort_key("2024-05-01T12:00:00.250Z")
        );
        assert_eq!(
            sort_key("2024-05-01 12:00:00"),
            sort_key("2024-05-01T12:00:00Z")
        );
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(sort_key(""), None);
        assert_eq!(sort_key("yesterday"), None);
        assert_eq!(sort_key("12:30:01 PM"), None);
    }
}
