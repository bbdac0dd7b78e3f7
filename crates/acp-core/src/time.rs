//! Timestamp encoding shared by the store and its callers
//!
//! Timestamps are persisted as RFC 3339 UTC strings with a fixed microsecond
//! precision, so lexical order equals chronological order inside SQL.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AcpError, Result};

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AcpError::Parse(format!("invalid timestamp {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_is_fixed_width_and_ordered() {
        let earlier = Utc::now();
        let later = earlier + Duration::milliseconds(1);
        let (a, b) = (format_ts(earlier), format_ts(later));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }

    #[test]
    fn test_parse_round_trip() {
        let ts = parse_ts("2026-01-02T03:04:05.123456Z").unwrap();
        assert_eq!(format_ts(ts), "2026-01-02T03:04:05.123456Z");
        assert!(parse_ts("yesterday").is_err());
    }
}
