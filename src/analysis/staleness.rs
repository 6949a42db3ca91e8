/// Reading timestamp handling and staleness detection.
///
/// NWIS instantaneous values carry a UTC offset
/// (`2024-05-01T12:00:00.000-05:00`) while daily values do not
/// (`2024-05-01T00:00:00.000`). Both are accepted here; offset-less stamps
/// are read as UTC.
///
/// # Clock injection
/// All functions accept a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally. This makes window and staleness checks purely
/// deterministic in tests without mocking or time manipulation.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses an NWIS timestamp. Returns `None` for anything unrecognized.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Returns `true` if `timestamp` is older than `max_age_minutes` relative
/// to `now`.
///
/// Staleness is defined as strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
///
/// Returns an error if the timestamp cannot be parsed.
/// Callers should treat parse failures as stale (fail-safe default).
pub fn is_stale_at(timestamp: &str, max_age_minutes: u64, now: DateTime<Utc>) -> Result<bool, String> {
    let reading_time =
        parse_timestamp(timestamp).ok_or_else(|| format!("unparseable timestamp '{}'", timestamp))?;
    let age_minutes = (now - reading_time).num_minutes();
    Ok(age_minutes > max_age_minutes as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// A fixed "now" used across all tests: 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_value_timestamp_without_offset_is_utc() {
        let parsed = parse_timestamp("2024-05-01T00:00:00.000").expect("dv stamp parses");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_reading_with_central_time_offset_parsed_correctly() {
        // 2024-05-01T08:00:00-05:00 == 2024-05-01T13:00:00Z, exactly 0 min old.
        let stale = is_stale_at("2024-05-01T08:00:00.000-05:00", 15, fixed_now())
            .expect("timezone-offset datetime should parse correctly");
        assert!(!stale, "reading from 0 minutes ago should not be stale");
    }

    #[test]
    fn test_reading_exactly_at_threshold_is_not_stale() {
        let stale = is_stale_at("2024-05-01T12:45:00.000+00:00", 15, fixed_now()).unwrap();
        assert!(!stale, "staleness is strictly greater than, not >=");
    }

    #[test]
    fn test_reading_one_minute_past_threshold_is_stale() {
        let stale = is_stale_at("2024-05-01T12:44:00.000+00:00", 15, fixed_now()).unwrap();
        assert!(stale, "16-minute-old reading should be stale with 15-min threshold");
    }

    #[test]
    fn test_invalid_datetime_returns_error() {
        assert!(is_stale_at("not-a-datetime", 15, fixed_now()).is_err());
        assert!(is_stale_at("", 15, fixed_now()).is_err());
    }
}
