//! Timestamp helpers for the database layer.
//!
//! Job timestamps (`created_at`, `available_at`, `updated_at`) are stored as
//! `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, TimeZone, Utc};

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a `DateTime<Utc>` to Unix epoch milliseconds.
#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Retention cutoff: the instant `hours` before `now_ms`.
///
/// Rows created strictly before the returned value are past retention.
#[inline]
pub fn hours_before(now_ms: i64, hours: u64) -> i64 {
    let span = i64::try_from(hours)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_HOUR);
    now_ms.saturating_sub(span)
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's supported range clamp to the nearest representable timestamp.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if ms.is_negative() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(ms_to_datetime(datetime_to_ms(dt)), dt);
    }

    #[test]
    fn test_hours_before() {
        let now = 10 * MS_PER_HOUR;
        assert_eq!(hours_before(now, 0), now);
        assert_eq!(hours_before(now, 24), now - 24 * MS_PER_HOUR);
        assert!(hours_before(now, u64::MAX) < 0);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }
}
