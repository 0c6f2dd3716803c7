//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a `DateTime<Utc>`, clamping out-of-range values.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None if ms.is_negative() => DateTime::<Utc>::MIN_UTC,
        chrono::LocalResult::None => DateTime::<Utc>::MAX_UTC,
    }
}

/// The epoch-millisecond instant `age` before `now`.
#[inline]
pub fn ms_before(now: i64, age: Duration) -> i64 {
    let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(age_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip() {
        let now = now_ms();
        assert_eq!(ms_to_datetime(now).timestamp_millis(), now);
    }

    #[test]
    fn test_ms_before() {
        assert_eq!(ms_before(600_000, Duration::from_secs(300)), 300_000);
        assert_eq!(ms_before(i64::MIN, Duration::from_secs(1)), i64::MIN);
    }
}
