// Wall-clock seam for bucket computation
use chrono::{DateTime, Utc};
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// `floor(now / interval)` in milliseconds since the epoch.
pub fn bucket_index(now: DateTime<Utc>, interval: Duration) -> i64 {
    let interval_ms = (interval.as_millis() as i64).max(1);
    now.timestamp_millis().div_euclid(interval_ms)
}

#[cfg(test)]
pub use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bucket_index() {
        let fifteen = Duration::from_secs(15 * 60);
        let t = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let b = bucket_index(t, fifteen);

        assert_eq!(bucket_index(t + chrono::Duration::minutes(14), fifteen), b);
        assert_eq!(bucket_index(t + chrono::Duration::minutes(15), fifteen), b + 1);
        assert_eq!(bucket_index(t, DAY), bucket_index(t + chrono::Duration::hours(11), DAY));
        assert_eq!(bucket_index(t, DAY) + 1, bucket_index(t + chrono::Duration::hours(12), DAY));
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::at(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }
}
