//! Staleness (TTL) computation for successful probes.
//!
//! A success older than `cache_recheck_hours` is considered stale and becomes
//! eligible for re-probing. Shared by work selection and reporting.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Timestamp layouts accepted when the value carries no UTC offset
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a stored timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn hours_since(checked: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - checked).num_milliseconds() as f64 / 3_600_000.0
}

/// Whether a success recorded at `last_checked` needs re-probing
pub fn is_stale(last_checked: &str, recheck_hours: f64) -> bool {
    is_stale_at(last_checked, recheck_hours, Utc::now())
}

/// [`is_stale`] against an explicit clock
pub fn is_stale_at(last_checked: &str, recheck_hours: f64, now: DateTime<Utc>) -> bool {
    if recheck_hours <= 0.0 {
        return false;
    }

    match parse_timestamp(last_checked) {
        Some(checked) => hours_since(checked, now) >= recheck_hours,
        // Never checked, or unreadable: re-probe
        None => true,
    }
}

/// Hours left before `last_checked` goes stale, clamped at zero
pub fn hours_until_stale(last_checked: &str, recheck_hours: f64) -> f64 {
    hours_until_stale_at(last_checked, recheck_hours, Utc::now())
}

/// [`hours_until_stale`] against an explicit clock
pub fn hours_until_stale_at(last_checked: &str, recheck_hours: f64, now: DateTime<Utc>) -> f64 {
    if recheck_hours <= 0.0 {
        return 0.0;
    }

    match parse_timestamp(last_checked) {
        Some(checked) => (recheck_hours - hours_since(checked, now)).max(0.0),
        None => 0.0,
    }
}

/// Recheck policy bound to a configured TTL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessScheduler {
    /// TTL in hours, 0 disables rechecks
    pub recheck_hours: f64,
}

impl StalenessScheduler {
    pub fn new(recheck_hours: f64) -> Self {
        Self { recheck_hours }
    }

    /// Whether successful entities are ever re-probed
    pub fn enabled(&self) -> bool {
        self.recheck_hours > 0.0
    }

    pub fn is_stale(&self, last_checked: &str, now: DateTime<Utc>) -> bool {
        is_stale_at(last_checked, self.recheck_hours, now)
    }

    pub fn hours_until_stale(&self, last_checked: &str, now: DateTime<Utc>) -> f64 {
        hours_until_stale_at(last_checked, self.recheck_hours, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_disabled_never_stale() {
        assert!(!is_stale_at("", 0.0, now()));
        assert!(!is_stale_at("garbage", -5.0, now()));
        assert_eq!(hours_until_stale_at("", 0.0, now()), 0.0);
    }

    #[test]
    fn test_empty_and_unparsable_are_stale() {
        assert!(is_stale_at("", 24.0, now()));
        assert!(is_stale_at("not a date", 24.0, now()));
        assert_eq!(hours_until_stale_at("not a date", 24.0, now()), 0.0);
    }

    #[test]
    fn test_accepts_z_offset_and_naive() {
        let z = "2024-06-01T10:00:00Z";
        let offset = "2024-06-01T10:00:00+00:00";
        let naive = "2024-06-01T10:00:00";
        let naive_micros = "2024-06-01T10:00:00.123456";
        let spaced = "2024-06-01 10:00:00";

        for value in [z, offset, naive, naive_micros, spaced] {
            assert!(parse_timestamp(value).is_some(), "failed to parse {}", value);
            assert!(!is_stale_at(value, 3.0, now()), "{} should be fresh", value);
            assert!(is_stale_at(value, 2.0, now()), "{} should be stale", value);
        }
    }

    #[test]
    fn test_hours_until_stale_counts_down() {
        let checked = (now() - Duration::hours(10)).to_rfc3339();
        let remaining = hours_until_stale_at(&checked, 24.0, now());
        assert!((remaining - 14.0).abs() < 1e-6);

        // Already stale clamps at zero
        assert_eq!(hours_until_stale_at(&checked, 5.0, now()), 0.0);
    }

    #[test]
    fn test_monotonic_in_recheck_hours() {
        let checked = (now() - Duration::hours(50)).to_rfc3339();
        let mut previous = true;
        for hours in [1.0, 10.0, 49.0, 50.0, 51.0, 100.0] {
            let stale = is_stale_at(&checked, hours, now());
            // Once fresh, larger TTLs stay fresh
            assert!(previous || !stale);
            previous = stale;
        }
        assert!(is_stale_at(&checked, 50.0, now()));
        assert!(!is_stale_at(&checked, 51.0, now()));
    }

    #[test]
    fn test_scheduler_wrapper() {
        let scheduler = StalenessScheduler::new(72.0);
        assert!(scheduler.enabled());
        let checked = (now() - Duration::hours(73)).to_rfc3339();
        assert!(scheduler.is_stale(&checked, now()));
        assert!(!StalenessScheduler::new(0.0).enabled());
    }
}
