//! Ledger statistics for the `stats` command.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{Ledger, StalenessScheduler};
use crate::domain::STATUS_TIMEOUT;

/// Status counts for one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EntityCounts {
    pub total: usize,
    pub success: usize,
    pub timeout: usize,
    /// Any other failure tag
    pub failed: usize,
    /// Never probed
    pub pending: usize,
    /// Successes past the recheck TTL
    pub stale: usize,
    pub manual: usize,
    /// Non-successes at or over the attempt cap
    pub exhausted: usize,
    /// Soonest time a fresh success goes stale
    pub next_recheck_hours: Option<f64>,
}

impl EntityCounts {
    pub fn success_rate(&self) -> f64 {
        percent(self.success, self.total)
    }

    fn track_recheck(&mut self, hours: f64) {
        if hours > 0.0 && self.next_recheck_hours.map_or(true, |h| hours < h) {
            self.next_recheck_hours = Some(hours);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TextSearchCounts {
    /// Artists with a searchable name
    pub searchable: usize,
    pub attempted: usize,
    pub success: usize,
    pub stale: usize,
    pub exhausted: usize,
}

/// Attempt caps used to count exhausted records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCaps {
    pub artists: u32,
    pub text_search: u32,
    pub release_groups: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerReport {
    pub recheck_hours: f64,
    pub artists: EntityCounts,
    pub text_search: TextSearchCounts,
    pub release_groups: EntityCounts,
    /// Release groups whose artist is warm
    pub release_groups_eligible: usize,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn count_status(counts: &mut EntityCounts, status: &str) {
    match status {
        "" => counts.pending += 1,
        s if s == STATUS_TIMEOUT => counts.timeout += 1,
        _ => counts.failed += 1,
    }
}

/// Summarize the ledger as of `now`
pub fn build_report(ledger: &Ledger, caps: AttemptCaps, recheck_hours: f64, now: DateTime<Utc>) -> LedgerReport {
    let staleness = StalenessScheduler::new(recheck_hours);
    let mut artists = EntityCounts::default();
    let mut text_search = TextSearchCounts::default();

    for a in ledger.artists.values() {
        artists.total += 1;
        if a.manual_entry {
            artists.manual += 1;
        }
        if a.is_success() {
            artists.success += 1;
            if staleness.enabled() {
                if staleness.is_stale(&a.last_checked, now) {
                    artists.stale += 1;
                } else {
                    artists.track_recheck(staleness.hours_until_stale(&a.last_checked, now));
                }
            }
        } else {
            count_status(&mut artists, &a.status);
            if a.attempts >= caps.artists {
                artists.exhausted += 1;
            }
        }

        if !a.artist_name.trim().is_empty() {
            text_search.searchable += 1;
        }
        if a.text_search_attempted {
            text_search.attempted += 1;
        }
        if a.text_search_success {
            text_search.success += 1;
            if staleness.enabled() {
                if staleness.is_stale(&a.text_search_last_checked, now) {
                    text_search.stale += 1;
                } else {
                    artists.track_recheck(staleness.hours_until_stale(&a.text_search_last_checked, now));
                }
            }
        } else if a.text_search_attempts >= caps.text_search {
            text_search.exhausted += 1;
        }
    }

    let mut release_groups = EntityCounts::default();
    let mut release_groups_eligible = 0;
    for rg in ledger.release_groups.values() {
        release_groups.total += 1;
        if rg.manual_entry {
            release_groups.manual += 1;
        }
        if rg.artist_is_cached() {
            release_groups_eligible += 1;
        }
        if rg.is_success() {
            release_groups.success += 1;
            if staleness.enabled() {
                if staleness.is_stale(&rg.last_checked, now) {
                    release_groups.stale += 1;
                } else {
                    release_groups.track_recheck(staleness.hours_until_stale(&rg.last_checked, now));
                }
            }
        } else {
            count_status(&mut release_groups, &rg.status);
            if rg.attempts >= caps.release_groups {
                release_groups.exhausted += 1;
            }
        }
    }

    LedgerReport {
        recheck_hours,
        artists,
        text_search,
        release_groups,
        release_groups_eligible,
    }
}

fn write_counts(f: &mut fmt::Formatter<'_>, counts: &EntityCounts) -> fmt::Result {
    writeln!(f, "  Total:     {}", counts.total)?;
    writeln!(f, "  Success:   {} ({:.1}%)", counts.success, counts.success_rate())?;
    writeln!(f, "  Timeout:   {}", counts.timeout)?;
    writeln!(f, "  Failed:    {}", counts.failed)?;
    writeln!(f, "  Pending:   {}", counts.pending)?;
    writeln!(f, "  Exhausted: {}", counts.exhausted)?;
    if counts.manual > 0 {
        writeln!(f, "  Manual:    {}", counts.manual)?;
    }
    Ok(())
}

impl fmt::Display for LedgerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Artists")?;
        write_counts(f, &self.artists)?;

        writeln!(f, "Text search")?;
        writeln!(f, "  Searchable: {}", self.text_search.searchable)?;
        writeln!(
            f,
            "  Attempted:  {} ({} pending)",
            self.text_search.attempted,
            self.text_search.searchable.saturating_sub(self.text_search.attempted)
        )?;
        writeln!(
            f,
            "  Success:    {} ({:.1}% of attempted)",
            self.text_search.success,
            percent(self.text_search.success, self.text_search.attempted)
        )?;
        writeln!(f, "  Exhausted:  {}", self.text_search.exhausted)?;

        writeln!(f, "Release groups")?;
        write_counts(f, &self.release_groups)?;
        writeln!(f, "  Eligible:  {} (artist cached)", self.release_groups_eligible)?;

        if self.recheck_hours > 0.0 {
            writeln!(f, "Recheck every {}h", self.recheck_hours)?;
            writeln!(
                f,
                "  Stale: {} artists, {} text searches, {} release groups",
                self.artists.stale, self.text_search.stale, self.release_groups.stale
            )?;
            let next = [self.artists.next_recheck_hours, self.release_groups.next_recheck_hours]
                .into_iter()
                .flatten()
                .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.min(h))));
            if let Some(hours) = next {
                writeln!(f, "  Next recheck in {:.1}h", hours)?;
            }
        } else {
            writeln!(f, "Recheck disabled")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtistRecord, ReleaseGroupRecord};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    const CAPS: AttemptCaps = AttemptCaps {
        artists: 3,
        text_search: 3,
        release_groups: 3,
    };

    fn artist(mbid: &str, status: &str, attempts: u32, hours_ago: i64) -> ArtistRecord {
        ArtistRecord {
            status: status.to_string(),
            attempts,
            last_checked: (now() - Duration::hours(hours_ago)).to_rfc3339(),
            ..ArtistRecord::new(mbid, format!("Artist {}", mbid))
        }
    }

    #[test]
    fn test_counts_and_staleness() {
        let mut ledger = Ledger::default();
        for record in [
            artist("a", "success", 1, 100),
            artist("b", "success", 1, 10),
            artist("c", "timeout", 3, 1),
            artist("d", "http_error", 1, 1),
            artist("e", "", 0, 0),
        ] {
            ledger.artists.insert(record.mbid.clone(), record);
        }
        let mut rg = ReleaseGroupRecord::new("r1", "Album", "a", "Artist a");
        rg.artist_cache_status = "success".to_string();
        ledger.release_groups.insert("r1".into(), rg);

        let report = build_report(&ledger, CAPS, 72.0, now());

        assert_eq!(report.artists.total, 5);
        assert_eq!(report.artists.success, 2);
        assert_eq!(report.artists.timeout, 1);
        assert_eq!(report.artists.failed, 1);
        assert_eq!(report.artists.pending, 1);
        assert_eq!(report.artists.exhausted, 1);
        assert_eq!(report.artists.stale, 1);
        assert_eq!(report.artists.next_recheck_hours, Some(62.0));
        assert_eq!(report.text_search.searchable, 5);
        assert_eq!(report.release_groups.pending, 1);
        assert_eq!(report.release_groups_eligible, 1);

        let rendered = report.to_string();
        assert!(rendered.contains("Eligible:  1"));
        assert!(rendered.contains("Next recheck in 62.0h"));
    }

    #[test]
    fn test_recheck_disabled() {
        let mut ledger = Ledger::default();
        let record = artist("a", "success", 1, 1000);
        ledger.artists.insert("a".into(), record);

        let report = build_report(&ledger, CAPS, 0.0, now());
        assert_eq!(report.artists.stale, 0);
        assert_eq!(report.artists.next_recheck_hours, None);
        assert!(report.to_string().contains("Recheck disabled"));
    }
}
