//! Work selection for each probe phase.
//!
//! Selection runs once per phase, before the pool starts. An entity
//! qualifies when it is not yet a success, when the phase is forced, or
//! when it is a stale success. Entities that used up their attempt cap are
//! skipped unless forced.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use deunicode::{deunicode, deunicode_char};
use regex::Regex;

use crate::domain::{ProbeTarget, ReleaseGroupLedger};

use super::ledger::Ledger;
use super::staleness::StalenessScheduler;

/// Eligibility rules for one phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Attempt cap for the phase
    pub max_attempts: u32,

    /// Ignore status and cap
    pub force: bool,

    pub staleness: StalenessScheduler,
}

impl SelectionPolicy {
    pub fn new(max_attempts: u32, force: bool, recheck_hours: f64) -> Self {
        Self {
            max_attempts,
            force,
            staleness: StalenessScheduler::new(recheck_hours),
        }
    }

    /// Whether a record with this state should be probed
    pub fn qualifies(&self, success: bool, attempts: u32, last_checked: &str, now: DateTime<Utc>) -> bool {
        if self.force {
            return true;
        }
        if attempts >= self.max_attempts {
            return false;
        }
        !success || (self.staleness.enabled() && self.staleness.is_stale(last_checked, now))
    }
}

// ============================================================================
// Text-search normalization
// ============================================================================

/// How artist names become search queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextSearchOptions {
    pub lowercase: bool,

    /// Transliterate to ASCII, then replace what is not a word character,
    /// whitespace, hyphen or dot with a space
    pub transliterate_unicode: bool,

    /// Deprecated. Strips Latin diacritics, turns separators into spaces and
    /// drops everything else that is not ASCII alphanumeric, so non-Latin
    /// names are lost. Ignored when `transliterate_unicode` is set.
    pub remove_symbols: bool,
}

impl TextSearchOptions {
    /// Whether the deprecated symbol stripping actually applies
    pub fn uses_deprecated_symbol_removal(&self) -> bool {
        self.remove_symbols && !self.transliterate_unicode
    }
}

// Patterns are literals; `None` only if the regex engine rejects them
static SEARCH_UNSAFE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\w\s\-\.]").ok());
static SEPARATORS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("[-_./\u{2010}\u{2011}\u{2013}\u{2014}]+").ok());
static NON_ALPHANUMERIC: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s]").ok());

fn replace_all(pattern: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Fold accented Latin letters to ASCII, leaving other scripts alone
fn strip_latin_diacritics(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}' => {
                folded.push_str(deunicode_char(c).unwrap_or(""));
            }
            _ => folded.push(c),
        }
    }
    folded
}

/// Search query for an artist name: normalized per `options`, trimmed,
/// inner whitespace collapsed
pub fn text_search_query(name: &str, options: &TextSearchOptions) -> String {
    let mut query = name.trim().to_string();

    if options.transliterate_unicode {
        query = replace_all(&SEARCH_UNSAFE, &deunicode(&query), " ");
    } else if options.remove_symbols {
        query = strip_latin_diacritics(&query);
        query = replace_all(&SEPARATORS, &query, " ");
        query = replace_all(&NON_ALPHANUMERIC, &query, "");
    }

    let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if options.lowercase {
        query.to_lowercase()
    } else {
        query
    }
}

/// Artists for the MBID phase, ordered by name then MBID
pub fn select_artists(ledger: &Ledger, policy: &SelectionPolicy, now: DateTime<Utc>) -> Vec<ProbeTarget> {
    let mut selected: Vec<_> = ledger
        .artists
        .values()
        .filter(|a| policy.qualifies(a.is_success(), a.attempts, &a.last_checked, now))
        .collect();
    selected.sort_by(|a, b| (&a.artist_name, &a.mbid).cmp(&(&b.artist_name, &b.mbid)));

    selected
        .into_iter()
        .map(|a| ProbeTarget::Artist { mbid: a.mbid.clone() })
        .collect()
}

/// Artists for the text-search phase. Nameless artists cannot be searched.
pub fn select_text_searches(
    ledger: &Ledger,
    policy: &SelectionPolicy,
    options: &TextSearchOptions,
    now: DateTime<Utc>,
) -> Vec<ProbeTarget> {
    let mut selected: Vec<_> = ledger
        .artists
        .values()
        .filter(|a| !a.artist_name.trim().is_empty())
        .filter(|a| {
            policy.qualifies(
                a.text_search_success,
                a.text_search_attempts,
                &a.text_search_last_checked,
                now,
            )
        })
        .collect();
    selected.sort_by(|a, b| (&a.artist_name, &a.mbid).cmp(&(&b.artist_name, &b.mbid)));

    selected
        .into_iter()
        .map(|a| ProbeTarget::TextSearch {
            artist_mbid: a.mbid.clone(),
            query: text_search_query(&a.artist_name, options),
        })
        .collect()
}

/// Release groups whose artist is warm, ordered by artist, title, id
pub fn select_release_groups(
    release_groups: &ReleaseGroupLedger,
    policy: &SelectionPolicy,
    now: DateTime<Utc>,
) -> Vec<ProbeTarget> {
    let mut selected: Vec<_> = release_groups
        .values()
        .filter(|rg| rg.artist_is_cached())
        .filter(|rg| policy.qualifies(rg.is_success(), rg.attempts, &rg.last_checked, now))
        .collect();
    selected.sort_by(|a, b| {
        (&a.artist_name, &a.rg_title, &a.rg_mbid).cmp(&(&b.artist_name, &b.rg_title, &b.rg_mbid))
    });

    selected
        .into_iter()
        .map(|rg| ProbeTarget::ReleaseGroup {
            rg_mbid: rg.rg_mbid.clone(),
        })
        .collect()
}
