//! Ledger records.
//!
//! One record per artist and per release group. Records are created the
//! first time an entity is seen, mutated in place by every probe and never
//! deleted by the engine.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Status value written after a successful probe
pub const STATUS_SUCCESS: &str = "success";

/// Status value written after a probe timed out
pub const STATUS_TIMEOUT: &str = "timeout";

/// Status value written after a non-2xx response
pub const STATUS_HTTP_ERROR: &str = "http_error";

/// Status value written after a transport failure
pub const STATUS_TRANSPORT_ERROR: &str = "transport_error";

/// Title given to manually injected release groups
pub const MANUAL_RG_TITLE: &str = "Manual Entry";

/// Artist ledger keyed by MBID
pub type ArtistLedger = HashMap<String, ArtistRecord>;

/// Release-group ledger keyed by release-group MBID
pub type ReleaseGroupLedger = HashMap<String, ReleaseGroupRecord>;

/// Normalize a status value for storage and comparison
pub fn normalize_status(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Current UTC time as an ISO-8601 string
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Per-artist processing state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    /// MusicBrainz artist id
    pub mbid: String,

    /// Display name as reported by the library manager
    pub artist_name: String,

    /// Normalized status of the last MBID probe ("" until probed)
    pub status: String,

    /// MBID probes issued so far
    pub attempts: u32,

    /// HTTP code of the last MBID probe, or TIMEOUT / EXC:<reason>
    pub last_status_code: String,

    /// ISO-8601 timestamp of the last MBID probe
    pub last_checked: String,

    pub text_search_attempted: bool,

    pub text_search_success: bool,

    pub text_search_last_checked: String,

    /// Text-search probes issued so far
    pub text_search_attempts: u32,

    /// Injected from the manual entries file
    pub manual_entry: bool,

    /// Last value of the x-canary-response-target header
    pub last_canary_target: String,

    /// Last value of the cf-cache-status header
    pub last_cf_cache_status: String,
}

impl ArtistRecord {
    /// Create a fresh, never-probed record
    pub fn new(mbid: impl Into<String>, artist_name: impl Into<String>) -> Self {
        Self {
            mbid: mbid.into(),
            artist_name: artist_name.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Per-release-group processing state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseGroupRecord {
    /// MusicBrainz release-group id
    pub rg_mbid: String,

    pub rg_title: String,

    /// Owning artist (reference only, the artist may be absent from the ledger)
    pub artist_mbid: String,

    pub artist_name: String,

    /// Copy of the artist's status as of the last propagation
    pub artist_cache_status: String,

    pub status: String,

    pub attempts: u32,

    pub last_status_code: String,

    pub last_checked: String,

    pub manual_entry: bool,

    pub last_canary_target: String,

    pub last_cf_cache_status: String,
}

impl ReleaseGroupRecord {
    /// Create a fresh, never-probed record
    pub fn new(
        rg_mbid: impl Into<String>,
        rg_title: impl Into<String>,
        artist_mbid: impl Into<String>,
        artist_name: impl Into<String>,
    ) -> Self {
        Self {
            rg_mbid: rg_mbid.into(),
            rg_title: rg_title.into(),
            artist_mbid: artist_mbid.into(),
            artist_name: artist_name.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Whether the owning artist was warm at the last propagation
    pub fn artist_is_cached(&self) -> bool {
        self.artist_cache_status == STATUS_SUCCESS
    }
}
