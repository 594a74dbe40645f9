//! Probe targets and classified probe outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::records::{STATUS_HTTP_ERROR, STATUS_SUCCESS, STATUS_TIMEOUT, STATUS_TRANSPORT_ERROR};

/// Pseudo status code stored when a probe timed out
pub const CODE_TIMEOUT: &str = "TIMEOUT";

/// Processing phase a probe belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePhase {
    /// Direct artist lookup by MBID
    ArtistMbid,

    /// Free-text search on the artist name
    TextSearch,

    /// Direct release-group lookup by MBID
    ReleaseGroup,
}

impl ProbePhase {
    /// Operation label used in the observation log
    pub fn operation_type(&self) -> &'static str {
        match self {
            ProbePhase::ArtistMbid => "mbid_check",
            ProbePhase::TextSearch => "text_search",
            ProbePhase::ReleaseGroup => "rg_check",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ProbePhase::ArtistMbid | ProbePhase::TextSearch => EntityType::Artist,
            ProbePhase::ReleaseGroup => EntityType::ReleaseGroup,
        }
    }
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProbePhase::ArtistMbid => "artists",
            ProbePhase::TextSearch => "text-search",
            ProbePhase::ReleaseGroup => "release-groups",
        };
        f.write_str(label)
    }
}

/// Kind of entity an observation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Artist,
    ReleaseGroup,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Artist => "artist",
            EntityType::ReleaseGroup => "release_group",
        }
    }
}

/// What a single probe asks the target API for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// `GET /artist/{mbid}`
    Artist { mbid: String },

    /// `GET /album/{rg_mbid}`
    ReleaseGroup { rg_mbid: String },

    /// `GET /search?type=all&query=...`, results credited to `artist_mbid`
    TextSearch { artist_mbid: String, query: String },
}

impl ProbeTarget {
    pub fn phase(&self) -> ProbePhase {
        match self {
            ProbeTarget::Artist { .. } => ProbePhase::ArtistMbid,
            ProbeTarget::ReleaseGroup { .. } => ProbePhase::ReleaseGroup,
            ProbeTarget::TextSearch { .. } => ProbePhase::TextSearch,
        }
    }

    /// Ledger key of the record this probe updates
    pub fn entity_id(&self) -> &str {
        match self {
            ProbeTarget::Artist { mbid } => mbid,
            ProbeTarget::ReleaseGroup { rg_mbid } => rg_mbid,
            ProbeTarget::TextSearch { artist_mbid, .. } => artist_mbid,
        }
    }
}

/// Why a probe did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Classified result of one probe plus the cache headers it returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status of a 2xx response, or the failure
    pub result: Result<u16, ProbeFailure>,

    /// `x-canary-response-target` header, if present
    pub canary_target: Option<String>,

    /// `cf-cache-status` header, if present
    pub cf_cache_status: Option<String>,
}

impl ProbeResponse {
    /// Classify an HTTP status code
    pub fn from_status(code: u16) -> Self {
        let result = if (200..300).contains(&code) {
            Ok(code)
        } else {
            Err(ProbeFailure::HttpStatus(code))
        };
        Self {
            result,
            canary_target: None,
            cf_cache_status: None,
        }
    }

    pub fn failure(failure: ProbeFailure) -> Self {
        Self {
            result: Err(failure),
            canary_target: None,
            cf_cache_status: None,
        }
    }

    /// Attach cache headers, dropping blank values
    pub fn with_headers(mut self, canary_target: Option<String>, cf_cache_status: Option<String>) -> Self {
        self.canary_target = canary_target.filter(|v| !v.trim().is_empty());
        self.cf_cache_status = cf_cache_status.filter(|v| !v.trim().is_empty());
        self
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Value stored in `last_status_code`
    pub fn status_code_label(&self) -> String {
        match &self.result {
            Ok(code) => code.to_string(),
            Err(ProbeFailure::HttpStatus(code)) => code.to_string(),
            Err(ProbeFailure::Timeout) => CODE_TIMEOUT.to_string(),
            Err(ProbeFailure::Transport(reason)) => format!("EXC:{}", reason),
        }
    }

    /// Value stored in `status`
    pub fn status_tag(&self) -> &'static str {
        match &self.result {
            Ok(_) => STATUS_SUCCESS,
            Err(ProbeFailure::HttpStatus(_)) => STATUS_HTTP_ERROR,
            Err(ProbeFailure::Timeout) => STATUS_TIMEOUT,
            Err(ProbeFailure::Transport(_)) => STATUS_TRANSPORT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let ok = ProbeResponse::from_status(204);
        assert!(ok.is_success());
        assert_eq!(ok.status_tag(), "success");
        assert_eq!(ok.status_code_label(), "204");

        let unavailable = ProbeResponse::from_status(503);
        assert_eq!(unavailable.result, Err(ProbeFailure::HttpStatus(503)));
        assert_eq!(unavailable.status_tag(), "http_error");
        assert_eq!(unavailable.status_code_label(), "503");

        let timeout = ProbeResponse::failure(ProbeFailure::Timeout);
        assert_eq!(timeout.status_tag(), "timeout");
        assert_eq!(timeout.status_code_label(), "TIMEOUT");

        let transport = ProbeResponse::failure(ProbeFailure::Transport("connect".into()));
        assert_eq!(transport.status_tag(), "transport_error");
        assert_eq!(transport.status_code_label(), "EXC:connect");
    }

    #[test]
    fn test_blank_headers_are_dropped() {
        let response = ProbeResponse::from_status(200)
            .with_headers(Some("  ".into()), Some("HIT".into()));
        assert_eq!(response.canary_target, None);
        assert_eq!(response.cf_cache_status.as_deref(), Some("HIT"));
    }

    #[test]
    fn test_target_phase_and_entity() {
        let search = ProbeTarget::TextSearch {
            artist_mbid: "abc".into(),
            query: "Some Artist".into(),
        };
        assert_eq!(search.phase(), ProbePhase::TextSearch);
        assert_eq!(search.entity_id(), "abc");
        assert_eq!(search.phase().entity_type(), EntityType::Artist);
        assert_eq!(ProbePhase::ReleaseGroup.operation_type(), "rg_check");
    }
}
