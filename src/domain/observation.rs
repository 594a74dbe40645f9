//! Append-only probe observations.
//!
//! Observations are written to the SQLite backend's `canary_responses` and
//! `cf_cache_responses` tables for later analysis. The engine never reads
//! them back. Failures are logged even without headers (timeouts and
//! transport errors never carry any) under an empty canary target.

use serde::Serialize;

use super::probe::{ProbePhase, ProbeResponse, ProbeTarget};

/// One probe outcome as recorded in the observation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// ISO-8601 timestamp of the probe
    pub timestamp: String,

    pub phase: ProbePhase,

    pub entity_id: String,

    /// Stored `last_status_code` value
    pub status_code: String,

    pub success: bool,

    pub canary_target: Option<String>,

    pub cf_cache_status: Option<String>,
}

impl Observation {
    /// Build an observation from a completed probe
    pub fn from_probe(target: &ProbeTarget, response: &ProbeResponse, timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            phase: target.phase(),
            entity_id: target.entity_id().to_string(),
            status_code: response.status_code_label(),
            success: response.is_success(),
            canary_target: response.canary_target.clone(),
            cf_cache_status: response.cf_cache_status.clone(),
        }
    }

    /// Canary target to log, `""` for a failure that carried no header.
    /// `None` when there is nothing to log.
    pub fn canary_entry(&self) -> Option<&str> {
        match &self.canary_target {
            Some(target) => Some(target.as_str()),
            None if !self.success => Some(""),
            None => None,
        }
    }

    /// Whether this observation produces any log row
    pub fn is_recorded(&self) -> bool {
        self.canary_entry().is_some() || self.cf_cache_status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeFailure;

    fn artist() -> ProbeTarget {
        ProbeTarget::Artist { mbid: "a1".into() }
    }

    #[test]
    fn test_timeout_is_logged_without_headers() {
        let response = ProbeResponse {
            result: Err(ProbeFailure::Timeout),
            canary_target: None,
            cf_cache_status: None,
        };
        let obs = Observation::from_probe(&artist(), &response, "2026-01-01T00:00:00+00:00");

        assert_eq!(obs.status_code, "TIMEOUT");
        assert_eq!(obs.canary_entry(), Some(""));
        assert!(obs.is_recorded());
    }

    #[test]
    fn test_headerless_success_is_not_logged() {
        let response = ProbeResponse {
            result: Ok(200),
            canary_target: None,
            cf_cache_status: None,
        };
        let obs = Observation::from_probe(&artist(), &response, "2026-01-01T00:00:00+00:00");

        assert_eq!(obs.canary_entry(), None);
        assert!(!obs.is_recorded());
    }
}
