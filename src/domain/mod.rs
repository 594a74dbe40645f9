//! Domain types for the cache warmer.
//!
//! This module contains the core data structures:
//! - Records: Per-artist and per-release-group ledger state
//! - Probe: Targets and classified outcomes of probe requests
//! - Observation: Append-only log rows for canary and CDN headers

pub mod observation;
pub mod probe;
pub mod records;

// Re-export commonly used types
pub use observation::Observation;
pub use probe::{EntityType, ProbeFailure, ProbePhase, ProbeResponse, ProbeTarget, CODE_TIMEOUT};
pub use records::{
    iso_now, normalize_status, ArtistLedger, ArtistRecord, ReleaseGroupLedger, ReleaseGroupRecord,
    MANUAL_RG_TITLE, STATUS_HTTP_ERROR, STATUS_SUCCESS, STATUS_TIMEOUT, STATUS_TRANSPORT_ERROR,
};
