//! Adapter interfaces for external systems.
//!
//! Two seams keep the engine independent of HTTP details:
//! - [`LibraryManager`]: the music library (Lidarr) that owns the entity set
//! - [`Prober`]: the metadata API whose cache is being warmed

pub mod lidarr;
pub mod probe;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ProbeResponse, ProbeTarget};

// Re-export the HTTP implementations
pub use lidarr::LidarrClient;
pub use probe::HttpProber;

/// Artist as reported by the library manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryArtist {
    /// Library-internal id, used for refresh requests
    pub id: Option<i64>,

    pub name: String,

    pub mbid: String,
}

/// Release group (album) as reported by the library manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryReleaseGroup {
    pub rg_mbid: String,

    pub rg_title: String,

    pub artist_mbid: String,

    pub artist_name: String,
}

/// Source of the entity set and target of refresh requests
#[async_trait]
pub trait LibraryManager: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// All artists with an MBID
    async fn get_artists(&self) -> Result<Vec<LibraryArtist>>;

    /// All release groups with an MBID
    async fn get_release_groups(&self) -> Result<Vec<LibraryReleaseGroup>>;

    /// Ask the library to refresh one artist's metadata
    async fn refresh_artist(&self, artist_id: i64) -> Result<()>;
}

/// Issues probe requests against the metadata API
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Issue one probe. Never fails: every outcome is classified.
    async fn probe(&self, target: &ProbeTarget) -> ProbeResponse;

    /// Pre-flight reachability check
    async fn health_check(&self) -> Result<()>;
}
