//! Lidarr API client.
//!
//! Lidarr has moved its API between releases, so every resource is tried
//! under `/api/v1`, `/api` and `/api/v3` in that order; a 404 moves on to
//! the next prefix. Auth: `X-Api-Key` header.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::LidarrSettings;

use super::{LibraryArtist, LibraryManager, LibraryReleaseGroup};

/// API prefixes tried in order
const API_PREFIXES: [&str; 3] = ["/api/v1", "/api", "/api/v3"];

/// Command endpoints tried in order for refresh requests
const COMMAND_PATHS: [&str; 2] = ["/api/v1/command", "/api/command"];

/// Refresh requests are fire-and-forget
const REFRESH_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtistResource {
    id: Option<i64>,
    foreign_artist_id: Option<String>,
    mb_id: Option<String>,
    mbid: Option<String>,
    artist_name: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumArtistResource {
    foreign_artist_id: Option<String>,
    artist_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumResource {
    foreign_album_id: Option<String>,
    title: Option<String>,
    artist: Option<AlbumArtistResource>,
}

/// First non-blank value, trimmed
fn first_present(values: [Option<&String>; 3]) -> Option<String> {
    values
        .into_iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Lidarr library-manager client
pub struct LidarrClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl LidarrClient {
    /// Create a client from settings
    pub fn new(settings: &LidarrSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .build()
            .context("Failed to build Lidarr HTTP client")?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            client,
        })
    }

    /// GET a list resource, falling back through the known API prefixes
    async fn get_list<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>> {
        for prefix in API_PREFIXES {
            let url = format!("{}{}/{}", self.base_url, prefix, resource);
            let response = self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await
                .with_context(|| format!("Failed to reach Lidarr at {}", url))?;

            if response.status() == StatusCode::NOT_FOUND {
                debug!(%url, "Lidarr endpoint not found, trying next prefix");
                continue;
            }

            let response = response
                .error_for_status()
                .with_context(|| format!("Lidarr returned an error for {}", url))?;

            return response
                .json::<Vec<T>>()
                .await
                .with_context(|| format!("Failed to parse Lidarr response from {}", url));
        }

        anyhow::bail!("No Lidarr endpoint found for '{}' under {}", resource, self.base_url)
    }
}

#[async_trait]
impl LibraryManager for LidarrClient {
    fn name(&self) -> &str {
        "lidarr"
    }

    async fn get_artists(&self) -> Result<Vec<LibraryArtist>> {
        let resources: Vec<ArtistResource> = self.get_list("artist").await?;
        let fetched = resources.len();

        let artists: Vec<LibraryArtist> = resources
            .into_iter()
            .filter_map(|a| {
                let mbid = first_present([a.foreign_artist_id.as_ref(), a.mb_id.as_ref(), a.mbid.as_ref()])?;
                let name = a
                    .artist_name
                    .or(a.name)
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                Some(LibraryArtist {
                    id: a.id,
                    name,
                    mbid: mbid.to_lowercase(),
                })
            })
            .collect();

        info!(fetched, with_mbid = artists.len(), "Fetched artists from Lidarr");
        Ok(artists)
    }

    async fn get_release_groups(&self) -> Result<Vec<LibraryReleaseGroup>> {
        let resources: Vec<AlbumResource> = self.get_list("album").await?;
        let fetched = resources.len();

        let release_groups: Vec<LibraryReleaseGroup> = resources
            .into_iter()
            .filter_map(|album| {
                let rg_mbid = first_present([album.foreign_album_id.as_ref(), None, None])?;
                let artist = album.artist?;
                let artist_mbid = first_present([artist.foreign_artist_id.as_ref(), None, None])?;
                Some(LibraryReleaseGroup {
                    rg_mbid: rg_mbid.to_lowercase(),
                    rg_title: album.title.unwrap_or_default(),
                    artist_mbid: artist_mbid.to_lowercase(),
                    artist_name: artist.artist_name.unwrap_or_default(),
                })
            })
            .collect();

        info!(
            fetched,
            with_mbid = release_groups.len(),
            "Fetched release groups from Lidarr"
        );
        Ok(release_groups)
    }

    async fn refresh_artist(&self, artist_id: i64) -> Result<()> {
        let body = serde_json::json!({
            "name": "RefreshArtist",
            "artistIds": [artist_id],
        });

        for path in COMMAND_PATHS {
            let url = format!("{}{}", self.base_url, path);
            let response = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .json(&body)
                .timeout(REFRESH_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(r) if r.status().is_success() => {
                    debug!(artist_id, "Requested Lidarr artist refresh");
                    return Ok(());
                }
                Ok(r) => debug!(artist_id, status = %r.status(), %url, "Refresh endpoint rejected request"),
                Err(e) => debug!(artist_id, %url, "Refresh request failed: {}", e),
            }
        }

        anyhow::bail!("Lidarr refused refresh for artist {}", artist_id)
    }
}
