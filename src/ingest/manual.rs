//! Manual entries file.
//!
//! Lets the user warm artists and release groups the library manager does
//! not know about. The file maps artist MBIDs to a name and an optional list
//! of release-group MBIDs:
//!
//! ```yaml
//! 0383dadf-2a4e-4d10-a46a-e9e041da8eb3:
//!   name: Queen
//!   release-groups:
//!     - 2b1b2a8c-4d3e-3c0f-a7a8-5b8c5b0f8e55
//! ```
//!
//! The whole file is validated before anything is injected; one bad entry
//! rejects the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ManualEntriesError {
    #[error("Failed to read manual entries {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in manual entries {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Manual entries rejected:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Shape of one artist entry as written in the file
#[derive(Debug, Default, Deserialize)]
struct RawArtistEntry {
    name: Option<String>,

    #[serde(rename = "release-groups", default)]
    release_groups: Vec<String>,
}

/// One validated artist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualArtist {
    pub name: String,

    /// Lowercased release-group MBIDs
    pub release_groups: Vec<String>,
}

/// Validated manual entries keyed by lowercased artist MBID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualEntries {
    pub artists: BTreeMap<String, ManualArtist>,
}

/// Counts of records touched by an injection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManualEntriesReport {
    pub artists_new: usize,
    pub artists_updated: usize,
    pub release_groups_new: usize,
    pub release_groups_updated: usize,
}

/// Canonical 8-4-4-4-12 hexadecimal UUID, any case
pub fn is_valid_mbid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

impl ManualEntries {
    /// Parse and validate YAML text, collecting every problem
    pub fn from_yaml(content: &str) -> Result<Self, ManualEntriesError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: BTreeMap<String, Option<RawArtistEntry>> =
            serde_yaml::from_str(content).map_err(|source| ManualEntriesError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        let mut errors = Vec::new();
        let mut artists = BTreeMap::new();

        for (mbid, entry) in raw {
            if !is_valid_mbid(&mbid) {
                errors.push(format!("Invalid artist MBID format: {}", mbid));
                continue;
            }

            let entry = entry.unwrap_or_default();
            let name = entry.name.as_deref().map(str::trim).unwrap_or_default();
            if name.is_empty() {
                errors.push(format!("Artist {}: missing or empty 'name' field", mbid));
                continue;
            }

            let mut release_groups = Vec::with_capacity(entry.release_groups.len());
            for rg in &entry.release_groups {
                if is_valid_mbid(rg) {
                    release_groups.push(rg.to_lowercase());
                } else {
                    errors.push(format!("Artist {}: invalid release group MBID format: {}", mbid, rg));
                }
            }

            artists.insert(
                mbid.to_lowercase(),
                ManualArtist {
                    name: name.to_string(),
                    release_groups,
                },
            );
        }

        if errors.is_empty() {
            Ok(Self { artists })
        } else {
            Err(ManualEntriesError::Invalid(errors))
        }
    }

    /// Load the file at `path`. A missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, ManualEntriesError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| ManualEntriesError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match Self::from_yaml(&content) {
            Err(ManualEntriesError::Parse { source, .. }) => Err(ManualEntriesError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            other => other.map(Some),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    pub fn release_group_count(&self) -> usize {
        self.artists.values().map(|a| a.release_groups.len()).sum()
    }
}
