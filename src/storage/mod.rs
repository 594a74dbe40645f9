//! Durable ledger storage.
//!
//! Two interchangeable backends behind one contract:
//! - `csv`: one file per table, whole-file atomic replace on every write
//! - `sqlite`: keyed upserts plus append-only observation tables
//!
//! The backend is picked once at startup from `ledger.storage_type`.
//! Neither backend ever exposes a partially written ledger to readers.

pub mod csv;
pub mod lock;
pub mod sqlite;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LedgerSettings;
use crate::domain::{ArtistLedger, Observation, ReleaseGroupLedger};

pub use self::csv::CsvStorage;
pub use self::lock::{LockError, RunLock};
pub use self::sqlite::SqliteStorage;

/// File name of the advisory run lock, placed next to the ledger
pub const LOCK_FILE_NAME: &str = ".cache-warmer.lock";

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    #[error("Failed to replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Backend selector as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Csv,
    Sqlite,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Csv => f.write_str("csv"),
            StorageType::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Which records a write must persist
#[derive(Debug, Clone, Copy)]
pub enum WriteScope<'a> {
    /// Every record in the ledger
    Full,

    /// Only the listed ids. Backends that cannot write partially
    /// fall back to a full write.
    Changed(&'a HashSet<String>),
}

/// Canary target totals for one operation type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanaryStat {
    pub canary_target: String,
    pub operation_type: String,
    pub total: u64,
    pub successful: u64,
    /// Only known for the observation log
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
}

impl CanaryStat {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 * 100.0 / self.total as f64
        }
    }
}

/// CDN cache status totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CfCacheStat {
    /// Upper-cased `cf-cache-status` value
    pub cf_cache_status: String,
    pub total: u64,
    /// Totals per operation type
    pub by_operation: BTreeMap<String, u64>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
}

/// Ledger storage, one variant per backend
#[derive(Debug)]
pub enum Storage {
    Csv(CsvStorage),
    Sqlite(SqliteStorage),
}

impl Storage {
    /// Open the backend named by the settings. SQLite schemas are migrated here.
    pub fn open(settings: &LedgerSettings) -> Result<Self, StorageError> {
        match settings.storage_type {
            StorageType::Csv => Ok(Storage::Csv(CsvStorage::new(
                &settings.artists_csv_path,
                &settings.release_groups_csv_path,
            ))),
            StorageType::Sqlite => Ok(Storage::Sqlite(SqliteStorage::open(&settings.db_path)?)),
        }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Storage::Csv(_) => StorageType::Csv,
            Storage::Sqlite(_) => StorageType::Sqlite,
        }
    }

    /// Human-readable location for logs
    pub fn describe(&self) -> String {
        match self {
            Storage::Csv(csv) => format!(
                "csv ({}, {})",
                csv.artists_path().display(),
                csv.release_groups_path().display()
            ),
            Storage::Sqlite(db) => format!("sqlite ({})", db.path().display()),
        }
    }

    /// Directory holding the ledger
    pub fn base_dir(&self) -> PathBuf {
        let anchor = match self {
            Storage::Csv(csv) => csv.artists_path(),
            Storage::Sqlite(db) => db.path(),
        };
        parent_dir(anchor).to_path_buf()
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir().join(LOCK_FILE_NAME)
    }

    /// Whether a ledger from an earlier run is present
    pub fn exists(&self) -> Result<bool, StorageError> {
        match self {
            Storage::Csv(csv) => Ok(csv.exists()),
            Storage::Sqlite(db) => db.exists(),
        }
    }

    pub fn read_artists(&self) -> Result<ArtistLedger, StorageError> {
        match self {
            Storage::Csv(csv) => csv.read_artists(),
            Storage::Sqlite(db) => db.read_artists(),
        }
    }

    pub fn read_release_groups(&self) -> Result<ReleaseGroupLedger, StorageError> {
        match self {
            Storage::Csv(csv) => csv.read_release_groups(),
            Storage::Sqlite(db) => db.read_release_groups(),
        }
    }

    pub fn write_artists(&self, ledger: &ArtistLedger, scope: WriteScope<'_>) -> Result<(), StorageError> {
        match self {
            Storage::Csv(csv) => csv.write_artists(ledger),
            Storage::Sqlite(db) => db.write_artists(ledger, scope),
        }
    }

    pub fn write_release_groups(
        &self,
        ledger: &ReleaseGroupLedger,
        scope: WriteScope<'_>,
    ) -> Result<(), StorageError> {
        match self {
            Storage::Csv(csv) => csv.write_release_groups(ledger),
            Storage::Sqlite(db) => db.write_release_groups(ledger, scope),
        }
    }

    /// Copy each artist's status onto its release groups.
    ///
    /// Returns the number of release-group rows touched.
    pub fn update_release_groups_artist_status(&self, artists: &ArtistLedger) -> Result<usize, StorageError> {
        match self {
            Storage::Csv(csv) => csv.update_release_groups_artist_status(artists),
            Storage::Sqlite(db) => db.update_release_groups_artist_status(artists),
        }
    }

    /// Append probe observations. A no-op for CSV.
    pub fn record_observations(&self, observations: &[Observation]) -> Result<(), StorageError> {
        match self {
            Storage::Csv(_) => Ok(()),
            Storage::Sqlite(db) => db.record_observations(observations),
        }
    }

    pub fn canary_statistics(&self) -> Result<Vec<CanaryStat>, StorageError> {
        match self {
            Storage::Csv(csv) => csv.canary_statistics(),
            Storage::Sqlite(db) => db.canary_statistics(),
        }
    }

    pub fn cf_cache_statistics(&self) -> Result<Vec<CfCacheStat>, StorageError> {
        match self {
            Storage::Csv(csv) => csv.cf_cache_statistics(),
            Storage::Sqlite(db) => db.cf_cache_statistics(),
        }
    }
}

/// Parent directory of a file path, `.` for bare file names
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Parse a stored boolean flag
pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Parse a stored counter, tolerating blanks and float renderings like "3.0"
pub(crate) fn parse_count(value: &str) -> u32 {
    let value = value.trim();
    value
        .parse::<u32>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("True"));
        assert!(parse_flag("1"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3"), 3);
        assert_eq!(parse_count("3.0"), 3);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("-1"), 0);
        assert_eq!(parse_count("abc"), 0);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("ledger.csv")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/data/ledger.csv")), Path::new("/data"));
    }

    #[test]
    fn test_success_rate() {
        let stat = CanaryStat {
            canary_target: "a".into(),
            operation_type: "mbid_check".into(),
            total: 4,
            successful: 3,
            first_seen: None,
            last_seen: None,
        };
        assert_eq!(stat.success_rate(), 75.0);
    }
}
