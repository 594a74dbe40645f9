//! CSV ledger backend.
//!
//! Each table lives in its own file. Reads parse the whole file; writes
//! serialize the whole ledger into a temporary file in the same directory
//! and atomically rename it over the old one. Columns are matched by header
//! name, so files from older releases with fewer columns still load.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ::csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tempfile::NamedTempFile;

use crate::domain::{normalize_status, ArtistLedger, ArtistRecord, ReleaseGroupLedger, ReleaseGroupRecord};

use super::{parent_dir, parse_count, parse_flag, CanaryStat, CfCacheStat, StorageError};

/// Artist file columns, in write order
pub const ARTIST_COLUMNS: [&str; 13] = [
    "mbid",
    "artist_name",
    "status",
    "attempts",
    "last_status_code",
    "last_checked",
    "text_search_attempted",
    "text_search_success",
    "text_search_last_checked",
    "text_search_attempts",
    "manual_entry",
    "last_canary_target",
    "last_cf_cache_status",
];

/// Release-group file columns, in write order
pub const RELEASE_GROUP_COLUMNS: [&str; 12] = [
    "rg_mbid",
    "rg_title",
    "artist_mbid",
    "artist_name",
    "artist_cache_status",
    "status",
    "attempts",
    "last_status_code",
    "last_checked",
    "manual_entry",
    "last_canary_target",
    "last_cf_cache_status",
];

/// Header-name lookup for one file
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(i, name)| (name.trim().to_string(), i))
                .collect(),
        )
    }

    /// Field value, empty when the column is missing
    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.0
            .get(name)
            .and_then(|i| record.get(*i))
            .unwrap_or("")
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// CSV-backed ledger
#[derive(Debug, Clone)]
pub struct CsvStorage {
    artists_path: PathBuf,
    release_groups_path: PathBuf,
}

impl CsvStorage {
    pub fn new(artists_path: impl Into<PathBuf>, release_groups_path: impl Into<PathBuf>) -> Self {
        Self {
            artists_path: artists_path.into(),
            release_groups_path: release_groups_path.into(),
        }
    }

    pub fn artists_path(&self) -> &Path {
        &self.artists_path
    }

    pub fn release_groups_path(&self) -> &Path {
        &self.release_groups_path
    }

    pub fn exists(&self) -> bool {
        self.artists_path.exists()
    }

    /// Read every row of `path`, or nothing if the file is missing
    fn read_rows(path: &Path) -> Result<Option<(Columns, Vec<StringRecord>)>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }

        let csv_err = |source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let columns = Columns::new(reader.headers().map_err(csv_err)?);
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_err)?;

        Ok(Some((columns, rows)))
    }

    pub fn read_artists(&self) -> Result<ArtistLedger, StorageError> {
        let Some((cols, rows)) = Self::read_rows(&self.artists_path)? else {
            return Ok(ArtistLedger::new());
        };

        let mut ledger = ArtistLedger::with_capacity(rows.len());
        for row in &rows {
            let mbid = cols.get(row, "mbid").trim();
            if mbid.is_empty() {
                continue;
            }
            ledger.insert(
                mbid.to_string(),
                ArtistRecord {
                    mbid: mbid.to_string(),
                    artist_name: cols.get(row, "artist_name").to_string(),
                    status: normalize_status(cols.get(row, "status")),
                    attempts: parse_count(cols.get(row, "attempts")),
                    last_status_code: cols.get(row, "last_status_code").to_string(),
                    last_checked: cols.get(row, "last_checked").to_string(),
                    text_search_attempted: parse_flag(cols.get(row, "text_search_attempted")),
                    text_search_success: parse_flag(cols.get(row, "text_search_success")),
                    text_search_last_checked: cols.get(row, "text_search_last_checked").to_string(),
                    text_search_attempts: parse_count(cols.get(row, "text_search_attempts")),
                    manual_entry: parse_flag(cols.get(row, "manual_entry")),
                    last_canary_target: cols.get(row, "last_canary_target").to_string(),
                    last_cf_cache_status: cols.get(row, "last_cf_cache_status").to_string(),
                },
            );
        }
        Ok(ledger)
    }

    pub fn read_release_groups(&self) -> Result<ReleaseGroupLedger, StorageError> {
        let Some((cols, rows)) = Self::read_rows(&self.release_groups_path)? else {
            return Ok(ReleaseGroupLedger::new());
        };

        let mut ledger = ReleaseGroupLedger::with_capacity(rows.len());
        for row in &rows {
            let rg_mbid = cols.get(row, "rg_mbid").trim();
            if rg_mbid.is_empty() {
                continue;
            }
            ledger.insert(
                rg_mbid.to_string(),
                ReleaseGroupRecord {
                    rg_mbid: rg_mbid.to_string(),
                    rg_title: cols.get(row, "rg_title").to_string(),
                    artist_mbid: cols.get(row, "artist_mbid").trim().to_string(),
                    artist_name: cols.get(row, "artist_name").to_string(),
                    artist_cache_status: normalize_status(cols.get(row, "artist_cache_status")),
                    status: normalize_status(cols.get(row, "status")),
                    attempts: parse_count(cols.get(row, "attempts")),
                    last_status_code: cols.get(row, "last_status_code").to_string(),
                    last_checked: cols.get(row, "last_checked").to_string(),
                    manual_entry: parse_flag(cols.get(row, "manual_entry")),
                    last_canary_target: cols.get(row, "last_canary_target").to_string(),
                    last_cf_cache_status: cols.get(row, "last_cf_cache_status").to_string(),
                },
            );
        }
        Ok(ledger)
    }

    /// Atomically replace `path` with the given header and rows
    fn replace_file(path: &Path, header: &[&str], rows: Vec<Vec<String>>) -> Result<(), StorageError> {
        let dir = parent_dir(path);
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;

        {
            let mut writer = WriterBuilder::new().from_writer(&mut tmp);
            writer.write_record(header).map_err(csv_err)?;
            for row in rows {
                writer.write_record(&row).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }

        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|source| StorageError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Rewrite the artist file, sorted by name then MBID
    pub fn write_artists(&self, ledger: &ArtistLedger) -> Result<(), StorageError> {
        let mut records: Vec<&ArtistRecord> = ledger.values().collect();
        records.sort_by(|a, b| {
            (a.artist_name.as_str(), a.mbid.as_str()).cmp(&(b.artist_name.as_str(), b.mbid.as_str()))
        });

        let rows = records
            .into_iter()
            .map(|r| {
                vec![
                    r.mbid.clone(),
                    r.artist_name.clone(),
                    r.status.clone(),
                    r.attempts.to_string(),
                    r.last_status_code.clone(),
                    r.last_checked.clone(),
                    flag(r.text_search_attempted).to_string(),
                    flag(r.text_search_success).to_string(),
                    r.text_search_last_checked.clone(),
                    r.text_search_attempts.to_string(),
                    flag(r.manual_entry).to_string(),
                    r.last_canary_target.clone(),
                    r.last_cf_cache_status.clone(),
                ]
            })
            .collect();

        Self::replace_file(&self.artists_path, &ARTIST_COLUMNS, rows)
    }

    /// Rewrite the release-group file, sorted by artist, title, then MBID
    pub fn write_release_groups(&self, ledger: &ReleaseGroupLedger) -> Result<(), StorageError> {
        let mut records: Vec<&ReleaseGroupRecord> = ledger.values().collect();
        records.sort_by(|a, b| {
            (a.artist_name.as_str(), a.rg_title.as_str(), a.rg_mbid.as_str()).cmp(&(
                b.artist_name.as_str(),
                b.rg_title.as_str(),
                b.rg_mbid.as_str(),
            ))
        });

        let rows = records
            .into_iter()
            .map(|r| {
                vec![
                    r.rg_mbid.clone(),
                    r.rg_title.clone(),
                    r.artist_mbid.clone(),
                    r.artist_name.clone(),
                    r.artist_cache_status.clone(),
                    r.status.clone(),
                    r.attempts.to_string(),
                    r.last_status_code.clone(),
                    r.last_checked.clone(),
                    flag(r.manual_entry).to_string(),
                    r.last_canary_target.clone(),
                    r.last_cf_cache_status.clone(),
                ]
            })
            .collect();

        Self::replace_file(&self.release_groups_path, &RELEASE_GROUP_COLUMNS, rows)
    }

    pub fn update_release_groups_artist_status(&self, artists: &ArtistLedger) -> Result<usize, StorageError> {
        let mut release_groups = self.read_release_groups()?;
        let mut touched = 0;

        for rg in release_groups.values_mut() {
            if let Some(artist) = artists.get(&rg.artist_mbid) {
                rg.artist_cache_status = artist.status.clone();
                touched += 1;
            }
        }

        if touched > 0 {
            self.write_release_groups(&release_groups)?;
        }
        Ok(touched)
    }

    /// Current-state canary counts per target
    pub fn canary_statistics(&self) -> Result<Vec<CanaryStat>, StorageError> {
        // (target, operation) -> (total, successful)
        let mut counts: BTreeMap<(String, &'static str), (u64, u64)> = BTreeMap::new();

        for artist in self.read_artists()?.values() {
            let target = artist.last_canary_target.trim();
            if target.is_empty() {
                continue;
            }
            let entry = counts.entry((target.to_string(), "mbid_check")).or_default();
            entry.0 += 1;
            entry.1 += u64::from(artist.is_success());

            if artist.text_search_attempted {
                let entry = counts.entry((target.to_string(), "text_search")).or_default();
                entry.0 += 1;
                entry.1 += u64::from(artist.text_search_success);
            }
        }

        for rg in self.read_release_groups()?.values() {
            let target = rg.last_canary_target.trim();
            if target.is_empty() {
                continue;
            }
            let entry = counts.entry((target.to_string(), "rg_check")).or_default();
            entry.0 += 1;
            entry.1 += u64::from(rg.is_success());
        }

        Ok(counts
            .into_iter()
            .map(|((canary_target, operation), (total, successful))| CanaryStat {
                canary_target,
                operation_type: operation.to_string(),
                total,
                successful,
                first_seen: None,
                last_seen: None,
            })
            .collect())
    }

    /// Current-state CDN cache status counts
    pub fn cf_cache_statistics(&self) -> Result<Vec<CfCacheStat>, StorageError> {
        let mut by_status: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

        let artist_statuses = self
            .read_artists()?
            .into_values()
            .map(|a| (a.last_cf_cache_status, "mbid_check"));
        let rg_statuses = self
            .read_release_groups()?
            .into_values()
            .map(|rg| (rg.last_cf_cache_status, "rg_check"));

        for (status, operation) in artist_statuses.chain(rg_statuses) {
            let status = status.trim().to_uppercase();
            if status.is_empty() {
                continue;
            }
            *by_status
                .entry(status)
                .or_default()
                .entry(operation.to_string())
                .or_default() += 1;
        }

        Ok(by_status
            .into_iter()
            .map(|(cf_cache_status, by_operation)| CfCacheStat {
                cf_cache_status,
                total: by_operation.values().sum(),
                by_operation,
                first_seen: None,
                last_seen: None,
            })
            .collect())
    }
}
