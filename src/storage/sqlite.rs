//! SQLite ledger backend.
//!
//! Tables:
//! - `artists`, `release_groups`: one row per entity, upserted by primary key
//! - `canary_responses`, `cf_cache_responses`: append-only observation log
//!
//! The schema is migrated on open. Migrations only ever add tables,
//! columns and indexes, so databases written by older releases keep
//! loading. `PRAGMA user_version` records the schema level reached.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use crate::domain::{
    normalize_status, ArtistLedger, ArtistRecord, Observation, ReleaseGroupLedger, ReleaseGroupRecord,
};

use super::{parent_dir, parse_count, parse_flag, CanaryStat, CfCacheStat, StorageError, WriteScope};

/// Schema level written to `user_version` after migration
pub const SCHEMA_VERSION: i64 = 2;

/// Tables as first released. Later columns arrive through `ADDED_COLUMNS`.
const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artists (
    mbid TEXT PRIMARY KEY,
    artist_name TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_status_code TEXT NOT NULL DEFAULT '',
    last_checked TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS release_groups (
    rg_mbid TEXT PRIMARY KEY,
    rg_title TEXT NOT NULL DEFAULT '',
    artist_mbid TEXT NOT NULL DEFAULT '',
    artist_name TEXT NOT NULL DEFAULT '',
    artist_cache_status TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_status_code TEXT NOT NULL DEFAULT '',
    last_checked TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS canary_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    canary_target TEXT NOT NULL,
    status_code TEXT NOT NULL DEFAULT '',
    success INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS cf_cache_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    cf_cache_status TEXT NOT NULL,
    status_code TEXT NOT NULL DEFAULT '',
    success INTEGER NOT NULL DEFAULT 0
);
";

/// (table, column, declaration) for every column added after the base schema
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("artists", "text_search_attempted", "INTEGER NOT NULL DEFAULT 0"),
    ("artists", "text_search_success", "INTEGER NOT NULL DEFAULT 0"),
    ("artists", "text_search_last_checked", "TEXT NOT NULL DEFAULT ''"),
    ("artists", "text_search_attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("artists", "manual_entry", "INTEGER NOT NULL DEFAULT 0"),
    ("artists", "last_canary_target", "TEXT NOT NULL DEFAULT ''"),
    ("artists", "last_cf_cache_status", "TEXT NOT NULL DEFAULT ''"),
    ("release_groups", "manual_entry", "INTEGER NOT NULL DEFAULT 0"),
    ("release_groups", "last_canary_target", "TEXT NOT NULL DEFAULT ''"),
    ("release_groups", "last_cf_cache_status", "TEXT NOT NULL DEFAULT ''"),
    ("canary_responses", "operation_type", "TEXT NOT NULL DEFAULT 'mbid_check'"),
    ("cf_cache_responses", "operation_type", "TEXT NOT NULL DEFAULT 'mbid_check'"),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_artists_status ON artists(status)",
    "CREATE INDEX IF NOT EXISTS idx_artists_text_search ON artists(text_search_attempted, text_search_success)",
    "CREATE INDEX IF NOT EXISTS idx_artists_manual ON artists(manual_entry)",
    "CREATE INDEX IF NOT EXISTS idx_artists_canary ON artists(last_canary_target)",
    "CREATE INDEX IF NOT EXISTS idx_artists_cf_cache ON artists(last_cf_cache_status)",
    "CREATE INDEX IF NOT EXISTS idx_rg_status ON release_groups(status)",
    "CREATE INDEX IF NOT EXISTS idx_rg_artist_status ON release_groups(artist_cache_status)",
    "CREATE INDEX IF NOT EXISTS idx_rg_artist_mbid ON release_groups(artist_mbid)",
    "CREATE INDEX IF NOT EXISTS idx_rg_manual ON release_groups(manual_entry)",
    "CREATE INDEX IF NOT EXISTS idx_rg_canary ON release_groups(last_canary_target)",
    "CREATE INDEX IF NOT EXISTS idx_rg_cf_cache ON release_groups(last_cf_cache_status)",
    "CREATE INDEX IF NOT EXISTS idx_canary_target ON canary_responses(canary_target, operation_type)",
    "CREATE INDEX IF NOT EXISTS idx_canary_entity ON canary_responses(entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_canary_timestamp ON canary_responses(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_cf_cache_status ON cf_cache_responses(cf_cache_status, operation_type)",
    "CREATE INDEX IF NOT EXISTS idx_cf_cache_entity ON cf_cache_responses(entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_cf_cache_timestamp ON cf_cache_responses(timestamp)",
];

const SELECT_ARTISTS: &str = "SELECT mbid, artist_name, status, attempts, last_status_code, last_checked,
    text_search_attempted, text_search_success, text_search_last_checked, text_search_attempts,
    manual_entry, last_canary_target, last_cf_cache_status FROM artists";

const UPSERT_ARTIST: &str = "INSERT OR REPLACE INTO artists (mbid, artist_name, status, attempts,
    last_status_code, last_checked, text_search_attempted, text_search_success,
    text_search_last_checked, text_search_attempts, manual_entry, last_canary_target,
    last_cf_cache_status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_RELEASE_GROUPS: &str = "SELECT rg_mbid, rg_title, artist_mbid, artist_name,
    artist_cache_status, status, attempts, last_status_code, last_checked, manual_entry,
    last_canary_target, last_cf_cache_status FROM release_groups";

const UPSERT_RELEASE_GROUP: &str = "INSERT OR REPLACE INTO release_groups (rg_mbid, rg_title,
    artist_mbid, artist_name, artist_cache_status, status, attempts, last_status_code,
    last_checked, manual_entry, last_canary_target, last_cf_cache_status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

// Column readers tolerant of the loose typing older databases used

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

fn count_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => u32::try_from(i).unwrap_or(0),
        ValueRef::Real(f) if f >= 0.0 => f as u32,
        ValueRef::Text(bytes) => parse_count(&String::from_utf8_lossy(bytes)),
        _ => 0,
    })
}

fn flag_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => i != 0,
        ValueRef::Real(f) => f != 0.0,
        ValueRef::Text(bytes) => parse_flag(&String::from_utf8_lossy(bytes)),
        _ => false,
    })
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Bring the schema up to [`SCHEMA_VERSION`]. Safe to run repeatedly.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let tx = conn.transaction()?;
    tx.execute_batch(BASE_SCHEMA)?;

    let mut added = Vec::new();
    for (table, column, declaration) in ADDED_COLUMNS {
        if !has_column(&tx, table, column)? {
            tx.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, declaration),
                [],
            )?;
            added.push(format!("{}.{}", table, column));
        }
    }

    for index in INDEXES {
        tx.execute(index, [])?;
    }

    if version < SCHEMA_VERSION {
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    tx.commit()?;

    if !added.is_empty() {
        info!(from_version = version, columns = ?added, "Migrated ledger schema");
    } else {
        debug!(version, "Ledger schema up to date");
    }
    Ok(())
}

/// Records selected by a write scope
fn in_scope<'a, T>(ledger: &'a HashMap<String, T>, scope: WriteScope<'_>) -> Vec<&'a T> {
    match scope {
        WriteScope::Full => ledger.values().collect(),
        WriteScope::Changed(ids) => ids.iter().filter_map(|id| ledger.get(id)).collect(),
    }
}

/// SQLite-backed ledger
#[derive(Debug)]
pub struct SqliteStorage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (creating if needed) and migrate the database at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        std::fs::create_dir_all(parent_dir(&path)).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        let mut conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        migrate(&mut conn)?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True once at least one artist has been stored
    pub fn exists(&self) -> Result<bool, StorageError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM artists", [], |r| r.get(0))?;
        Ok(count > 0)
    }

    pub fn read_artists(&self) -> Result<ArtistLedger, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(SELECT_ARTISTS)?;
        let rows = stmt.query_map([], |row| {
            Ok(ArtistRecord {
                mbid: text_at(row, 0)?,
                artist_name: text_at(row, 1)?,
                status: normalize_status(&text_at(row, 2)?),
                attempts: count_at(row, 3)?,
                last_status_code: text_at(row, 4)?,
                last_checked: text_at(row, 5)?,
                text_search_attempted: flag_at(row, 6)?,
                text_search_success: flag_at(row, 7)?,
                text_search_last_checked: text_at(row, 8)?,
                text_search_attempts: count_at(row, 9)?,
                manual_entry: flag_at(row, 10)?,
                last_canary_target: text_at(row, 11)?,
                last_cf_cache_status: text_at(row, 12)?,
            })
        })?;

        let mut ledger = ArtistLedger::new();
        for record in rows {
            let record = record?;
            ledger.insert(record.mbid.clone(), record);
        }
        Ok(ledger)
    }

    pub fn read_release_groups(&self) -> Result<ReleaseGroupLedger, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(SELECT_RELEASE_GROUPS)?;
        let rows = stmt.query_map([], |row| {
            Ok(ReleaseGroupRecord {
                rg_mbid: text_at(row, 0)?,
                rg_title: text_at(row, 1)?,
                artist_mbid: text_at(row, 2)?,
                artist_name: text_at(row, 3)?,
                artist_cache_status: normalize_status(&text_at(row, 4)?),
                status: normalize_status(&text_at(row, 5)?),
                attempts: count_at(row, 6)?,
                last_status_code: text_at(row, 7)?,
                last_checked: text_at(row, 8)?,
                manual_entry: flag_at(row, 9)?,
                last_canary_target: text_at(row, 10)?,
                last_cf_cache_status: text_at(row, 11)?,
            })
        })?;

        let mut ledger = ReleaseGroupLedger::new();
        for record in rows {
            let record = record?;
            ledger.insert(record.rg_mbid.clone(), record);
        }
        Ok(ledger)
    }

    /// Upsert the scoped artists in one transaction
    pub fn write_artists(&self, ledger: &ArtistLedger, scope: WriteScope<'_>) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_ARTIST)?;
            for r in in_scope(ledger, scope) {
                stmt.execute(params![
                    r.mbid,
                    r.artist_name,
                    r.status,
                    r.attempts,
                    r.last_status_code,
                    r.last_checked,
                    r.text_search_attempted,
                    r.text_search_success,
                    r.text_search_last_checked,
                    r.text_search_attempts,
                    r.manual_entry,
                    r.last_canary_target,
                    r.last_cf_cache_status,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert the scoped release groups in one transaction
    pub fn write_release_groups(
        &self,
        ledger: &ReleaseGroupLedger,
        scope: WriteScope<'_>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_RELEASE_GROUP)?;
            for r in in_scope(ledger, scope) {
                stmt.execute(params![
                    r.rg_mbid,
                    r.rg_title,
                    r.artist_mbid,
                    r.artist_name,
                    r.artist_cache_status,
                    r.status,
                    r.attempts,
                    r.last_status_code,
                    r.last_checked,
                    r.manual_entry,
                    r.last_canary_target,
                    r.last_cf_cache_status,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_release_groups_artist_status(&self, artists: &ArtistLedger) -> Result<usize, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut touched = 0;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE release_groups SET artist_cache_status = ?1 WHERE artist_mbid = ?2")?;
            for artist in artists.values() {
                touched += stmt.execute(params![artist.status, artist.mbid])?;
            }
        }
        tx.commit()?;
        Ok(touched)
    }

    pub fn record_observations(&self, observations: &[Observation]) -> Result<(), StorageError> {
        if !observations.iter().any(Observation::is_recorded) {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut canary = tx.prepare_cached(
                "INSERT INTO canary_responses (timestamp, entity_type, entity_id, canary_target,
                 status_code, success, operation_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut cf_cache = tx.prepare_cached(
                "INSERT INTO cf_cache_responses (timestamp, entity_type, entity_id, cf_cache_status,
                 status_code, success, operation_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for obs in observations {
                let entity_type = obs.phase.entity_type().as_str();
                let operation = obs.phase.operation_type();
                if let Some(target) = obs.canary_entry() {
                    canary.execute(params![
                        obs.timestamp,
                        entity_type,
                        obs.entity_id,
                        target,
                        obs.status_code,
                        obs.success,
                        operation,
                    ])?;
                }
                if let Some(status) = &obs.cf_cache_status {
                    cf_cache.execute(params![
                        obs.timestamp,
                        entity_type,
                        obs.entity_id,
                        status.to_uppercase(),
                        obs.status_code,
                        obs.success,
                        operation,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Observation totals per canary target and operation type
    pub fn canary_statistics(&self) -> Result<Vec<CanaryStat>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT canary_target, operation_type, COUNT(*), COALESCE(SUM(success), 0),
                    MIN(timestamp), MAX(timestamp)
             FROM canary_responses
             GROUP BY canary_target, operation_type
             ORDER BY canary_target, operation_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CanaryStat {
                canary_target: row.get(0)?,
                operation_type: row.get(1)?,
                total: row.get::<_, i64>(2)?.max(0) as u64,
                successful: row.get::<_, i64>(3)?.max(0) as u64,
                first_seen: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })?;

        let stats = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    /// Observation totals per CDN cache status with a per-operation breakdown
    pub fn cf_cache_statistics(&self) -> Result<Vec<CfCacheStat>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT UPPER(cf_cache_status), operation_type, COUNT(*), MIN(timestamp), MAX(timestamp)
             FROM cf_cache_responses
             GROUP BY UPPER(cf_cache_status), operation_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?.max(0) as u64,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut by_status: BTreeMap<String, CfCacheStat> = BTreeMap::new();
        for row in rows {
            let (status, operation, count, first, last) = row?;
            let stat = by_status.entry(status.clone()).or_insert_with(|| CfCacheStat {
                cf_cache_status: status,
                total: 0,
                by_operation: BTreeMap::new(),
                first_seen: None,
                last_seen: None,
            });
            stat.total += count;
            *stat.by_operation.entry(operation).or_default() += count;
            stat.first_seen = match (stat.first_seen.take(), first) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            stat.last_seen = match (stat.last_seen.take(), last) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        Ok(by_status.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        drop(SqliteStorage::open(&path).unwrap());
        let db = SqliteStorage::open(&path).unwrap();

        let version: i64 = db
            .conn()
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(!db.exists().unwrap());
    }

    #[test]
    fn test_migrates_legacy_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE artists (
                    mbid TEXT PRIMARY KEY,
                    artist_name TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT '',
                    attempts TEXT NOT NULL DEFAULT '',
                    last_status_code TEXT NOT NULL DEFAULT '',
                    last_checked TEXT NOT NULL DEFAULT ''
                );
                INSERT INTO artists VALUES ('abc', 'Legacy', 'Success', '4', '200', '2024-01-01T00:00:00');",
            )
            .unwrap();
        }

        let db = SqliteStorage::open(&path).unwrap();
        assert!(db.exists().unwrap());

        let artists = db.read_artists().unwrap();
        let record = &artists["abc"];
        assert_eq!(record.status, "success");
        assert_eq!(record.attempts, 4);
        assert_eq!(record.text_search_attempts, 0);
        assert!(!record.manual_entry);

        let conn = db.conn();
        for (table, column, _) in ADDED_COLUMNS {
            assert!(has_column(&conn, table, column).unwrap(), "{}.{} missing", table, column);
        }
    }

    #[test]
    fn test_changed_scope_only_writes_listed_ids() {
        let dir = TempDir::new().unwrap();
        let db = SqliteStorage::open(dir.path().join("ledger.db")).unwrap();

        let mut ledger = ArtistLedger::new();
        ledger.insert("a".into(), ArtistRecord::new("a", "A"));
        ledger.insert("b".into(), ArtistRecord::new("b", "B"));

        let changed: HashSet<String> = ["a".to_string()].into_iter().collect();
        db.write_artists(&ledger, WriteScope::Changed(&changed)).unwrap();

        let stored = db.read_artists().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key("a"));
    }

    #[test]
    fn test_observation_statistics() {
        let dir = TempDir::new().unwrap();
        let db = SqliteStorage::open(dir.path().join("ledger.db")).unwrap();

        let make = |id: &str, success: bool, cf: &str, ts: &str| Observation {
            timestamp: ts.to_string(),
            phase: crate::domain::ProbePhase::ArtistMbid,
            entity_id: id.to_string(),
            status_code: if success { "200".into() } else { "503".into() },
            success,
            canary_target: Some("edge-a".into()),
            cf_cache_status: Some(cf.to_string()),
        };

        db.record_observations(&[
            make("a", true, "hit", "2024-01-01T00:00:00+00:00"),
            make("b", false, "MISS", "2024-01-02T00:00:00+00:00"),
            make("c", true, "HIT", "2024-01-03T00:00:00+00:00"),
        ])
        .unwrap();

        let canary = db.canary_statistics().unwrap();
        assert_eq!(canary.len(), 1);
        assert_eq!(canary[0].canary_target, "edge-a");
        assert_eq!(canary[0].operation_type, "mbid_check");
        assert_eq!(canary[0].total, 3);
        assert_eq!(canary[0].successful, 2);
        assert_eq!(canary[0].first_seen.as_deref(), Some("2024-01-01T00:00:00+00:00"));

        let cf = db.cf_cache_statistics().unwrap();
        assert_eq!(cf.len(), 2);
        assert_eq!(cf[0].cf_cache_status, "HIT");
        assert_eq!(cf[0].total, 2);
        assert_eq!(cf[0].last_seen.as_deref(), Some("2024-01-03T00:00:00+00:00"));
        assert_eq!(cf[1].by_operation["mbid_check"], 1);
    }

    #[test]
    fn test_failures_without_headers_are_counted() {
        let dir = TempDir::new().unwrap();
        let db = SqliteStorage::open(dir.path().join("ledger.db")).unwrap();

        let bare = |id: &str, status_code: &str, success: bool| Observation {
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            phase: crate::domain::ProbePhase::TextSearch,
            entity_id: id.to_string(),
            status_code: status_code.to_string(),
            success,
            canary_target: None,
            cf_cache_status: None,
        };

        db.record_observations(&[
            bare("a", "TIMEOUT", false),
            bare("b", "EXC:connect", false),
            bare("c", "200", true),
        ])
        .unwrap();

        let canary = db.canary_statistics().unwrap();
        assert_eq!(canary.len(), 1);
        assert_eq!(canary[0].canary_target, "");
        assert_eq!(canary[0].operation_type, "text_search");
        assert_eq!(canary[0].total, 2);
        assert_eq!(canary[0].successful, 0);
        assert!(db.cf_cache_statistics().unwrap().is_empty());
    }
}
