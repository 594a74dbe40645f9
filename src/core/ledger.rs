//! In-memory ledger owned by the engine.
//!
//! The ledger is the single writer of record state during a run. Workers
//! never touch it; the pool's collector applies each probe result here and
//! decides when to flush. Changed ids are tracked so SQLite flushes only
//! upsert what moved since the last flush.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::adapters::{LibraryArtist, LibraryReleaseGroup};
use crate::domain::{
    normalize_status, ArtistLedger, ArtistRecord, Observation, ProbeResponse, ProbeTarget, ReleaseGroupLedger,
    ReleaseGroupRecord, MANUAL_RG_TITLE,
};
use crate::ingest::{ManualEntries, ManualEntriesReport};
use crate::storage::{Storage, StorageError, WriteScope};

/// Records created or refreshed by a library sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
}

/// Success state of a record before and after one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub was_success: bool,
    pub now_success: bool,
}

impl Applied {
    /// Non-success to success
    pub fn became_success(&self) -> bool {
        !self.was_success && self.now_success
    }
}

/// Which attempt counters an explicit reset clears
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetScope {
    pub artists: bool,
    pub text_search: bool,
    pub release_groups: bool,

    /// Leave successful records alone
    pub failed_only: bool,
}

/// Records touched by a reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub artists: usize,
    pub text_search: usize,
    pub release_groups: usize,
}

/// Artist and release-group ledgers plus unflushed changes
#[derive(Debug, Default)]
pub struct Ledger {
    pub artists: ArtistLedger,
    pub release_groups: ReleaseGroupLedger,
    dirty_artists: HashSet<String>,
    dirty_release_groups: HashSet<String>,
    pending_observations: Vec<Observation>,
}

impl Ledger {
    pub fn new(artists: ArtistLedger, release_groups: ReleaseGroupLedger) -> Self {
        Self {
            artists,
            release_groups,
            ..Default::default()
        }
    }

    /// Read both tables from storage
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        Ok(Self::new(storage.read_artists()?, storage.read_release_groups()?))
    }

    /// Re-read release groups after an out-of-band storage update
    pub fn reload_release_groups(&mut self, storage: &Storage) -> Result<(), StorageError> {
        self.release_groups = storage.read_release_groups()?;
        self.dirty_release_groups.clear();
        Ok(())
    }

    /// Whether anything changed since the last flush
    pub fn has_pending_writes(&self) -> bool {
        !self.dirty_artists.is_empty() || !self.dirty_release_groups.is_empty() || !self.pending_observations.is_empty()
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Add unseen artists and refresh names of known ones
    pub fn merge_artists(&mut self, artists: &[LibraryArtist]) -> MergeStats {
        let mut stats = MergeStats::default();

        for artist in artists {
            match self.artists.get_mut(&artist.mbid) {
                None => {
                    self.artists
                        .insert(artist.mbid.clone(), ArtistRecord::new(&artist.mbid, &artist.name));
                    stats.added += 1;
                }
                Some(record) => {
                    if !artist.name.is_empty() && record.artist_name != artist.name {
                        record.artist_name = artist.name.clone();
                        stats.updated += 1;
                    } else {
                        continue;
                    }
                }
            }
            self.dirty_artists.insert(artist.mbid.clone());
        }

        stats
    }

    /// Add unseen release groups, refresh known ones and seed
    /// `artist_cache_status` from the artist ledger
    pub fn merge_release_groups(&mut self, release_groups: &[LibraryReleaseGroup]) -> MergeStats {
        let mut stats = MergeStats::default();

        for rg in release_groups {
            let artist_status = self.artist_status(&rg.artist_mbid);
            match self.release_groups.get_mut(&rg.rg_mbid) {
                None => {
                    let mut record = ReleaseGroupRecord::new(&rg.rg_mbid, &rg.rg_title, &rg.artist_mbid, &rg.artist_name);
                    record.artist_cache_status = artist_status;
                    self.release_groups.insert(rg.rg_mbid.clone(), record);
                    stats.added += 1;
                }
                Some(record) => {
                    let changed = record.rg_title != rg.rg_title || record.artist_name != rg.artist_name;
                    if changed {
                        stats.updated += 1;
                    }
                    if !changed && record.artist_cache_status == artist_status {
                        continue;
                    }
                    record.rg_title = rg.rg_title.clone();
                    record.artist_name = rg.artist_name.clone();
                    record.artist_cache_status = artist_status;
                }
            }
            self.dirty_release_groups.insert(rg.rg_mbid.clone());
        }

        stats
    }

    /// Inject manual entries. The `manual_entry` flag is only ever set here.
    pub fn apply_manual_entries(&mut self, entries: &ManualEntries) -> ManualEntriesReport {
        let mut report = ManualEntriesReport::default();

        for (mbid, manual) in &entries.artists {
            match self.artists.get_mut(mbid) {
                None => {
                    let mut record = ArtistRecord::new(mbid, &manual.name);
                    record.manual_entry = true;
                    self.artists.insert(mbid.clone(), record);
                    report.artists_new += 1;
                }
                Some(record) => {
                    if record.artist_name != manual.name {
                        record.artist_name = manual.name.clone();
                        report.artists_updated += 1;
                    }
                    record.manual_entry = true;
                }
            }
            self.dirty_artists.insert(mbid.clone());
        }

        for (artist_mbid, manual) in &entries.artists {
            let artist_status = self.artist_status(artist_mbid);
            for rg_mbid in &manual.release_groups {
                match self.release_groups.get_mut(rg_mbid) {
                    None => {
                        let mut record = ReleaseGroupRecord::new(rg_mbid, MANUAL_RG_TITLE, artist_mbid, &manual.name);
                        record.artist_cache_status = artist_status.clone();
                        record.manual_entry = true;
                        self.release_groups.insert(rg_mbid.clone(), record);
                        report.release_groups_new += 1;
                    }
                    Some(record) => {
                        if record.artist_name != manual.name || record.artist_mbid != *artist_mbid {
                            record.artist_name = manual.name.clone();
                            record.artist_mbid = artist_mbid.clone();
                            report.release_groups_updated += 1;
                        }
                        record.artist_cache_status = artist_status.clone();
                        record.manual_entry = true;
                    }
                }
                self.dirty_release_groups.insert(rg_mbid.clone());
            }
        }

        report
    }

    fn artist_status(&self, mbid: &str) -> String {
        self.artists
            .get(mbid)
            .map(|a| a.status.clone())
            .unwrap_or_default()
    }

    /// Copy every known artist's status onto its release groups in memory.
    ///
    /// Returns the number of release groups whose value changed.
    pub fn propagate_artist_status(&mut self) -> usize {
        let mut changed = 0;
        for (rg_mbid, rg) in self.release_groups.iter_mut() {
            let Some(artist) = self.artists.get(&rg.artist_mbid) else {
                continue;
            };
            if rg.artist_cache_status != artist.status {
                rg.artist_cache_status = artist.status.clone();
                self.dirty_release_groups.insert(rg_mbid.clone());
                changed += 1;
            }
        }
        changed
    }

    // ========================================================================
    // Probe results
    // ========================================================================

    /// Record one probe outcome on its ledger entry.
    ///
    /// Returns `None` when the entity is not in the ledger.
    pub fn apply(&mut self, target: &ProbeTarget, response: &ProbeResponse, checked_at: &str) -> Option<Applied> {
        let applied = match target {
            ProbeTarget::Artist { mbid } => {
                let record = self.artists.get_mut(mbid)?;
                let was_success = record.is_success();
                record.status = normalize_status(response.status_tag());
                record.attempts = record.attempts.saturating_add(1);
                record.last_status_code = response.status_code_label();
                record.last_checked = checked_at.to_string();
                copy_headers(response, &mut record.last_canary_target, &mut record.last_cf_cache_status);
                self.dirty_artists.insert(mbid.clone());
                Applied {
                    was_success,
                    now_success: record.is_success(),
                }
            }
            ProbeTarget::TextSearch { artist_mbid, .. } => {
                let record = self.artists.get_mut(artist_mbid)?;
                let was_success = record.text_search_success;
                record.text_search_attempted = true;
                record.text_search_success = response.is_success();
                record.text_search_attempts = record.text_search_attempts.saturating_add(1);
                record.text_search_last_checked = checked_at.to_string();
                copy_headers(response, &mut record.last_canary_target, &mut record.last_cf_cache_status);
                self.dirty_artists.insert(artist_mbid.clone());
                Applied {
                    was_success,
                    now_success: record.text_search_success,
                }
            }
            ProbeTarget::ReleaseGroup { rg_mbid } => {
                let record = self.release_groups.get_mut(rg_mbid)?;
                let was_success = record.is_success();
                record.status = normalize_status(response.status_tag());
                record.attempts = record.attempts.saturating_add(1);
                record.last_status_code = response.status_code_label();
                record.last_checked = checked_at.to_string();
                copy_headers(response, &mut record.last_canary_target, &mut record.last_cf_cache_status);
                self.dirty_release_groups.insert(rg_mbid.clone());
                Applied {
                    was_success,
                    now_success: record.is_success(),
                }
            }
        };

        self.pending_observations
            .push(Observation::from_probe(target, response, checked_at));
        Some(applied)
    }

    /// Clear attempt counters so capped entities become eligible again
    pub fn reset_attempts(&mut self, scope: ResetScope) -> ResetReport {
        let mut report = ResetReport::default();

        for (mbid, record) in self.artists.iter_mut() {
            let mut touched = false;
            if scope.artists && record.attempts > 0 && !(scope.failed_only && record.is_success()) {
                record.attempts = 0;
                report.artists += 1;
                touched = true;
            }
            if scope.text_search
                && record.text_search_attempts > 0
                && !(scope.failed_only && record.text_search_success)
            {
                record.text_search_attempts = 0;
                report.text_search += 1;
                touched = true;
            }
            if touched {
                self.dirty_artists.insert(mbid.clone());
            }
        }

        if scope.release_groups {
            for (rg_mbid, record) in self.release_groups.iter_mut() {
                if record.attempts > 0 && !(scope.failed_only && record.is_success()) {
                    record.attempts = 0;
                    report.release_groups += 1;
                    self.dirty_release_groups.insert(rg_mbid.clone());
                }
            }
        }

        report
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write changed records and pending observations.
    ///
    /// Dirty state is only cleared once the write succeeded, so a failed
    /// flush is retried in full by the next one.
    pub fn flush(&mut self, storage: &Storage) -> Result<(), StorageError> {
        if !self.dirty_artists.is_empty() {
            storage.write_artists(&self.artists, WriteScope::Changed(&self.dirty_artists))?;
            self.dirty_artists.clear();
        }
        if !self.dirty_release_groups.is_empty() {
            storage.write_release_groups(&self.release_groups, WriteScope::Changed(&self.dirty_release_groups))?;
            self.dirty_release_groups.clear();
        }
        if !self.pending_observations.is_empty() {
            storage.record_observations(&self.pending_observations)?;
            debug!(count = self.pending_observations.len(), "Recorded observations");
            self.pending_observations.clear();
        }
        Ok(())
    }

    /// Write both tables in full
    pub fn flush_all(&mut self, storage: &Storage) -> Result<(), StorageError> {
        storage.write_artists(&self.artists, WriteScope::Full)?;
        storage.write_release_groups(&self.release_groups, WriteScope::Full)?;
        self.dirty_artists.clear();
        self.dirty_release_groups.clear();
        if !self.pending_observations.is_empty() {
            storage.record_observations(&self.pending_observations)?;
            self.pending_observations.clear();
        }
        Ok(())
    }
}

fn copy_headers(response: &ProbeResponse, canary: &mut String, cf_cache: &mut String) {
    if let Some(value) = &response.canary_target {
        *canary = value.clone();
    }
    if let Some(value) = &response.cf_cache_status {
        *cf_cache = value.clone();
    }
}
