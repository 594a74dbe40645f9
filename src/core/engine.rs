//! Run orchestration.
//!
//! One run: lock the ledger, sync the entity set from the library manager,
//! then probe artists, text searches and release groups in that order.
//! Release groups are selected only after artist status has been
//! propagated into their rows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{HttpProber, LibraryArtist, LibraryManager, LidarrClient, Prober};
use crate::config::Settings;
use crate::domain::{iso_now, ProbePhase};
use crate::ingest::{ManualEntries, ManualEntriesReport};
use crate::storage::{RunLock, Storage};

use super::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use super::ledger::{Ledger, MergeStats};
use super::rate_limiter::RateLimiter;
use super::selection::{select_artists, select_release_groups, select_text_searches, SelectionPolicy};
use super::worker_pool::{PhaseSummary, PoolSettings, ProbeWorkerPool, RefreshHook};

/// Per-invocation switches layered over the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub force_artists: bool,
    pub force_text_search: bool,
    pub force_rg: bool,

    /// Sync and select, but probe and write nothing
    pub dry_run: bool,
}

/// Effective force flags for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForceFlags {
    pub artists: bool,
    pub text_search: bool,
    pub release_groups: bool,
}

/// Work-set sizes computed by a dry run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlannedWork {
    pub artists: usize,
    pub text_searches: usize,
    pub release_groups: usize,
}

/// Outcome of one run, also written to `results_dir`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: String,
    pub finished_at: String,
    pub first_run: bool,
    pub dry_run: bool,
    pub storage: String,
    pub force: ForceFlags,
    pub artists_merged: MergeStats,
    pub release_groups_merged: MergeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_entries: Option<ManualEntriesReport>,
    /// Release-group rows refreshed by artist status propagation
    pub propagated: usize,
    pub phases: Vec<PhaseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned: Option<PlannedWork>,
    pub breaker: BreakerSnapshot,
}

impl RunSummary {
    pub fn phase(&self, phase: ProbePhase) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// Cache-warming engine. The breaker and limiter live as long as the
/// engine, so scheduled runs share upstream-health state.
pub struct Engine {
    settings: Settings,
    storage: Storage,
    library: Arc<dyn LibraryManager>,
    prober: Arc<dyn Prober>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        storage: Storage,
        library: Arc<dyn LibraryManager>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.probe.rate_limit_per_second));
        let breaker = Arc::new(CircuitBreaker::new(settings.breaker_config()));
        Self {
            settings,
            storage,
            library,
            prober,
            limiter,
            breaker,
        }
    }

    /// Wire the HTTP adapters and storage backend named by the settings
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let storage = Storage::open(&settings.ledger).context("Failed to open ledger storage")?;
        let library = LidarrClient::new(&settings.lidarr)?;
        let prober = HttpProber::new(&settings.probe.target_base_url, settings.probe.timeout())?;
        Ok(Self::new(settings, storage, Arc::new(library), Arc::new(prober)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute one complete run
    #[instrument(skip(self, options), fields(run_id = tracing::field::Empty))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = iso_now();
        let run = &self.settings.run;
        let probe = &self.settings.probe;

        info!(%run_id, storage = %self.storage.describe(), dry_run = options.dry_run, "Starting run");
        let _lock = RunLock::acquire(&self.storage.lock_path())?;

        let first_run = !self.storage.exists()?;
        let force = ForceFlags {
            artists: run.force_artists || options.force_artists || first_run,
            text_search: run.force_text_search || options.force_text_search || first_run,
            release_groups: run.force_rg || options.force_rg || first_run,
        };
        if first_run {
            info!("No existing ledger, forcing every enabled phase for this run");
        }

        match self.prober.health_check().await {
            Ok(()) => info!("Target API is healthy"),
            Err(e) => warn!("Target API health check failed, continuing: {:#}", e),
        }

        let artists = self
            .library
            .get_artists()
            .await
            .with_context(|| format!("Failed to fetch artists from {}", self.library.name()))?;
        let release_groups = if run.process_release_groups {
            self.library
                .get_release_groups()
                .await
                .with_context(|| format!("Failed to fetch release groups from {}", self.library.name()))?
        } else {
            Vec::new()
        };

        let mut ledger = Ledger::load(&self.storage).context("Failed to load ledger")?;
        let manual_entries = if run.process_manual_entries {
            self.inject_manual_entries(&mut ledger)
        } else {
            None
        };
        let artists_merged = ledger.merge_artists(&artists);
        let release_groups_merged = ledger.merge_release_groups(&release_groups);
        info!(
            artists = ledger.artists.len(),
            artists_new = artists_merged.added,
            release_groups = ledger.release_groups.len(),
            release_groups_new = release_groups_merged.added,
            "Ledger synced"
        );

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: String::new(),
            first_run,
            dry_run: options.dry_run,
            storage: self.storage.describe(),
            force,
            artists_merged,
            release_groups_merged,
            manual_entries,
            propagated: 0,
            phases: Vec::new(),
            planned: None,
            breaker: self.breaker.snapshot(),
        };

        let artist_policy = SelectionPolicy::new(probe.max_attempts_per_artist, force.artists, run.cache_recheck_hours);
        let text_policy = SelectionPolicy::new(
            probe.max_attempts_per_artist_textsearch,
            force.text_search,
            run.cache_recheck_hours,
        );
        let rg_policy = SelectionPolicy::new(probe.max_attempts_per_rg, force.release_groups, run.cache_recheck_hours);
        let text_options = run.text_search_options();
        if run.process_artist_textsearch && text_options.uses_deprecated_symbol_removal() {
            warn!("artist_textsearch_remove_symbols is deprecated and drops non-Latin names; use artist_textsearch_transliterate_unicode");
        }

        if options.dry_run {
            let now = Utc::now();
            let mut planned = PlannedWork {
                artists: select_artists(&ledger, &artist_policy, now).len(),
                ..Default::default()
            };
            if run.process_artist_textsearch {
                planned.text_searches =
                    select_text_searches(&ledger, &text_policy, &text_options, now).len();
            }
            if run.process_release_groups {
                summary.propagated = ledger.propagate_artist_status();
                planned.release_groups = select_release_groups(&ledger.release_groups, &rg_policy, now).len();
            }
            info!(
                artists = planned.artists,
                text_searches = planned.text_searches,
                release_groups = planned.release_groups,
                "Dry run, nothing probed or written"
            );
            summary.planned = Some(planned);
            summary.finished_at = iso_now();
            return Ok(summary);
        }

        ledger.flush_all(&self.storage).context("Failed to write synced ledger")?;

        let pool = self.pool(&artists);

        let items = select_artists(&ledger, &artist_policy, Utc::now());
        let phase = pool
            .run_phase(ProbePhase::ArtistMbid, items, &mut ledger, &self.storage)
            .await?;
        summary.phases.push(phase);

        if run.process_artist_textsearch {
            let items = select_text_searches(&ledger, &text_policy, &text_options, Utc::now());
            let phase = pool
                .run_phase(ProbePhase::TextSearch, items, &mut ledger, &self.storage)
                .await?;
            summary.phases.push(phase);
        }

        if run.process_release_groups {
            ledger.flush(&self.storage)?;
            summary.propagated = self
                .storage
                .update_release_groups_artist_status(&ledger.artists)
                .context("Failed to propagate artist status to release groups")?;
            ledger.reload_release_groups(&self.storage)?;
            info!(updated = summary.propagated, "Propagated artist status to release groups");

            let items = select_release_groups(&ledger.release_groups, &rg_policy, Utc::now());
            let phase = pool
                .run_phase(ProbePhase::ReleaseGroup, items, &mut ledger, &self.storage)
                .await?;
            summary.phases.push(phase);
        }

        ledger.flush(&self.storage).context("Failed to write final ledger")?;

        summary.breaker = self.breaker.snapshot();
        summary.finished_at = iso_now();
        info!(%run_id, phases = summary.phases.len(), "Run complete");

        if let Some(dir) = &run.results_dir {
            if let Err(e) = write_results(dir, &summary) {
                warn!("Failed to write run summary: {:#}", e);
            }
        }

        Ok(summary)
    }

    fn pool(&self, artists: &[LibraryArtist]) -> ProbeWorkerPool {
        let pool = ProbeWorkerPool::new(
            Arc::clone(&self.prober),
            Arc::clone(&self.limiter),
            Arc::clone(&self.breaker),
            PoolSettings::from_settings(&self.settings),
        );

        if !self.settings.actions.update_lidarr {
            return pool;
        }

        let artist_ids: HashMap<String, i64> = artists
            .iter()
            .filter_map(|a| a.id.map(|id| (a.mbid.clone(), id)))
            .collect();
        pool.with_refresh(RefreshHook {
            library: Arc::clone(&self.library),
            artist_ids,
        })
    }

    /// Manual-entry problems are logged and never fail the run
    fn inject_manual_entries(&self, ledger: &mut Ledger) -> Option<ManualEntriesReport> {
        let path = &self.settings.run.manual_entries_file;
        match ManualEntries::load(path) {
            Ok(Some(entries)) => {
                let report = ledger.apply_manual_entries(&entries);
                info!(
                    artists_new = report.artists_new,
                    artists_updated = report.artists_updated,
                    release_groups_new = report.release_groups_new,
                    release_groups_updated = report.release_groups_updated,
                    "Applied manual entries"
                );
                Some(report)
            }
            Ok(None) => {
                warn!(path = %path.display(), "Manual entries file not found");
                None
            }
            Err(e) => {
                warn!("Skipping manual entries: {}", e);
                None
            }
        }
    }
}

/// Write `results_<timestamp>.json` into `dir`
fn write_results(dir: &Path, summary: &RunSummary) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let name = format!("results_{}.json", Utc::now().format("%Y%m%dT%H%M%SZ"));
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Run summary written");
    Ok(())
}
