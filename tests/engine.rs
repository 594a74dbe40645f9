//! Engine Integration Tests
//!
//! Full runs against an in-memory library and prober, with the ledger in a
//! temporary directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cache_warmer::adapters::{LibraryArtist, LibraryManager, LibraryReleaseGroup, Prober};
use cache_warmer::config::ScheduleSettings;
use cache_warmer::core::{run_schedule, BreakerState, Engine, RunOptions};
use cache_warmer::domain::{ArtistLedger, ArtistRecord, ProbeFailure, ProbePhase, ProbeResponse, ProbeTarget};
use cache_warmer::storage::{CsvStorage, Storage, WriteScope};
use cache_warmer::Settings;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeLibrary {
    artists: Vec<LibraryArtist>,
    release_groups: Vec<LibraryReleaseGroup>,
    refreshed: Mutex<Vec<i64>>,
    unreachable: bool,
}

impl FakeLibrary {
    fn with_artists(ids: &[(&str, &str)]) -> Self {
        let artists = ids
            .iter()
            .enumerate()
            .map(|(i, (mbid, name))| LibraryArtist {
                id: Some(i as i64 + 1),
                name: name.to_string(),
                mbid: mbid.to_string(),
            })
            .collect();
        Self {
            artists,
            ..Default::default()
        }
    }

    fn refreshed(&self) -> Vec<i64> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LibraryManager for FakeLibrary {
    fn name(&self) -> &str {
        "fake-library"
    }

    async fn get_artists(&self) -> Result<Vec<LibraryArtist>> {
        if self.unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(self.artists.clone())
    }

    async fn get_release_groups(&self) -> Result<Vec<LibraryReleaseGroup>> {
        Ok(self.release_groups.clone())
    }

    async fn refresh_artist(&self, artist_id: i64) -> Result<()> {
        self.refreshed.lock().unwrap().push(artist_id);
        Ok(())
    }
}

/// Answers 200 unless an entity has a scripted response
#[derive(Default)]
struct FakeProber {
    scripted: Mutex<HashMap<String, ProbeResponse>>,
    calls: Mutex<Vec<ProbeTarget>>,
}

impl FakeProber {
    fn script(&self, entity_id: &str, response: ProbeResponse) {
        self.scripted
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), response);
    }

    fn calls(&self) -> Vec<ProbeTarget> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Prober for FakeProber {
    fn name(&self) -> &str {
        "fake-prober"
    }

    async fn probe(&self, target: &ProbeTarget) -> ProbeResponse {
        self.calls.lock().unwrap().push(target.clone());
        self.scripted
            .lock()
            .unwrap()
            .get(target.entity_id())
            .cloned()
            .unwrap_or_else(|| ProbeResponse::from_status(200))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.lidarr.api_key = "test-key".to_string();
    settings.probe.rate_limit_per_second = 1000.0;
    settings.probe.delay_between_attempts = 0.0;
    settings.probe.max_concurrent_requests = 4;
    settings.run.process_artist_textsearch = false;
    settings
}

fn csv_storage(dir: &TempDir) -> Storage {
    Storage::Csv(CsvStorage::new(
        dir.path().join("mbid-artists.csv"),
        dir.path().join("mbid-releasegroups.csv"),
    ))
}

fn engine(
    settings: Settings,
    dir: &TempDir,
    library: &Arc<FakeLibrary>,
    prober: &Arc<FakeProber>,
) -> Engine {
    Engine::new(
        settings,
        csv_storage(dir),
        Arc::clone(library) as Arc<dyn LibraryManager>,
        Arc::clone(prober) as Arc<dyn Prober>,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_first_run_records_timeout_and_success() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Timeout Band"), ("def", "Warm Band")]));
    let prober = Arc::new(FakeProber::default());
    prober.script("abc", ProbeResponse::failure(ProbeFailure::Timeout));
    prober.script(
        "def",
        ProbeResponse::from_status(200).with_headers(Some("edge-7".into()), Some("HIT".into())),
    );

    let engine = engine(test_settings(), &dir, &library, &prober);
    let summary = engine.run(&RunOptions::default()).await.unwrap();

    assert!(summary.first_run);
    assert!(summary.force.artists);
    assert_eq!(summary.artists_merged.added, 2);
    let phase = summary.phase(ProbePhase::ArtistMbid).unwrap();
    assert_eq!(phase.selected, 2);
    assert_eq!(phase.succeeded, 1);
    assert_eq!(phase.timeouts, 1);

    let artists = engine.storage().read_artists().unwrap();
    let abc = &artists["abc"];
    assert_eq!(abc.status, "timeout");
    assert_eq!(abc.attempts, 1);
    assert_eq!(abc.last_status_code, "TIMEOUT");
    assert!(!abc.last_checked.is_empty());

    let def = &artists["def"];
    assert_eq!(def.status, "success");
    assert_eq!(def.last_status_code, "200");
    assert_eq!(def.last_canary_target, "edge-7");
    assert_eq!(def.last_cf_cache_status, "HIT");
}

#[tokio::test]
async fn test_second_run_only_retries_failures() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Cold"), ("def", "Warm")]));
    let prober = Arc::new(FakeProber::default());
    prober.script("abc", ProbeResponse::from_status(503));

    let engine = engine(test_settings(), &dir, &library, &prober);
    engine.run(&RunOptions::default()).await.unwrap();
    prober.clear_calls();

    let summary = engine.run(&RunOptions::default()).await.unwrap();
    assert!(!summary.first_run);
    assert!(!summary.force.artists);
    assert_eq!(
        prober.calls(),
        vec![ProbeTarget::Artist {
            mbid: "abc".to_string()
        }]
    );

    let artists = engine.storage().read_artists().unwrap();
    assert_eq!(artists["abc"].attempts, 2);
    assert_eq!(artists["abc"].status, "http_error");
    assert_eq!(artists["abc"].last_status_code, "503");
    assert_eq!(artists["def"].attempts, 1);
}

#[tokio::test]
async fn test_force_flag_reprobes_successes() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "One"), ("def", "Two")]));
    let prober = Arc::new(FakeProber::default());

    let engine = engine(test_settings(), &dir, &library, &prober);
    engine.run(&RunOptions::default()).await.unwrap();
    prober.clear_calls();

    let options = RunOptions {
        force_artists: true,
        ..Default::default()
    };
    let summary = engine.run(&options).await.unwrap();
    assert!(summary.force.artists);
    assert_eq!(prober.calls().len(), 2);
    assert_eq!(engine.storage().read_artists().unwrap()["abc"].attempts, 2);
}

#[tokio::test]
async fn test_release_groups_wait_for_artist_status() {
    let dir = TempDir::new().unwrap();
    let mut library = FakeLibrary::with_artists(&[("a-ok", "Warm"), ("a-bad", "Cold")]);
    library.release_groups = vec![
        LibraryReleaseGroup {
            rg_mbid: "r-ok".into(),
            rg_title: "Warm Album".into(),
            artist_mbid: "a-ok".into(),
            artist_name: "Warm".into(),
        },
        LibraryReleaseGroup {
            rg_mbid: "r-bad".into(),
            rg_title: "Cold Album".into(),
            artist_mbid: "a-bad".into(),
            artist_name: "Cold".into(),
        },
    ];
    let library = Arc::new(library);
    let prober = Arc::new(FakeProber::default());
    prober.script("a-bad", ProbeResponse::from_status(500));

    let mut settings = test_settings();
    settings.run.process_release_groups = true;
    let engine = engine(settings, &dir, &library, &prober);
    let summary = engine.run(&RunOptions::default()).await.unwrap();

    assert!(summary.force.release_groups);
    assert_eq!(summary.propagated, 2);
    assert_eq!(summary.phase(ProbePhase::ReleaseGroup).unwrap().selected, 1);
    assert!(prober.calls().contains(&ProbeTarget::ReleaseGroup {
        rg_mbid: "r-ok".to_string()
    }));
    assert!(!prober.calls().contains(&ProbeTarget::ReleaseGroup {
        rg_mbid: "r-bad".to_string()
    }));

    let release_groups = engine.storage().read_release_groups().unwrap();
    assert_eq!(release_groups["r-ok"].artist_cache_status, "success");
    assert_eq!(release_groups["r-ok"].status, "success");
    assert_eq!(release_groups["r-bad"].artist_cache_status, "http_error");
    assert_eq!(release_groups["r-bad"].status, "");
    assert_eq!(release_groups["r-bad"].attempts, 0);
}

#[tokio::test]
async fn test_text_search_uses_artist_name() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "  The   Band ")]));
    let prober = Arc::new(FakeProber::default());

    let mut settings = test_settings();
    settings.run.process_artist_textsearch = true;
    settings.run.artist_textsearch_lowercase = true;
    let engine = engine(settings, &dir, &library, &prober);
    engine.run(&RunOptions::default()).await.unwrap();

    assert!(prober.calls().contains(&ProbeTarget::TextSearch {
        artist_mbid: "abc".to_string(),
        query: "the band".to_string(),
    }));
    let artists = engine.storage().read_artists().unwrap();
    assert!(artists["abc"].text_search_attempted);
    assert!(artists["abc"].text_search_success);
    assert_eq!(artists["abc"].text_search_attempts, 1);
}

#[tokio::test]
async fn test_text_search_transliterates_names() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Sigur Rós"), ("def", "AC/DC")]));
    let prober = Arc::new(FakeProber::default());

    let mut settings = test_settings();
    settings.run.process_artist_textsearch = true;
    settings.run.artist_textsearch_transliterate_unicode = true;
    let engine = engine(settings, &dir, &library, &prober);
    engine.run(&RunOptions::default()).await.unwrap();

    let calls = prober.calls();
    assert!(calls.contains(&ProbeTarget::TextSearch {
        artist_mbid: "abc".to_string(),
        query: "Sigur Ros".to_string(),
    }));
    assert!(calls.contains(&ProbeTarget::TextSearch {
        artist_mbid: "def".to_string(),
        query: "AC DC".to_string(),
    }));
}

#[tokio::test]
async fn test_dry_run_probes_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "One"), ("def", "Two")]));
    let prober = Arc::new(FakeProber::default());

    let engine = engine(test_settings(), &dir, &library, &prober);
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = engine.run(&options).await.unwrap();

    let planned = summary.planned.unwrap();
    assert_eq!(planned.artists, 2);
    assert!(summary.phases.is_empty());
    assert!(prober.calls().is_empty());
    assert!(!dir.path().join("mbid-artists.csv").exists());
    assert!(!engine.storage().exists().unwrap());
}

#[tokio::test]
async fn test_open_breaker_leaves_records_untouched() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<(String, String)> = (0..5).map(|i| (format!("a{}", i), format!("Artist {}", i))).collect();
    let refs: Vec<(&str, &str)> = ids.iter().map(|(m, n)| (m.as_str(), n.as_str())).collect();
    let library = Arc::new(FakeLibrary::with_artists(&refs));
    let prober = Arc::new(FakeProber::default());
    for (mbid, _) in &ids {
        prober.script(mbid, ProbeResponse::from_status(503));
    }

    let mut settings = test_settings();
    settings.probe.max_concurrent_requests = 1;
    settings.probe.circuit_breaker_threshold = 2;
    settings.probe.circuit_breaker_base_delay_seconds = 60.0;
    settings.probe.max_backoff_seconds = 60.0;
    let engine = engine(settings, &dir, &library, &prober);
    let summary = engine.run(&RunOptions::default()).await.unwrap();

    let phase = summary.phase(ProbePhase::ArtistMbid).unwrap();
    assert_eq!(phase.probed, 2);
    assert_eq!(phase.skipped_circuit_open, 3);
    assert_eq!(summary.breaker.state, BreakerState::Open);
    assert_eq!(prober.calls().len(), 2);

    let artists = engine.storage().read_artists().unwrap();
    let probed: Vec<_> = artists.values().filter(|a| a.attempts > 0).collect();
    assert_eq!(probed.len(), 2);
    for untouched in artists.values().filter(|a| a.attempts == 0) {
        assert_eq!(untouched.status, "");
        assert_eq!(untouched.last_checked, "");
    }
}

#[tokio::test]
async fn test_recovery_triggers_library_refresh() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Flaky")]));
    let prober = Arc::new(FakeProber::default());
    prober.script("abc", ProbeResponse::from_status(500));

    let mut settings = test_settings();
    settings.actions.update_lidarr = true;
    let engine = engine(settings, &dir, &library, &prober);

    engine.run(&RunOptions::default()).await.unwrap();
    assert!(library.refreshed().is_empty());

    prober.script("abc", ProbeResponse::from_status(200));
    let summary = engine.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.phase(ProbePhase::ArtistMbid).unwrap().refreshes_triggered, 1);

    // Refreshes are fire-and-forget
    for _ in 0..100 {
        if !library.refreshed().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(library.refreshed(), vec![1]);
}

#[tokio::test]
async fn test_manual_entries_are_probed() {
    let dir = TempDir::new().unwrap();
    let manual_path = dir.path().join("manual_entries.yml");
    std::fs::write(
        &manual_path,
        "1E1B6B5C-4F41-4A53-8F2E-3C3D5B3A8E01:\n  name: Manual Artist\n",
    )
    .unwrap();

    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Library Artist")]));
    let prober = Arc::new(FakeProber::default());

    let mut settings = test_settings();
    settings.run.process_manual_entries = true;
    settings.run.manual_entries_file = manual_path;
    let engine = engine(settings, &dir, &library, &prober);
    let summary = engine.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.manual_entries.unwrap().artists_new, 1);
    let artists = engine.storage().read_artists().unwrap();
    let manual = &artists["1e1b6b5c-4f41-4a53-8f2e-3c3d5b3a8e01"];
    assert!(manual.manual_entry);
    assert_eq!(manual.artist_name, "Manual Artist");
    assert_eq!(manual.status, "success");
    assert!(!artists["abc"].manual_entry);
}

#[tokio::test]
async fn test_results_summary_written() {
    let dir = TempDir::new().unwrap();
    let results = dir.path().join("results");
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "One")]));
    let prober = Arc::new(FakeProber::default());

    let mut settings = test_settings();
    settings.run.results_dir = Some(results.clone());
    let engine = engine(settings, &dir, &library, &prober);
    let summary = engine.run(&RunOptions::default()).await.unwrap();

    let files: Vec<_> = std::fs::read_dir(&results).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(json["run_id"], summary.run_id.to_string());
    assert_eq!(json["phases"][0]["phase"], "artist_mbid");
}

#[tokio::test]
async fn test_library_failure_aborts_run_without_writes() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary {
        unreachable: true,
        ..Default::default()
    });
    let prober = Arc::new(FakeProber::default());

    let engine = engine(test_settings(), &dir, &library, &prober);
    let err = engine.run(&RunOptions::default()).await.unwrap_err();

    assert!(format!("{:#}", err).contains("fake-library"));
    assert!(prober.calls().is_empty());
    assert!(!engine.storage().exists().unwrap());
}

#[tokio::test]
async fn test_attempt_cap_excludes_until_forced() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Never Warm"), ("def", "Warm")]));
    let prober = Arc::new(FakeProber::default());
    prober.script("abc", ProbeResponse::failure(ProbeFailure::Timeout));

    let mut settings = test_settings();
    settings.probe.max_attempts_per_artist = 25;
    let engine = engine(settings, &dir, &library, &prober);

    let report = run_schedule(&engine, &schedule(25, true), RunOptions::default(), std::future::pending()).await;
    assert_eq!(report.failures, 0);
    let artists = engine.storage().read_artists().unwrap();
    assert_eq!(artists["abc"].attempts, 25);
    assert_eq!(artists["abc"].status, "timeout");

    // Capped and not forced: nothing qualifies
    prober.clear_calls();
    let summary = engine.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.phase(ProbePhase::ArtistMbid).unwrap().selected, 0);
    assert!(prober.calls().is_empty());
    assert_eq!(engine.storage().read_artists().unwrap()["abc"].attempts, 25);

    // Forcing ignores the cap
    let options = RunOptions {
        force_artists: true,
        ..Default::default()
    };
    engine.run(&options).await.unwrap();
    assert!(prober.calls().contains(&ProbeTarget::Artist {
        mbid: "abc".to_string()
    }));
    assert_eq!(engine.storage().read_artists().unwrap()["abc"].attempts, 26);
}

fn seed_artists(storage: &Storage, records: Vec<ArtistRecord>) {
    let ledger: ArtistLedger = records.into_iter().map(|r| (r.mbid.clone(), r)).collect();
    storage.write_artists(&ledger, WriteScope::Full).unwrap();
}

fn warm_artist(mbid: &str, name: &str, checked: DateTime<Utc>) -> ArtistRecord {
    let mut record = ArtistRecord::new(mbid, name);
    record.status = "success".into();
    record.attempts = 1;
    record.last_status_code = "200".into();
    record.last_checked = checked.to_rfc3339();
    record
}

#[tokio::test]
async fn test_stale_success_is_rechecked_once() {
    let dir = TempDir::new().unwrap();
    let stale_checked = Utc::now() - chrono::Duration::hours(73);
    seed_artists(
        &csv_storage(&dir),
        vec![
            warm_artist("abc", "Stale", stale_checked),
            warm_artist("def", "Fresh", Utc::now() - chrono::Duration::hours(1)),
        ],
    );

    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "Stale"), ("def", "Fresh")]));
    let prober = Arc::new(FakeProber::default());
    let mut settings = test_settings();
    settings.run.cache_recheck_hours = 72.0;
    let engine = engine(settings, &dir, &library, &prober);

    let summary = engine.run(&RunOptions::default()).await.unwrap();
    assert!(!summary.first_run);
    assert_eq!(
        prober.calls(),
        vec![ProbeTarget::Artist {
            mbid: "abc".to_string()
        }]
    );

    let artists = engine.storage().read_artists().unwrap();
    assert_eq!(artists["abc"].attempts, 2);
    assert_eq!(artists["abc"].status, "success");
    let rechecked = DateTime::parse_from_rfc3339(&artists["abc"].last_checked).unwrap();
    assert!(rechecked.with_timezone(&Utc) > Utc::now() - chrono::Duration::hours(1));
    assert_eq!(artists["def"].attempts, 1);

    // Freshly rechecked, so the next run selects nothing
    prober.clear_calls();
    let summary = engine.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.phase(ProbePhase::ArtistMbid).unwrap().selected, 0);
    assert!(prober.calls().is_empty());
}

// ============================================================================
// Schedule
// ============================================================================

fn schedule(max_runs: u32, run_at_start: bool) -> ScheduleSettings {
    ScheduleSettings {
        interval_seconds: 0,
        run_at_start,
        max_runs,
    }
}

#[tokio::test]
async fn test_schedule_stops_after_max_runs() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "One")]));
    let prober = Arc::new(FakeProber::default());
    prober.script("abc", ProbeResponse::from_status(500));
    let engine = engine(test_settings(), &dir, &library, &prober);

    let report = run_schedule(&engine, &schedule(3, true), RunOptions::default(), std::future::pending()).await;

    assert_eq!(report.runs, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(engine.storage().read_artists().unwrap()["abc"].attempts, 3);
}

#[tokio::test]
async fn test_schedule_counts_failed_runs() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary {
        unreachable: true,
        ..Default::default()
    });
    let prober = Arc::new(FakeProber::default());
    let engine = engine(test_settings(), &dir, &library, &prober);

    let report = run_schedule(&engine, &schedule(2, true), RunOptions::default(), std::future::pending()).await;

    assert_eq!(report.runs, 2);
    assert_eq!(report.failures, 2);
}

#[tokio::test]
async fn test_schedule_shutdown_before_first_run() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_artists(&[("abc", "One")]));
    let prober = Arc::new(FakeProber::default());
    let mut settings = schedule(0, false);
    settings.interval_seconds = 3600;
    let engine = engine(test_settings(), &dir, &library, &prober);

    let report = run_schedule(&engine, &settings, RunOptions::default(), std::future::ready(())).await;

    assert_eq!(report.runs, 0);
    assert!(prober.calls().is_empty());
}
