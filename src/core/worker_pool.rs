//! Fixed-size probe worker pool.
//!
//! Each phase drains a pre-computed queue with `concurrency` workers. A
//! worker takes the next item, waits for a rate-limiter slot, asks the
//! circuit breaker for admission, probes, feeds the outcome back into the
//! breaker and sends the result to the collector.
//!
//! The collector runs on the calling task and is the only code that
//! mutates the ledger. It flushes every `batch_write_frequency` completions,
//! at every `batch_size` boundary and once more when the phase ends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{LibraryManager, Prober};
use crate::config::Settings;
use crate::domain::{iso_now, ProbeFailure, ProbePhase, ProbeResponse, ProbeTarget};
use crate::storage::{Storage, StorageError};

use super::circuit_breaker::CircuitBreaker;
use super::ledger::Ledger;
use super::rate_limiter::{RateLimiter, WorkerPacer};

/// Pool sizing and batching
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub concurrency: usize,

    /// Per-worker spacing in seconds
    pub delay_between_attempts: f64,

    pub batch_size: usize,

    pub batch_write_frequency: usize,

    /// 0 disables progress lines
    pub log_progress_every_n: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            delay_between_attempts: 0.25,
            batch_size: 25,
            batch_write_frequency: 5,
            log_progress_every_n: 25,
        }
    }
}

impl PoolSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            concurrency: settings.probe.max_concurrent_requests.max(1),
            delay_between_attempts: settings.probe.delay_between_attempts,
            batch_size: settings.run.batch_size.max(1),
            batch_write_frequency: settings.run.batch_write_frequency.max(1),
            log_progress_every_n: settings.monitoring.log_progress_every_n,
        }
    }
}

/// Library refresh requested when an artist turns warm
pub struct RefreshHook {
    pub library: Arc<dyn LibraryManager>,

    /// Artist MBID to library-internal id
    pub artist_ids: HashMap<String, i64>,
}

/// Outcome counters for one phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: ProbePhase,
    pub selected: usize,
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timeouts: usize,
    /// Not contacted because the breaker was open
    pub skipped_circuit_open: usize,
    pub refreshes_triggered: usize,
    pub flushes: usize,
    pub elapsed_seconds: f64,
}

impl PhaseSummary {
    pub fn new(phase: ProbePhase, selected: usize) -> Self {
        Self {
            phase,
            selected,
            probed: 0,
            succeeded: 0,
            failed: 0,
            timeouts: 0,
            skipped_circuit_open: 0,
            refreshes_triggered: 0,
            flushes: 0,
            elapsed_seconds: 0.0,
        }
    }
}

/// Message from a worker to the collector
enum WorkerEvent {
    Completed {
        target: ProbeTarget,
        response: ProbeResponse,
        checked_at: String,
    },
    Skipped {
        target: ProbeTarget,
    },
}

/// Shared queue of pending work
type WorkQueue = Arc<Mutex<VecDeque<ProbeTarget>>>;

fn next_item(queue: &WorkQueue) -> Option<ProbeTarget> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

async fn worker_loop(
    worker_id: usize,
    queue: WorkQueue,
    prober: Arc<dyn Prober>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    delay_between_attempts: f64,
    tx: mpsc::Sender<WorkerEvent>,
) {
    let mut pacer = WorkerPacer::from_secs_f64(delay_between_attempts);

    while let Some(target) = next_item(&queue) {
        limiter.acquire(&mut pacer).await;

        let admission = breaker.try_acquire();
        let event = if admission.is_rejected() {
            WorkerEvent::Skipped { target }
        } else {
            let response = prober.probe(&target).await;
            breaker.record(admission, response.is_success());
            WorkerEvent::Completed {
                target,
                response,
                checked_at: iso_now(),
            }
        };

        if tx.send(event).await.is_err() {
            // Collector is gone
            break;
        }
    }

    debug!(worker_id, "Probe worker finished");
}

/// Drives one phase at a time over a shared limiter and breaker
pub struct ProbeWorkerPool {
    prober: Arc<dyn Prober>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    settings: PoolSettings,
    refresh: Option<RefreshHook>,
}

impl ProbeWorkerPool {
    pub fn new(
        prober: Arc<dyn Prober>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            prober,
            limiter,
            breaker,
            settings,
            refresh: None,
        }
    }

    /// Enable library refreshes on artist failure-to-success transitions
    pub fn with_refresh(mut self, hook: RefreshHook) -> Self {
        self.refresh = Some(hook);
        self
    }

    /// Probe every item and apply the results to `ledger`.
    ///
    /// Only storage failures abort the phase; probe failures are recorded.
    #[instrument(skip_all, fields(phase = %phase, selected = items.len()))]
    pub async fn run_phase(
        &self,
        phase: ProbePhase,
        items: Vec<ProbeTarget>,
        ledger: &mut Ledger,
        storage: &Storage,
    ) -> Result<PhaseSummary, StorageError> {
        let started = Instant::now();
        let total = items.len();
        let mut summary = PhaseSummary::new(phase, total);

        if total == 0 {
            info!("Nothing to probe");
            return Ok(summary);
        }

        let worker_count = self.settings.concurrency.clamp(1, total);
        info!(workers = worker_count, "Starting phase");

        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from(items)));
        let (tx, mut rx) = mpsc::channel::<WorkerEvent>(worker_count * 2);

        // Dropping the set on an early return aborts the workers
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&self.prober),
                Arc::clone(&self.limiter),
                Arc::clone(&self.breaker),
                self.settings.delay_between_attempts,
                tx.clone(),
            ));
        }
        drop(tx);

        let mut completed = 0usize;
        let mut since_flush = 0usize;
        let mut window = ProgressWindow::default();

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Skipped { target } => {
                    summary.skipped_circuit_open += 1;
                    debug!(entity = target.entity_id(), "Skipped, circuit open");
                }
                WorkerEvent::Completed {
                    target,
                    response,
                    checked_at,
                } => {
                    summary.probed += 1;
                    window.probed += 1;
                    if response.is_success() {
                        summary.succeeded += 1;
                        window.succeeded += 1;
                    } else {
                        summary.failed += 1;
                        if response.result == Err(ProbeFailure::Timeout) {
                            summary.timeouts += 1;
                        }
                    }

                    let applied = ledger.apply(&target, &response, &checked_at);
                    if phase == ProbePhase::ArtistMbid
                        && applied.is_some_and(|a| a.became_success())
                        && self.trigger_refresh(target.entity_id())
                    {
                        summary.refreshes_triggered += 1;
                    }
                }
            }

            completed += 1;
            since_flush += 1;
            if since_flush >= self.settings.batch_write_frequency || completed % self.settings.batch_size == 0 {
                ledger.flush(storage)?;
                summary.flushes += 1;
                since_flush = 0;
            }

            let every = self.settings.log_progress_every_n;
            if every > 0 && completed % every == 0 {
                self.log_progress(completed, total, started, &window);
                window = ProgressWindow::default();
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Probe worker failed: {}", e);
            }
        }

        if ledger.has_pending_writes() {
            ledger.flush(storage)?;
            summary.flushes += 1;
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            probed = summary.probed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timeouts = summary.timeouts,
            skipped = summary.skipped_circuit_open,
            elapsed_secs = %format!("{:.1}", summary.elapsed_seconds),
            "Phase complete"
        );
        Ok(summary)
    }

    /// Fire-and-forget refresh of one artist. Returns whether one was sent.
    fn trigger_refresh(&self, mbid: &str) -> bool {
        let Some(hook) = &self.refresh else {
            return false;
        };
        let Some(&artist_id) = hook.artist_ids.get(mbid) else {
            return false;
        };

        let library = Arc::clone(&hook.library);
        tokio::spawn(async move {
            if let Err(e) = library.refresh_artist(artist_id).await {
                debug!(artist_id, "Artist refresh failed: {:#}", e);
            }
        });
        true
    }

    fn log_progress(&self, completed: usize, total: usize, started: Instant, window: &ProgressWindow) {
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { completed as f64 / elapsed } else { 0.0 };
        let eta_secs = if rate > 0.0 {
            (total - completed) as f64 / rate
        } else {
            0.0
        };
        let batch_success = if window.probed > 0 {
            window.succeeded as f64 * 100.0 / window.probed as f64
        } else {
            0.0
        };
        let breaker = self.breaker.snapshot();

        info!(
            completed,
            total,
            rate = %format!("{:.2}/s", rate),
            eta_secs = %format!("{:.0}", eta_secs),
            batch_success = %format!("{:.1}%", batch_success),
            breaker = ?breaker.state,
            breaker_failures = breaker.consecutive_failures,
            breaker_trips = breaker.trips,
            "Progress"
        );
    }
}

/// Outcomes since the last progress line
#[derive(Debug, Default)]
struct ProgressWindow {
    probed: usize,
    succeeded: usize,
}
