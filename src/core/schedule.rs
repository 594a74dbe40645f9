//! Repeating runs for the `schedule` command.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

use crate::config::ScheduleSettings;

use super::engine::{Engine, RunOptions};

/// Totals for a finished schedule loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub runs: u32,
    pub failures: u32,
}

/// Run `engine` every `interval_seconds` until `max_runs` runs have
/// happened (0 = unlimited) or `shutdown` resolves.
///
/// A failed run is logged and the loop carries on.
pub async fn run_schedule<F>(
    engine: &Engine,
    schedule: &ScheduleSettings,
    options: RunOptions,
    shutdown: F,
) -> ScheduleReport
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let interval = Duration::from_secs(schedule.interval_seconds);
    let mut report = ScheduleReport::default();

    info!(
        interval_secs = schedule.interval_seconds,
        max_runs = schedule.max_runs,
        run_at_start = schedule.run_at_start,
        "Scheduler started"
    );

    if !schedule.run_at_start {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested before first run");
                return report;
            }
        }
    }

    loop {
        report.runs += 1;
        info!(run = report.runs, "Scheduled run starting");

        tokio::select! {
            result = engine.run(&options) => match result {
                Ok(summary) => info!(run = report.runs, run_id = %summary.run_id, "Scheduled run finished"),
                Err(e) => {
                    report.failures += 1;
                    error!(run = report.runs, "Scheduled run failed: {:#}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, abandoning current run");
                return report;
            }
        }

        if schedule.max_runs > 0 && report.runs >= schedule.max_runs {
            info!(runs = report.runs, "Reached max_runs, stopping");
            return report;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return report;
            }
        }
    }
}
