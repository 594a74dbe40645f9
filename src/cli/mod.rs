//! Command-line interface for the cache warmer.
//!
//! Provides commands for one-shot and scheduled runs, ledger statistics,
//! attempt resets and config management.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::{self, ConfigError, Settings};
use crate::core::{run_schedule, Engine, Ledger, ResetScope, RunOptions, RunSummary};
use crate::report::{build_report, AttemptCaps};
use crate::storage::{RunLock, Storage};

/// cache-warmer - keeps the Lidarr metadata API cache warm
#[derive(Parser, Debug)]
#[command(name = "cache-warmer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/cache-warmer/config.yaml)
    #[arg(long, global = true, env = "CACHE_WARMER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one cache-warming pass
    Run {
        /// Re-probe every artist regardless of status
        #[arg(long)]
        force_artists: bool,

        /// Re-probe every release group whose artist is cached
        #[arg(long)]
        force_rg: bool,

        /// Re-run every text search
        #[arg(long)]
        force_text_search: bool,

        /// Show what would be probed without making probe calls or writes
        #[arg(long)]
        dry_run: bool,
    },

    /// Run repeatedly on the configured interval
    Schedule,

    /// Show ledger statistics
    Stats {
        /// Include canary target and CDN cache breakdowns
        #[arg(long)]
        canary: bool,
    },

    /// Clear attempt counters so capped entities are retried
    Reset {
        /// Reset artist MBID attempts
        #[arg(long)]
        artists: bool,

        /// Reset text-search attempts
        #[arg(long)]
        text_search: bool,

        /// Reset release-group attempts
        #[arg(long)]
        release_groups: bool,

        /// Only reset entities that are not successful
        #[arg(long)]
        failed_only: bool,
    },

    /// Write the default config file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },

    /// Show resolved configuration (API key masked)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config_path = self.config.unwrap_or_else(config::default_config_path);

        match self.command {
            Commands::Run {
                force_artists,
                force_rg,
                force_text_search,
                dry_run,
            } => {
                let options = RunOptions {
                    force_artists,
                    force_text_search,
                    force_rg,
                    dry_run,
                };
                run_once(&config_path, options).await
            }
            Commands::Schedule => schedule(&config_path).await,
            Commands::Stats { canary } => show_stats(&config_path, canary).await,
            Commands::Reset {
                artists,
                text_search,
                release_groups,
                failed_only,
            } => {
                // No table named: reset all of them
                let all = !(artists || text_search || release_groups);
                let scope = ResetScope {
                    artists: artists || all,
                    text_search: text_search || all,
                    release_groups: release_groups || all,
                    failed_only,
                };
                reset_attempts(&config_path, scope).await
            }
            Commands::InitConfig { overwrite } => init_config(&config_path, overwrite),
            Commands::Config => show_config(&config_path),
        }
    }
}

fn load(path: &Path) -> Result<Settings> {
    Ok(config::load_settings(path)?)
}

/// Run a single pass and print its summary
async fn run_once(config_path: &Path, options: RunOptions) -> Result<()> {
    let settings = load(config_path)?;
    let engine = Engine::from_settings(settings)?;
    let summary = engine.run(&options).await?;
    print_summary(&summary);
    Ok(())
}

async fn schedule(config_path: &Path) -> Result<()> {
    let settings = load(config_path)?;
    let schedule = settings.schedule.clone();
    let engine = Engine::from_settings(settings)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let report = run_schedule(&engine, &schedule, RunOptions::default(), shutdown).await;
    println!("Scheduler stopped after {} runs ({} failed)", report.runs, report.failures);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {} ({})", summary.run_id, if summary.dry_run { "dry run" } else { "complete" });
    if summary.first_run {
        println!("  First run: every enabled phase was forced");
    }
    println!(
        "  Synced: +{} artists, +{} release groups",
        summary.artists_merged.added, summary.release_groups_merged.added
    );
    if let Some(manual) = &summary.manual_entries {
        println!(
            "  Manual entries: +{} artists, +{} release groups",
            manual.artists_new, manual.release_groups_new
        );
    }

    if let Some(planned) = &summary.planned {
        println!("  Would probe:");
        println!("    Artists:        {}", planned.artists);
        println!("    Text searches:  {}", planned.text_searches);
        println!("    Release groups: {}", planned.release_groups);
        return;
    }

    for phase in &summary.phases {
        println!(
            "  {:<15} {:>5} selected, {:>5} ok, {:>5} failed ({} timeouts), {} skipped, {:.1}s",
            phase.phase.to_string(),
            phase.selected,
            phase.succeeded,
            phase.failed,
            phase.timeouts,
            phase.skipped_circuit_open,
            phase.elapsed_seconds
        );
    }
    println!(
        "  Circuit breaker: {:?} (opened {} times, {} calls skipped)",
        summary.breaker.state, summary.breaker.opens, summary.breaker.trips
    );
}

/// Print the ledger report, plus canary/CDN stats if asked
async fn show_stats(config_path: &Path, canary: bool) -> Result<()> {
    let settings = load(config_path)?;
    let storage = Storage::open(&settings.ledger).context("Failed to open ledger storage")?;
    let ledger = Ledger::load(&storage).context("Failed to load ledger")?;

    let caps = AttemptCaps {
        artists: settings.probe.max_attempts_per_artist,
        text_search: settings.probe.max_attempts_per_artist_textsearch,
        release_groups: settings.probe.max_attempts_per_rg,
    };
    let report = build_report(&ledger, caps, settings.run.cache_recheck_hours, Utc::now());

    println!("Ledger: {}", storage.describe());
    println!();
    print!("{}", report);

    if !canary {
        return Ok(());
    }

    println!();
    match storage.canary_statistics() {
        Ok(stats) if stats.is_empty() => println!("No canary data recorded"),
        Ok(stats) => {
            println!("{:<24} {:<12} {:>8} {:>8} {:>8}", "CANARY TARGET", "OPERATION", "TOTAL", "OK", "RATE");
            println!("{}", "-".repeat(64));
            for stat in stats {
                let target = if stat.canary_target.is_empty() {
                    "(no header)"
                } else {
                    stat.canary_target.as_str()
                };
                println!(
                    "{:<24} {:<12} {:>8} {:>8} {:>7.1}%",
                    target,
                    stat.operation_type,
                    stat.total,
                    stat.successful,
                    stat.success_rate()
                );
            }
        }
        Err(e) => warn!("Canary statistics unavailable: {}", e),
    }

    println!();
    match storage.cf_cache_statistics() {
        Ok(stats) if stats.is_empty() => println!("No CDN cache data recorded"),
        Ok(stats) => {
            println!("{:<12} {:>8}  {}", "CF STATUS", "TOTAL", "BY OPERATION");
            println!("{}", "-".repeat(64));
            for stat in stats {
                let breakdown = stat
                    .by_operation
                    .iter()
                    .map(|(op, n)| format!("{}={}", op, n))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{:<12} {:>8}  {}", stat.cf_cache_status, stat.total, breakdown);
            }
        }
        Err(e) => warn!("CDN cache statistics unavailable: {}", e),
    }

    Ok(())
}

async fn reset_attempts(config_path: &Path, scope: ResetScope) -> Result<()> {
    let settings = load(config_path)?;
    let storage = Storage::open(&settings.ledger).context("Failed to open ledger storage")?;
    let _lock = RunLock::acquire(&storage.lock_path())?;

    let mut ledger = Ledger::load(&storage).context("Failed to load ledger")?;
    let report = ledger.reset_attempts(scope);
    ledger.flush(&storage).context("Failed to write ledger")?;

    println!(
        "Reset attempts: {} artists, {} text searches, {} release groups",
        report.artists, report.text_search, report.release_groups
    );
    Ok(())
}

fn init_config(config_path: &Path, overwrite: bool) -> Result<()> {
    config::write_default_config(config_path, overwrite)?;
    println!("Wrote default config to {}", config_path.display());
    println!("Set lidarr.api_key before the first run.");
    Ok(())
}

fn show_config(config_path: &Path) -> Result<()> {
    let settings = match config::load_settings(config_path) {
        Ok(settings) => settings,
        // Show what we have even if validation fails
        Err(ConfigError::Invalid(issues)) => {
            for issue in &issues {
                eprintln!("warning: {}", issue);
            }
            let mut settings = config::load_config_file(config_path)?;
            if let Some(base) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                settings.resolve_paths(base);
            }
            settings.apply_env(|name| std::env::var(name).ok());
            settings
        }
        Err(e) => return Err(e.into()),
    };

    println!("Config file: {}", config_path.display());
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&settings.redacted()).context("Failed to render settings")?
    );
    Ok(())
}
