//! Core cache-warming logic.
//!
//! This module contains:
//! - RateLimiter: Aggregate and per-worker request pacing
//! - CircuitBreaker: Upstream-health gate with exponential cooldown
//! - Staleness: TTL checks for successful probes
//! - Ledger: In-memory record state and flushing
//! - Selection: Per-phase work selection
//! - WorkerPool: Concurrent probe execution
//! - Engine: Run orchestration
//! - Schedule: Repeating runs

pub mod circuit_breaker;
pub mod engine;
pub mod ledger;
pub mod rate_limiter;
pub mod schedule;
pub mod selection;
pub mod staleness;
pub mod worker_pool;

// Re-export commonly used types
pub use circuit_breaker::{Admission, BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use engine::{Engine, ForceFlags, PlannedWork, RunOptions, RunSummary};
pub use ledger::{Applied, Ledger, MergeStats, ResetReport, ResetScope};
pub use rate_limiter::{RateLimiter, WorkerPacer};
pub use schedule::{run_schedule, ScheduleReport};
pub use selection::{
    select_artists, select_release_groups, select_text_searches, text_search_query, SelectionPolicy,
    TextSearchOptions,
};
pub use staleness::{hours_until_stale, hours_until_stale_at, is_stale, is_stale_at, parse_timestamp, StalenessScheduler};
pub use worker_pool::{PhaseSummary, PoolSettings, ProbeWorkerPool, RefreshHook};
