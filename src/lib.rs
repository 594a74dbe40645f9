//! cache-warmer - keeps the Lidarr metadata API cache warm
//!
//! Probes every artist, artist name and release group of a Lidarr library
//! against the metadata API so its CDN cache stays populated.
//!
//! # Architecture
//!
//! Each run works from a durable ledger:
//! - One record per entity tracks status, attempts and last check time
//! - Work selection picks pending, failed and stale entities per phase
//! - A rate-limited worker pool probes them behind a circuit breaker
//! - Results are flushed to CSV or SQLite in consistent batches
//!
//! # Modules
//!
//! - `adapters`: Lidarr client and HTTP prober
//! - `core`: Rate limiter, breaker, ledger, selection, pool, engine
//! - `domain`: Records, probe targets and outcomes
//! - `storage`: CSV and SQLite ledger backends
//! - `ingest`: Manual entries file
//! - `report`: Ledger statistics
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Write a config, then edit lidarr.api_key
//! cache-warmer init-config
//!
//! # One pass
//! cache-warmer run
//!
//! # Repeating passes
//! cache-warmer schedule
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod report;
pub mod storage;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{Engine, RunOptions, RunSummary};
pub use storage::{Storage, StorageType};
