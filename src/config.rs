//! Configuration for the cache warmer.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LIDARR_API_KEY, FORCE_ARTISTS, FORCE_RG, FORCE_TEXT_SEARCH,
//!    ARTIST_TEXTSEARCH_TRANSLITERATE_UNICODE, ARTIST_TEXTSEARCH_REMOVE_SYMBOLS)
//! 2. Config file (YAML, one section per concern)
//! 3. Built-in defaults
//!
//! Relative paths in the config file are resolved against the config
//! file's parent directory. A missing config file is created from the
//! defaults so the user has something to edit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{BreakerConfig, TextSearchOptions};
use crate::storage::StorageType;

/// Placeholder shipped in the default config
pub const API_KEY_PLACEHOLDER: &str = "REPLACE_WITH_YOUR_LIDARR_API_KEY";

/// Slowest accepted aggregate probe rate
pub const MIN_RATE_PER_SECOND: f64 = 0.001;

/// Longest accepted delay, cooldown or backoff (one day)
pub const MAX_DELAY_SECONDS: f64 = 86_400.0;

/// Convert fractional seconds to a `Duration` without panicking.
/// Negative and NaN map to zero; anything above `MAX_DELAY_SECONDS` is capped.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if !(seconds > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds.min(MAX_DELAY_SECONDS)).unwrap_or(Duration::ZERO)
}

fn within_delay_bounds(seconds: f64) -> bool {
    seconds.is_finite() && (0.0..=MAX_DELAY_SECONDS).contains(&seconds)
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render default config: {0}")]
    Render(#[source] serde_yaml::Error),

    #[error("No config found; wrote defaults to {}. Edit it (set lidarr.api_key) and run again.", .path.display())]
    Created { path: PathBuf },

    #[error("Config file already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

/// Library-manager connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarrSettings {
    #[serde(default = "default_lidarr_url")]
    pub base_url: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Reject invalid TLS certificates (default: true)
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Request timeout for library fetches (default: 30)
    #[serde(default = "default_lidarr_timeout")]
    pub timeout_seconds: u64,
}

fn default_lidarr_url() -> String {
    "http://localhost:8686".to_string()
}
fn default_api_key() -> String {
    API_KEY_PLACEHOLDER.to_string()
}
fn default_true() -> bool {
    true
}
fn default_lidarr_timeout() -> u64 {
    30
}

impl Default for LidarrSettings {
    fn default() -> Self {
        Self {
            base_url: default_lidarr_url(),
            api_key: default_api_key(),
            verify_ssl: true,
            timeout_seconds: default_lidarr_timeout(),
        }
    }
}

/// Probe pacing, caps and breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_target_url")]
    pub target_base_url: String,

    /// Per-probe timeout (default: 10)
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,

    /// Minimum spacing between two calls of one worker (default: 0.25)
    #[serde(default = "default_delay")]
    pub delay_between_attempts: f64,

    /// Worker count (default: 10)
    #[serde(default = "default_concurrency")]
    pub max_concurrent_requests: usize,

    /// Aggregate ceiling across workers (default: 5)
    #[serde(default = "default_rate")]
    pub rate_limit_per_second: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_artist: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_artist_textsearch: u32,

    #[serde(default = "default_max_attempts_rg")]
    pub max_attempts_per_rg: u32,

    /// Consecutive failures that open the breaker (default: 50)
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(default = "default_breaker_base_delay")]
    pub circuit_breaker_base_delay_seconds: f64,

    /// Cooldown multiplier per opening (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Cooldown cap (default: 15)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: f64,
}

fn default_target_url() -> String {
    "https://api.lidarr.audio/api/v0.4".to_string()
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_delay() -> f64 {
    0.25
}
fn default_concurrency() -> usize {
    10
}
fn default_rate() -> f64 {
    5.0
}
fn default_max_attempts() -> u32 {
    25
}
fn default_max_attempts_rg() -> u32 {
    15
}
fn default_breaker_threshold() -> u32 {
    50
}
fn default_breaker_base_delay() -> f64 {
    1.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_backoff() -> f64 {
    15.0
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            target_base_url: default_target_url(),
            timeout_seconds: default_probe_timeout(),
            delay_between_attempts: default_delay(),
            max_concurrent_requests: default_concurrency(),
            rate_limit_per_second: default_rate(),
            max_attempts_per_artist: default_max_attempts(),
            max_attempts_per_artist_textsearch: default_max_attempts(),
            max_attempts_per_rg: default_max_attempts_rg(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_base_delay_seconds: default_breaker_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_backoff_seconds: default_max_backoff(),
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Where the ledger lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_storage_type")]
    pub storage_type: StorageType,

    #[serde(default = "default_artists_csv")]
    pub artists_csv_path: PathBuf,

    #[serde(default = "default_release_groups_csv")]
    pub release_groups_csv_path: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_storage_type() -> StorageType {
    StorageType::Csv
}
fn default_artists_csv() -> PathBuf {
    PathBuf::from("mbid-artists.csv")
}
fn default_release_groups_csv() -> PathBuf {
    PathBuf::from("mbid-releasegroups.csv")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("mbid_cache.db")
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            artists_csv_path: default_artists_csv(),
            release_groups_csv_path: default_release_groups_csv(),
            db_path: default_db_path(),
        }
    }
}

/// Phase switches and batching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub process_release_groups: bool,

    #[serde(default = "default_true")]
    pub process_artist_textsearch: bool,

    #[serde(default)]
    pub force_artists: bool,

    #[serde(default)]
    pub force_text_search: bool,

    #[serde(default)]
    pub force_rg: bool,

    /// Items per logical batch (default: 25)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Completed items between flushes (default: 5)
    #[serde(default = "default_batch_write_frequency")]
    pub batch_write_frequency: usize,

    /// Re-probe successes older than this; 0 disables (default: 0)
    #[serde(default)]
    pub cache_recheck_hours: f64,

    #[serde(default)]
    pub process_manual_entries: bool,

    #[serde(default = "default_manual_entries_file")]
    pub manual_entries_file: PathBuf,

    /// Lowercase names before text search
    #[serde(default)]
    pub artist_textsearch_lowercase: bool,

    /// Transliterate names to ASCII before text search
    #[serde(default)]
    pub artist_textsearch_transliterate_unicode: bool,

    /// Deprecated: strip diacritics and every non-alphanumeric character.
    /// Ignored when transliteration is on.
    #[serde(default)]
    pub artist_textsearch_remove_symbols: bool,

    /// Directory for per-run JSON summaries (disabled when unset)
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
}

fn default_batch_size() -> usize {
    25
}
fn default_batch_write_frequency() -> usize {
    5
}
fn default_manual_entries_file() -> PathBuf {
    PathBuf::from("manual_entries.yml")
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            process_release_groups: false,
            process_artist_textsearch: true,
            force_artists: false,
            force_text_search: false,
            force_rg: false,
            batch_size: default_batch_size(),
            batch_write_frequency: default_batch_write_frequency(),
            cache_recheck_hours: 0.0,
            process_manual_entries: false,
            manual_entries_file: default_manual_entries_file(),
            artist_textsearch_lowercase: false,
            artist_textsearch_transliterate_unicode: false,
            artist_textsearch_remove_symbols: false,
            results_dir: None,
        }
    }
}

impl RunSettings {
    /// Name normalization for the text-search phase
    pub fn text_search_options(&self) -> TextSearchOptions {
        TextSearchOptions {
            lowercase: self.artist_textsearch_lowercase,
            transliterate_unicode: self.artist_textsearch_transliterate_unicode,
            remove_symbols: self.artist_textsearch_remove_symbols,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsSettings {
    /// Ask the library manager to refresh artists that just became warm
    #[serde(default)]
    pub update_lidarr: bool,
}

/// Loop settings for the `schedule` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_true")]
    pub run_at_start: bool,

    /// Stop after this many runs; 0 runs forever (default: 25)
    #[serde(default = "default_max_runs")]
    pub max_runs: u32,
}

fn default_interval() -> u64 {
    3600
}
fn default_max_runs() -> u32 {
    25
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            run_at_start: true,
            max_runs: default_max_runs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_progress_every")]
    pub log_progress_every_n: usize,
}

fn default_progress_every() -> usize {
    25
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            log_progress_every_n: default_progress_every(),
        }
    }
}

// ============================================================================
// Whole configuration
// ============================================================================

/// Full configuration (matches the YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub lidarr: LidarrSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub actions: ActionsSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

/// Truthy environment value (1/true/yes/on)
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Settings {
    /// Parse settings from YAML text (no path resolution or env overrides)
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Make relative paths absolute against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        self.ledger.artists_csv_path = resolve_path(base, &self.ledger.artists_csv_path);
        self.ledger.release_groups_csv_path = resolve_path(base, &self.ledger.release_groups_csv_path);
        self.ledger.db_path = resolve_path(base, &self.ledger.db_path);
        self.run.manual_entries_file = resolve_path(base, &self.run.manual_entries_file);
        if let Some(dir) = self.run.results_dir.take() {
            self.run.results_dir = Some(resolve_path(base, &dir));
        }
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("LIDARR_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.lidarr.api_key = key;
        }
        if lookup("FORCE_ARTISTS").is_some_and(|v| is_truthy(&v)) {
            self.run.force_artists = true;
        }
        if lookup("FORCE_RG").is_some_and(|v| is_truthy(&v)) {
            self.run.force_rg = true;
        }
        if lookup("FORCE_TEXT_SEARCH").is_some_and(|v| is_truthy(&v)) {
            self.run.force_text_search = true;
        }
        if let Some(value) = lookup("ARTIST_TEXTSEARCH_TRANSLITERATE_UNICODE") {
            self.run.artist_textsearch_transliterate_unicode = is_truthy(&value);
        }
        if let Some(value) = lookup("ARTIST_TEXTSEARCH_REMOVE_SYMBOLS") {
            self.run.artist_textsearch_remove_symbols = is_truthy(&value);
        }
    }

    /// Check every setting, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        let probe = &self.probe;

        let key = self.lidarr.api_key.trim();
        if key.is_empty() || key.contains("REPLACE_WITH_YOUR") {
            issues.push("lidarr.api_key is missing or still the placeholder".to_string());
        }
        if !is_http_url(&self.lidarr.base_url) {
            issues.push(format!("lidarr.base_url must start with http:// or https:// (got '{}')", self.lidarr.base_url));
        }
        if !is_http_url(&probe.target_base_url) {
            issues.push(format!(
                "probe.target_base_url must start with http:// or https:// (got '{}')",
                probe.target_base_url
            ));
        }
        if probe.timeout_seconds < 1 {
            issues.push("probe.timeout_seconds must be at least 1".to_string());
        }
        if !(probe.rate_limit_per_second.is_finite() && probe.rate_limit_per_second >= MIN_RATE_PER_SECOND) {
            issues.push(format!("probe.rate_limit_per_second must be at least {}", MIN_RATE_PER_SECOND));
        }
        if probe.max_concurrent_requests < 1 {
            issues.push("probe.max_concurrent_requests must be at least 1".to_string());
        }
        if !within_delay_bounds(probe.delay_between_attempts) {
            issues.push(format!("probe.delay_between_attempts must be between 0 and {}", MAX_DELAY_SECONDS));
        }
        if probe.circuit_breaker_threshold < 1 {
            issues.push("probe.circuit_breaker_threshold must be at least 1".to_string());
        }
        if !(probe.backoff_factor.is_finite() && probe.backoff_factor >= 1.0) {
            issues.push("probe.backoff_factor must be 1.0 or more".to_string());
        }
        if !within_delay_bounds(probe.circuit_breaker_base_delay_seconds) {
            issues.push(format!(
                "probe.circuit_breaker_base_delay_seconds must be between 0 and {}",
                MAX_DELAY_SECONDS
            ));
        }
        if !within_delay_bounds(probe.max_backoff_seconds) {
            issues.push(format!("probe.max_backoff_seconds must be between 0 and {}", MAX_DELAY_SECONDS));
        }
        if self.run.batch_size < 1 {
            issues.push("run.batch_size must be at least 1".to_string());
        }
        if self.run.batch_write_frequency < 1 {
            issues.push("run.batch_write_frequency must be at least 1".to_string());
        }
        if !self.run.cache_recheck_hours.is_finite() {
            issues.push("run.cache_recheck_hours must be a number".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    /// Breaker tuning derived from the probe section
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.probe.circuit_breaker_threshold,
            base_delay: seconds_to_duration(self.probe.circuit_breaker_base_delay_seconds),
            backoff_factor: self.probe.backoff_factor,
            max_backoff: seconds_to_duration(self.probe.max_backoff_seconds),
        }
    }

    /// Copy safe for display, with the API key masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let key = &self.lidarr.api_key;
        copy.lidarr.api_key = if key.chars().count() > 4 {
            let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{}", tail)
        } else {
            "****".to_string()
        };
        copy
    }
}

/// Default config location: $CACHE_WARMER_CONFIG is handled by the CLI,
/// otherwise `<config dir>/cache-warmer/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("cache-warmer").join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

/// Write the default config to `path`
pub fn write_default_config(path: &Path, overwrite: bool) -> Result<(), ConfigError> {
    if path.exists() && !overwrite {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }

    let rendered = serde_yaml::to_string(&Settings::default()).map_err(ConfigError::Render)?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(write_err)?;
    }
    std::fs::write(path, rendered).map_err(write_err)
}

/// Load and parse a config file
pub fn load_config_file(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Settings::from_yaml(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from all sources and validate it.
///
/// A missing file is created from defaults and reported as
/// [`ConfigError::Created`].
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        write_default_config(path, false)?;
        return Err(ConfigError::Created {
            path: path.to_path_buf(),
        });
    }

    let mut settings = load_config_file(path)?;
    let base = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    settings.resolve_paths(base);
    settings.apply_env(|name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}
