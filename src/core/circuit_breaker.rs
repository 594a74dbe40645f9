//! Circuit breaker over upstream health.
//!
//! States:
//! - Closed: probes flow, consecutive failures are counted
//! - Open: probes short-circuit without network I/O until the cooldown ends
//! - HalfOpen: exactly one trial probe decides whether to close or reopen
//!
//! The cooldown after the n-th opening is
//! `min(base_delay * backoff_factor^n, max_backoff)`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Breaker tuning
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub threshold: u32,

    /// Cooldown before the first trial
    pub base_delay: Duration,

    /// Cooldown multiplier per opening (>= 1.0)
    pub backoff_factor: f64,

    /// Upper bound on any cooldown
    pub max_backoff: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(15),
        }
    }
}

impl BreakerConfig {
    /// Cooldown applied after the breaker has opened `opens` times
    pub fn cooldown(&self, opens: u32) -> Duration {
        let exponent = i32::try_from(opens).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        // NaN and infinity both collapse to the cap
        let capped = scaled.min(self.max_backoff.as_secs_f64());
        if capped >= 0.0 {
            Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
        } else {
            self.max_backoff
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Decision for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, proceed normally
    Allowed,

    /// The single half-open trial; its outcome decides the next state
    Trial,

    /// Short-circuited, no network call may be made
    Rejected { retry_in: Duration },
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. })
    }
}

/// Point-in-time view for logging and run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opens: u32,
    /// Calls short-circuited so far
    pub trips: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opens: u32,
    open_until: Option<Instant>,
    trial_in_flight: bool,
    trips: u64,
}

/// Process-wide circuit breaker shared by all workers
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opens: 0,
                open_until: None,
                trial_in_flight: false,
                trips: 0,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask whether a probe may be issued now
    pub fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let until = inner.open_until.unwrap_or(now);
                if now >= until {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(opens = inner.opens, "Circuit breaker half-open, admitting trial probe");
                    Admission::Trial
                } else {
                    inner.trips += 1;
                    Admission::Rejected {
                        retry_in: until.saturating_duration_since(now),
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.trips += 1;
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Feed the outcome of a probe admitted by [`try_acquire`](Self::try_acquire)
    pub fn record(&self, admission: Admission, success: bool) {
        self.record_at(admission, success, Instant::now())
    }

    pub(crate) fn record_at(&self, admission: Admission, success: bool, now: Instant) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Rejected { .. }, _) => {}
            (Admission::Trial, BreakerState::HalfOpen) => {
                inner.trial_in_flight = false;
                if success {
                    info!(opens = inner.opens, "Circuit breaker closed after successful trial");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opens = 0;
                    inner.open_until = None;
                } else {
                    self.open(&mut inner, now);
                }
            }
            (Admission::Allowed, BreakerState::Closed) => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.threshold {
                        self.open(&mut inner, now);
                    }
                }
            }
            // Probes admitted before a state change report late; they carry
            // no information about the current state.
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.opens = inner.opens.saturating_add(1);
        let cooldown = self.config.cooldown(inner.opens);
        inner.state = BreakerState::Open;
        // An unrepresentable deadline reopens for a trial immediately
        inner.open_until = Some(now.checked_add(cooldown).unwrap_or(now));
        inner.trial_in_flight = false;
        inner.consecutive_failures = 0;
        warn!(
            opens = inner.opens,
            cooldown_secs = cooldown.as_secs_f64(),
            "Circuit breaker opened"
        );
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opens: inner.opens,
            trips: inner.trips,
        }
    }
}
