//! Global request-rate gate shared by all probe workers.
//!
//! Two constraints are enforced together:
//! - An aggregate ceiling of `rate_limit_per_second` across every worker
//! - A minimum spacing of `delay_between_attempts` between two calls of
//!   the same worker
//!
//! Grants are handed out as evenly spaced time slots. A caller reserves the
//! next free slot under a short lock, then sleeps outside it, so `K` grants
//! always span at least `(K-1)/R` seconds.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::config::seconds_to_duration;

/// Shared aggregate rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Spacing between consecutive global slots
    interval: Duration,

    /// Earliest instant the next grant may use
    next_slot: Mutex<Option<Instant>>,
}

/// Per-worker spacing state. Owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct WorkerPacer {
    spacing: Duration,
    last_grant: Option<Instant>,
}

impl WorkerPacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_grant: None,
        }
    }

    /// Build from a fractional-seconds setting; negative values mean no spacing
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self::new(seconds_to_duration(seconds))
    }

    fn earliest(&self, now: Instant) -> Instant {
        match self.last_grant {
            Some(last) => now.max(last.checked_add(self.spacing).unwrap_or(last)),
            None => now,
        }
    }
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_second` calls per second.
    /// A non-positive or non-finite rate disables the aggregate ceiling;
    /// intervals longer than a day are capped.
    pub fn new(rate_per_second: f64) -> Self {
        let interval = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            seconds_to_duration(1.0 / rate_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Spacing between two global grants
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot satisfying both constraints
    fn reserve(&self, earliest: Instant) -> Instant {
        let mut next = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = match *next {
            Some(free) => earliest.max(free),
            None => earliest,
        };
        *next = Some(slot.checked_add(self.interval).unwrap_or(slot));
        slot
    }

    /// Wait until this worker may issue its next call.
    ///
    /// Returns the instant the call was granted for.
    pub async fn acquire(&self, pacer: &mut WorkerPacer) -> Instant {
        let slot = self.reserve(pacer.earliest(Instant::now()));
        pacer.last_grant = Some(slot);
        sleep_until(slot).await;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_single_worker_respects_global_rate() {
        let limiter = RateLimiter::new(20.0);
        let mut pacer = WorkerPacer::new(Duration::ZERO);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(&mut pacer).await;
        }
        // 5 grants at 20/s span at least 4 intervals
        assert!(start.elapsed() >= Duration::from_millis(195));
    }

    #[tokio::test]
    async fn test_worker_spacing_dominates_when_larger() {
        let limiter = RateLimiter::new(1000.0);
        let mut pacer = WorkerPacer::new(Duration::from_millis(50));

        let first = limiter.acquire(&mut pacer).await;
        let second = limiter.acquire(&mut pacer).await;
        assert!(second - first >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_concurrent_workers_never_exceed_window() {
        // 1/16 s is exact in binary, keeping slot arithmetic precise
        let rate = 16.0;
        let limiter = Arc::new(RateLimiter::new(rate));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut pacer = WorkerPacer::new(Duration::ZERO);
                let mut grants = Vec::new();
                for _ in 0..8 {
                    grants.push(limiter.acquire(&mut pacer).await);
                }
                grants
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.extend(handle.await.unwrap());
        }
        grants.sort();

        // Any rolling one-second window holds at most `rate` grants
        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|g| **g - *start < Duration::from_secs(1))
                .count();
            assert!(in_window <= rate as usize, "window had {} grants", in_window);
        }

        let span = *grants.last().unwrap() - grants[0];
        assert!(span >= limiter.interval() * (grants.len() as u32 - 1));
    }

    #[test]
    fn test_zero_rate_disables_ceiling() {
        let limiter = RateLimiter::new(0.0);
        assert_eq!(limiter.interval(), Duration::ZERO);
    }

    #[test]
    fn test_extreme_settings_do_not_panic() {
        let limiter = RateLimiter::new(1e-30);
        assert_eq!(limiter.interval(), Duration::from_secs(86_400));
        assert_eq!(RateLimiter::new(1e30).interval(), Duration::ZERO);

        let pacer = WorkerPacer::from_secs_f64(1e30);
        assert_eq!(pacer.spacing, Duration::from_secs(86_400));
        assert_eq!(WorkerPacer::from_secs_f64(f64::NAN).spacing, Duration::ZERO);
    }
}
