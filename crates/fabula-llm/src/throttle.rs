//! Process-wide traffic shaping for abuse-sensitive gateways.
//!
//! One proxy gateway in the wild rate-profiles its clients and starts
//! serving "no distributor" failures when requests arrive in bursts or
//! probe multiple paths. The [`RateLimiter`] spaces this process's own
//! outbound requests with a jittered minimum interval and caps how many
//! are in flight at once. Best-effort shaping only: it protects our
//! outbound pattern, it promises nothing about global fairness.

use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

const DEFAULT_MIN_SPACING_MS: u64 = 220;
const DEFAULT_MAX_SPACING_MS: u64 = 350;
const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Shared rate limiter: a "next allowed request time" timestamp guarded
/// by one mutex, plus a bounded concurrency semaphore. Construct once and
/// share for the process lifetime.
pub struct RateLimiter {
    next_allowed: Mutex<Instant>,
    slots: Semaphore,
    min_spacing: Duration,
    max_spacing: Duration,
}

/// Held for the duration of one HTTP call; releases the concurrency slot
/// on drop.
pub struct ThrottlePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_IN_FLIGHT,
            Duration::from_millis(DEFAULT_MIN_SPACING_MS),
            Duration::from_millis(DEFAULT_MAX_SPACING_MS),
        )
    }

    pub fn with_limits(max_in_flight: usize, min_spacing: Duration, max_spacing: Duration) -> Self {
        Self {
            next_allowed: Mutex::new(Instant::now()),
            slots: Semaphore::new(max_in_flight),
            min_spacing,
            max_spacing,
        }
    }

    /// Wait for this request's turn, then take a concurrency slot.
    ///
    /// The spacing interval is re-jittered per request so the outbound
    /// pattern does not look mechanical. The timestamp advance happens as
    /// one read-modify-write under the mutex; the sleep happens outside
    /// it so other tasks can enqueue their own windows meanwhile.
    pub async fn acquire(&self) -> ThrottlePermit<'_> {
        let interval = self.jittered_interval();
        let wait = {
            let mut next = self.next_allowed.lock().await;
            let now = Instant::now();
            let start = if *next > now { *next } else { now };
            *next = start + interval;
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            log::debug!("throttle: waiting {:?} before next gateway request", wait);
            tokio::time::sleep(wait).await;
        }

        // The semaphore lives as long as self and is never closed.
        let permit = self
            .slots
            .acquire()
            .await
            .expect("throttle semaphore closed");
        ThrottlePermit { _permit: permit }
    }

    fn jittered_interval(&self) -> Duration {
        if self.max_spacing <= self.min_spacing {
            return self.min_spacing;
        }
        let span = (self.max_spacing - self.min_spacing).as_millis() as u64;
        let extra = rand::thread_rng().gen_range(0..=span);
        self.min_spacing + Duration::from_millis(extra)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
