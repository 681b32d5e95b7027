//! Minimum-interval throttle for one rate-limited lane.
//!
//! A lane is a single external service with a per-minute quota. Calls are
//! strictly serialized: each gate waits until `min_interval` has passed since
//! the previous gate returned. No bursting, no token bucket.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source used by the rate limiter and retry backoff.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Shared handle so the limiter and retry loop observe the same time.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests: `sleep` advances virtual time instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move virtual time forward without recording a sleep (simulates work).
    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    /// Virtual time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned lock only means a test thread panicked; the state is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Cooperative throttle owned by one batch run.
pub struct RateLimiter {
    min_interval: Duration,
    last_call_at: Option<Instant>,
    clock: SharedClock,
    total_waited: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("last_call_at", &self.last_call_at)
            .field("total_waited", &self.total_waited)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter for a target calls-per-minute rate on the wall clock.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::with_clock(
            interval_for(requests_per_minute),
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(min_interval: Duration, clock: SharedClock) -> Self {
        Self {
            min_interval,
            last_call_at: None,
            clock,
            total_waited: Duration::ZERO,
        }
    }

    /// Block until the next outbound call may start.
    ///
    /// The first call of a run never blocks.
    pub fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_call_at {
            let since = self.clock.now().saturating_duration_since(last);
            if since < self.min_interval {
                let wait = self.min_interval - since;
                log::trace!("rate limit: waiting {wait:?}");
                self.clock.sleep(wait);
                self.total_waited += wait;
            }
        }
        self.last_call_at = Some(self.clock.now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time source shared with retry backoff
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Total time spent blocked in [`wait_if_needed`](Self::wait_if_needed)
    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }
}

/// Spacing between calls for a per-minute quota (zero means unthrottled).
pub fn interval_for(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(60) / requests_per_minute
    }
}
