//! Per-collector request budget.
//!
//! A fixed 60-second window counts outbound attempts; `try_acquire` checks and
//! records under one lock so concurrent callers can never jointly exceed the
//! cap. Sources with a per-second ceiling add a governor GCRA gate that is
//! consulted inside the same critical section and runs on the limiter's clock.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use time::OffsetDateTime;

use crate::clock::{Clock, SystemClock};

pub const WINDOW: Duration = Duration::from_secs(60);

/// Elapsed time on a [`Clock`] since the limiter was built.
#[derive(Clone)]
struct GateClock {
    clock: Arc<dyn Clock>,
    origin: OffsetDateTime,
}

impl GovernorClock for GateClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::try_from(self.clock.now() - self.origin).unwrap_or(Duration::ZERO)
    }
}

type BurstGate = governor::RateLimiter<NotKeyed, InMemoryState, GateClock, NoOpMiddleware<Duration>>;

/// Read-only snapshot of a limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit_per_minute: u32,
    pub requests_made_in_window: u32,
    pub window_started_at: OffsetDateTime,
    pub can_proceed: bool,
    /// Present only when `can_proceed` is false.
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    started_at: OffsetDateTime,
    /// Set when the burst gate last refused; cleared once passed.
    burst_clear_at: Option<OffsetDateTime>,
}

impl WindowState {
    fn roll(&mut self, now: OffsetDateTime) {
        if now - self.started_at >= WINDOW {
            self.count = 0;
            self.started_at = now;
        }
    }

    fn remaining(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.started_at + WINDOW - now).unwrap_or(Duration::ZERO)
    }

    fn burst_wait(&mut self, now: OffsetDateTime) -> Option<Duration> {
        let clear_at = self.burst_clear_at?;
        if now >= clear_at {
            self.burst_clear_at = None;
            return None;
        }
        Duration::try_from(clear_at - now).ok()
    }
}

pub struct RateLimiter {
    limit_per_minute: u32,
    state: Mutex<WindowState>,
    burst: Option<(BurstGate, GateClock)>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self::with_clock(limit_per_minute, None, Arc::new(SystemClock))
    }

    pub fn with_clock(
        limit_per_minute: u32,
        burst_per_second: Option<u32>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        let burst = burst_per_second.and_then(NonZeroU32::new).map(|per_second| {
            let gate_clock = GateClock {
                clock: clock.clone(),
                origin: started_at,
            };
            let gate = governor::RateLimiter::direct_with_clock(Quota::per_second(per_second), &gate_clock);
            (gate, gate_clock)
        });
        Self {
            limit_per_minute: limit_per_minute.max(1),
            state: Mutex::new(WindowState {
                count: 0,
                started_at,
                burst_clear_at: None,
            }),
            burst,
            clock,
        }
    }

    pub const fn limit_per_minute(&self) -> u32 {
        self.limit_per_minute
    }

    /// True when the current window still has budget and no burst refusal is
    /// pending. An expired window counts as fresh.
    pub fn can_proceed(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);
        state.count < self.limit_per_minute && state.burst_wait(now).is_none()
    }

    /// Counts one outbound attempt against the current window.
    pub fn record_request(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);
        state.count = state.count.saturating_add(1);
    }

    /// Atomic check-and-record. On refusal the returned status carries
    /// `retry_after`.
    pub fn try_acquire(&self) -> Result<(), RateLimitStatus> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);

        if state.count >= self.limit_per_minute {
            let retry_after = state.remaining(now);
            return Err(self.snapshot(&state, false, Some(retry_after)));
        }

        if let Some((gate, gate_clock)) = &self.burst {
            if let Err(not_until) = gate.check() {
                let wait = not_until.wait_time_from(gate_clock.now());
                state.burst_clear_at = Some(now + wait);
                return Err(self.snapshot(&state, false, Some(wait)));
            }
        }

        state.burst_clear_at = None;
        state.count += 1;
        Ok(())
    }

    /// Snapshot of the minute window. A burst refusal that has not yet
    /// cleared also reports `can_proceed = false` with its remaining wait.
    pub fn status(&self) -> RateLimitStatus {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll(now);
        let retry_after = if state.count >= self.limit_per_minute {
            Some(state.remaining(now))
        } else {
            state.burst_wait(now)
        };
        self.snapshot(&state, retry_after.is_none(), retry_after)
    }

    /// Starts a fresh window at the current time.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.count = 0;
        state.started_at = now;
        state.burst_clear_at = None;
    }

    fn snapshot(
        &self,
        state: &WindowState,
        can_proceed: bool,
        retry_after: Option<Duration>,
    ) -> RateLimitStatus {
        RateLimitStatus {
            limit_per_minute: self.limit_per_minute,
            requests_made_in_window: state.count,
            window_started_at: state.started_at,
            can_proceed,
            retry_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit_per_minute", &self.limit_per_minute)
            .field("state", &*self.lock())
            .field("burst", &self.burst.is_some())
            .finish()
    }
}
