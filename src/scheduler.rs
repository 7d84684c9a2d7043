//! Poll scheduler.
//!
//! Paces status requests to the device's reported sleep interval, never
//! faster than a fixed floor. The next request is measured from the time the
//! previous one was issued, not from when it completed, so response latency
//! does not stretch the cadence.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between two status requests.
pub const DEFAULT_POLL_FLOOR: Duration = Duration::from_millis(500);

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No request outstanding and no wait armed.
    Idle,
    /// Waiting to re-check at the given instant.
    Waiting { until: Instant },
    /// A request is in flight.
    Fetching,
}

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    FetchNow,
    WaitFor(Duration),
}

/// Cooperative scheduler for status polls.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    state: PollState,
    last_request: Option<Instant>,
    floor: Duration,
}

impl PollScheduler {
    /// Create a scheduler that polls no faster than `floor`.
    pub fn new(floor: Duration) -> Self {
        Self {
            state: PollState::Idle,
            last_request: None,
            floor,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    /// Effective interval for a device sleep time.
    pub fn interval(&self, sleep_time: Duration) -> Duration {
        sleep_time.max(self.floor)
    }

    /// Signed time until the next request is due, in milliseconds.
    ///
    /// Non-negative means a request is due now.
    pub fn elapsed_ms(&self, now: Instant, sleep_time: Duration) -> i128 {
        let Some(last) = self.last_request else {
            return 0;
        };
        let since = now.saturating_duration_since(last).as_millis() as i128;
        since - self.interval(sleep_time).as_millis() as i128
    }

    /// Decide whether to fetch now or wait, arming the wait if needed.
    ///
    /// The first decision always fetches. While a request is in flight
    /// the scheduler never asks for another one.
    pub fn decide(&mut self, now: Instant, sleep_time: Duration) -> PollDecision {
        let interval = self.interval(sleep_time);
        let wait = match (self.state, self.last_request) {
            (PollState::Fetching, _) => interval,
            (_, None) => Duration::ZERO,
            (_, Some(last)) => interval.saturating_sub(now.saturating_duration_since(last)),
        };

        if wait.is_zero() {
            return PollDecision::FetchNow;
        }
        if self.state != PollState::Fetching {
            self.state = PollState::Waiting { until: now + wait };
        }
        PollDecision::WaitFor(wait)
    }

    /// Record that a request is being issued at `now`.
    pub fn begin_fetch(&mut self, now: Instant) {
        self.last_request = Some(now);
        self.state = PollState::Fetching;
    }

    /// Record that the outstanding request resolved, successfully or not.
    pub fn finish_fetch(&mut self) {
        self.state = PollState::Idle;
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_FLOOR)
    }
}
