//! Per-operation-class circuit breaker (§4.E): `Closed -> Open` after
//! `failureThreshold` consecutive failures, `Open -> HalfOpen` after
//! `recoveryWindow` elapses, `HalfOpen -> Closed` on the next success or
//! back to `Open` on the next failure.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The three breaker states named in §4.E.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A single operation class's breaker. Interior state is a `parking_lot`
/// mutex guarding a small struct — one critical section, no nested locks,
/// matching §5's single-lock-at-a-time discipline.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_window: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_window: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_window,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed right now. `Open` transitions to
    /// `HalfOpen` (allowing exactly the next call through as a probe) once
    /// `recovery_window` has elapsed since the breaker opened.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_window {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a success. In `HalfOpen`, the probe succeeded: close the
    /// breaker and reset the failure count. In `Closed`, simply resets the
    /// consecutive-failure counter.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.state = State::Closed;
        inner.opened_at = None;
    }

    /// Record a failure. In `Closed`, increments the consecutive-failure
    /// count and opens once `failure_threshold` is reached. In `HalfOpen`,
    /// the probe failed: re-open immediately.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Open => {}
        }
    }

    #[must_use]
    pub fn current_state(&self) -> State {
        self.inner.lock().state
    }
}
