//! Rolling per-operation-class health metrics (§4.E): total/success/failed
//! operation counts, a bounded latency sample, a bounded recent-error list,
//! and a derived `Healthy/Warning/Critical` status from the rolling error
//! rate.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Cap on the rolling sample window so the metrics stay O(1)-ish in memory
/// regardless of process lifetime.
const WINDOW: usize = 200;
const RECENT_ERRORS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

struct Inner {
    total: u64,
    successful: u64,
    failed: u64,
    latencies: VecDeque<Duration>,
    recent_errors: VecDeque<String>,
    /// Rolling outcome window (`true` = success) used for the error-rate
    /// derivation, independent of the lifetime totals above.
    outcomes: VecDeque<bool>,
}

impl Inner {
    fn new() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            latencies: VecDeque::with_capacity(WINDOW),
            recent_errors: VecDeque::with_capacity(RECENT_ERRORS),
            outcomes: VecDeque::with_capacity(WINDOW),
        }
    }

    fn push_outcome(&mut self, success: bool) {
        self.outcomes.push_back(success);
        if self.outcomes.len() > WINDOW {
            self.outcomes.pop_front();
        }
    }

    fn push_latency(&mut self, latency: Duration) {
        self.latencies.push_back(latency);
        if self.latencies.len() > WINDOW {
            self.latencies.pop_front();
        }
    }

    fn push_error(&mut self, message: String) {
        self.recent_errors.push_back(message);
        if self.recent_errors.len() > RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
    }
}

/// A point-in-time view of a class's rolling health metrics, cheap to
/// clone/serialize for export by a transport layer.
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    #[serde(skip)]
    pub latencies: Vec<Duration>,
    pub recent_errors: Vec<String>,
    pub status: HealthStatus,
}

/// Rolling metrics for one operation class. Guarded by a single mutex —
/// every public method takes and releases the lock once, no nested
/// acquisition.
pub struct HealthMetrics {
    inner: Mutex<Inner>,
}

impl HealthMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.successful += 1;
        inner.push_outcome(true);
        inner.push_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration, error: String) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.failed += 1;
        inner.push_outcome(false);
        inner.push_latency(latency);
        inner.push_error(error);
    }

    pub fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency, "timeout".to_string());
    }

    /// A short-circuited call (breaker open) counts as neither a success
    /// nor a retryable failure sample, but is tallied in `total` so it is
    /// visible in the operation count.
    pub fn record_short_circuit(&self) {
        self.inner.lock().total += 1;
    }

    /// Derive status from the rolling error rate (§4.E):
    /// `Healthy` if error rate < 10% or fewer than 10 samples; `Warning`
    /// if 10% <= rate < 25%; `Critical` if rate >= 25%.
    fn status_from(outcomes: &VecDeque<bool>) -> HealthStatus {
        if outcomes.len() < 10 {
            return HealthStatus::Healthy;
        }
        let failures = outcomes.iter().filter(|&&ok| !ok).count();
        let rate = failures as f64 / outcomes.len() as f64;
        if rate >= 0.25 {
            HealthStatus::Critical
        } else if rate >= 0.10 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.lock();
        HealthSnapshot {
            total: inner.total,
            successful: inner.successful,
            failed: inner.failed,
            latencies: inner.latencies.iter().copied().collect(),
            recent_errors: inner.recent_errors.iter().cloned().collect(),
            status: Self::status_from(&inner.outcomes),
        }
    }
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self::new()
    }
}
