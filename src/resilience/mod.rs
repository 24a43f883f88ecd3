//! Component E: circuit breakers, bounded retries with jittered backoff,
//! per-class timeouts, and rolling health telemetry over every externally
//! facing operation (§4.E, §5).
//!
//! The three mechanisms compose through [`Resilience::guard`]: a call is
//! timed out, retried on a retryable failure, and fast-failed by the
//! class's breaker when it is `Open`. Every outcome — success, retryable
//! failure, timeout, breaker trip — feeds the class's [`health::HealthMetrics`].

pub mod circuit_breaker;
pub mod health;
pub mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::ResilienceConfig;
use crate::errors::ErrorKind;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::health::{HealthMetrics, HealthSnapshot, HealthStatus};
use crate::resilience::retry::RetryPolicy;

/// The operation classes named in §4.E/§5, each with its own breaker,
/// retry policy, timeout, and health metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    Database,
    External,
    Network,
    Rpc,
    Filesystem,
}

impl OperationClass {
    const ALL: [OperationClass; 5] = [
        OperationClass::Database,
        OperationClass::External,
        OperationClass::Network,
        OperationClass::Rpc,
        OperationClass::Filesystem,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Database => "database",
            OperationClass::External => "external",
            OperationClass::Network => "network",
            OperationClass::Rpc => "rpc",
            OperationClass::Filesystem => "filesystem",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A caller-supplied callable is retryable only if it says so; validation,
/// not-found, not-supported, and cycle errors are never retried (§4.E).
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResilienceError {
    #[error("circuit breaker open for operation class {class}")]
    #[diagnostic(
        code(warden::resilience::circuit_open),
        help("Wait for the recovery window to elapse, or supply a fallback.")
    )]
    CircuitOpen { class: OperationClass },

    #[error("operation timed out after {elapsed:?} (class {class})")]
    #[diagnostic(code(warden::resilience::timeout))]
    Timeout {
        class: OperationClass,
        elapsed: Duration,
    },
}

impl ResilienceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// The outcome of a [`Resilience::guard`] call: either the wrapped
/// operation's own error (exhausted retries, surfaced verbatim or via a
/// fallback) or a resilience-layer error (circuit open, timeout exhaustion
/// with no fallback).
#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
    #[error(transparent)]
    Operation(E),
}

struct ClassState {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: HealthMetrics,
}

/// Owns per-class circuit breakers, retry policies, timeouts, and rolling
/// health metrics. Shared across tasks behind an `Arc`; each piece of
/// per-class state guards itself with its own lock (§5: "none of them
/// acquire more than one lock at a time").
pub struct Resilience {
    classes: FxHashMap<OperationClass, ClassState>,
}

impl Resilience {
    #[must_use]
    pub fn new(config: &ResilienceConfig) -> Self {
        let mut classes = FxHashMap::default();
        for class in OperationClass::ALL {
            let class_config = match class {
                OperationClass::Database => &config.database,
                OperationClass::External => &config.external,
                OperationClass::Network => &config.network,
                OperationClass::Rpc => &config.rpc,
                OperationClass::Filesystem => &config.filesystem,
            };
            classes.insert(
                class,
                ClassState {
                    breaker: CircuitBreaker::new(
                        class_config.failure_threshold,
                        class_config.recovery_window,
                    ),
                    retry: RetryPolicy::default(),
                    timeout: class_config.timeout,
                    metrics: HealthMetrics::new(),
                },
            );
        }
        Self { classes }
    }

    fn state(&self, class: OperationClass) -> &ClassState {
        self.classes
            .get(&class)
            .expect("every OperationClass variant is seeded in Resilience::new")
    }

    /// Run `op` under `class`'s breaker, retry policy, and timeout.
    /// Retries happen on [`Retryable::is_retryable`] errors up to the
    /// class's `max_retries`, with jittered exponential backoff between
    /// attempts. If the breaker is `Open`, `fallback` is invoked if
    /// supplied, else [`ResilienceError::CircuitOpen`] is returned without
    /// calling `op` at all.
    #[instrument(skip(self, op, fallback), fields(class = %class))]
    pub async fn guard<T, E, F, Fut>(
        &self,
        class: OperationClass,
        mut op: F,
        fallback: Option<T>,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let state = self.state(class);

        if !state.breaker.allow_request() {
            state.metrics.record_short_circuit();
            return match fallback {
                Some(value) => Ok(value),
                None => Err(GuardError::Resilience(ResilienceError::CircuitOpen { class })),
            };
        }

        let mut attempt: u32 = 0;
        loop {
            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(state.timeout, op()).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(Ok(value)) => {
                    state.breaker.on_success();
                    state.metrics.record_success(elapsed);
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    state.breaker.on_failure();
                    state.metrics.record_failure(elapsed, err.to_string());
                    if attempt >= state.retry.max_retries || !err.is_retryable() {
                        return Err(GuardError::Operation(err));
                    }
                    let delay = state.retry.delay_for(attempt);
                    warn!(class = %class, attempt, ?delay, error = %err, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(_elapsed) => {
                    state.breaker.on_failure();
                    state.metrics.record_timeout(elapsed);
                    if attempt >= state.retry.max_retries {
                        return Err(GuardError::Resilience(ResilienceError::Timeout {
                            class,
                            elapsed,
                        }));
                    }
                    let delay = state.retry.delay_for(attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    #[must_use]
    pub fn breaker_state(&self, class: OperationClass) -> circuit_breaker::State {
        self.state(class).breaker.current_state()
    }

    #[must_use]
    pub fn health_snapshot(&self, class: OperationClass) -> HealthSnapshot {
        self.state(class).metrics.snapshot()
    }

    /// Overall health is the worst class status (§4.E).
    #[must_use]
    pub fn overall_health(&self) -> HealthStatus {
        OperationClass::ALL
            .iter()
            .map(|c| self.health_snapshot(*c).status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

/// Spawn a background task that samples overall health once a minute and
/// logs state changes (§4.E "a background task samples health each minute
/// and logs state changes").
pub fn spawn_health_sampler(resilience: Arc<Resilience>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = HealthStatus::Healthy;
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let current = resilience.overall_health();
            if current != last {
                warn!(from = ?last, to = ?current, "overall health status changed");
                last = current;
            }
        }
    })
}
