//! Dead-letter queue (§4.D): holds write-behind failures that exhausted the
//! database operation class's resilience guard, retries them with jittered
//! exponential backoff, and hands anything that exceeds `max_attempts` or
//! `expiry` to a [`PermanentFailureSink`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::commands::command::CorrelationId;
use crate::config::DeadLetterConfig;
use crate::persistence::coordinator::PersistenceOp;
use crate::resilience::retry::RetryPolicy;

/// A write-behind mutation that failed to persist, awaiting retry or
/// expiry. Replayable on restart: a future persistence backend for this
/// queue would load outstanding entries the same way
/// [`crate::entities::hydration`] loads the entity graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedCommand {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub command_type: String,
    pub ops: Vec<PersistenceOp>,
    pub first_failure_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub attempts: u32,
    pub error_chain: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Sink for entries that exhaust `max_attempts` or pass `expires_at` before
/// succeeding. The default implementation only logs; an operator who wants
/// paging or alerting supplies their own without the coordinator depending
/// on a specific transport (§4.D supplement).
pub trait PermanentFailureSink: Send + Sync {
    fn on_permanent_failure(&self, failed: &FailedCommand);
}

/// Default sink: logs at `error` and drops the entry.
pub struct LoggingPermanentFailureSink;

impl PermanentFailureSink for LoggingPermanentFailureSink {
    fn on_permanent_failure(&self, failed: &FailedCommand) {
        error!(
            id = %failed.id,
            correlation_id = %failed.correlation_id,
            command_type = %failed.command_type,
            attempts = failed.attempts,
            errors = ?failed.error_chain,
            "persistence write permanently failed; dropping dead-letter entry"
        );
    }
}

struct Inner {
    entries: Vec<FailedCommand>,
}

/// Holds write-behind failures awaiting retry. [`DeadLetterQueue::spawn_worker`]
/// periodically drains entries whose `next_retry_at` has elapsed and
/// replays them through a caller-supplied retry callback, so this module
/// never needs to know about [`crate::persistence::port::PersistencePort`]
/// directly — the coordinator, which owns the port, supplies the closure.
pub struct DeadLetterQueue {
    inner: Mutex<Inner>,
    config: DeadLetterConfig,
    sink: Arc<dyn PermanentFailureSink>,
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new(config: DeadLetterConfig) -> Arc<Self> {
        Self::with_sink(config, Arc::new(LoggingPermanentFailureSink))
    }

    #[must_use]
    pub fn with_sink(config: DeadLetterConfig, sink: Arc<dyn PermanentFailureSink>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { entries: Vec::new() }),
            config,
            sink,
        })
    }

    /// Enqueue a first-time write failure.
    #[instrument(skip(self, ops, error), fields(correlation_id = %correlation_id, command_type))]
    pub fn enqueue(&self, correlation_id: CorrelationId, command_type: &'static str, ops: Vec<PersistenceOp>, error: String) {
        let now = Utc::now();
        let entry = FailedCommand {
            id: Uuid::new_v4(),
            correlation_id,
            command_type: command_type.to_string(),
            ops,
            first_failure_at: now,
            last_attempt_at: now,
            next_retry_at: now + to_chrono(self.config.base_delay),
            attempts: 1,
            error_chain: vec![error],
            expires_at: now + to_chrono(self.config.expiry),
        };
        warn!(id = %entry.id, next_retry_at = %entry.next_retry_at, "enqueued failed persistence write for retry");
        self.inner.lock().entries.push(entry);
    }

    fn drain_due(&self) -> Vec<FailedCommand> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let (due, remaining): (Vec<_>, Vec<_>) = inner.entries.drain(..).partition(|e| e.next_retry_at <= now);
        inner.entries = remaining;
        due
    }

    fn record_retry_failure(&self, mut entry: FailedCommand, error: String, retry: &RetryPolicy) {
        let now = Utc::now();
        entry.attempts += 1;
        entry.last_attempt_at = now;
        entry.error_chain.push(error);

        if entry.attempts >= self.config.max_attempts || now >= entry.expires_at {
            self.sink.on_permanent_failure(&entry);
            return;
        }

        let delay = retry.delay_for(entry.attempts.saturating_sub(1));
        entry.next_retry_at = now + to_chrono(delay);
        self.inner.lock().entries.push(entry);
    }

    /// Number of entries currently awaiting retry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the background worker: every `poll_interval`, drains due
    /// entries and replays each through `retry_fn`. A successful replay
    /// drops the entry; a failure re-enqueues it with backoff, or hands it
    /// to the permanent-failure sink once `max_attempts`/`expiry` is hit.
    pub fn spawn_worker<F, Fut>(
        self: Arc<Self>,
        retry: RetryPolicy,
        poll_interval: Duration,
        retry_fn: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Vec<PersistenceOp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                for entry in self.drain_due() {
                    let id = entry.id;
                    let ops = entry.ops.clone();
                    match retry_fn(ops).await {
                        Ok(()) => info!(id = %id, "dead-letter entry replayed successfully"),
                        Err(error) => self.record_retry_failure(entry, error, &retry),
                    }
                }
            }
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
