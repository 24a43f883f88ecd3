//! Write-behind persistence coordinator (§4.D): accepts the minimal store
//! operations an accepted mutation produces, writes them through a single
//! transaction under the `database` operation class's resilience guard, and
//! falls back to the dead-letter queue once the guard's retries are
//! exhausted.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::commands::command::CorrelationId;
use crate::config::PersistenceConfig;
use crate::entities::entity::{Entity, Permission};
use crate::persistence::PersistenceError;
use crate::persistence::dead_letter::DeadLetterQueue;
use crate::persistence::port::PersistencePort;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::{GuardError, OperationClass, Resilience};
use crate::types::{EdgeKind, EntityId, Verb};

/// The minimal set of store operations one accepted mutation translates to,
/// captured by the dispatcher alongside its in-memory `apply` so the
/// coordinator never has to reconstruct a diff after the fact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PersistenceOp {
    SaveEntity(Entity),
    SaveEdge {
        parent: EntityId,
        child: EntityId,
        kind: EdgeKind,
    },
    DeleteEdge {
        parent: EntityId,
        child: EntityId,
    },
    SavePermission {
        entity: EntityId,
        permission: Permission,
    },
    DeletePermission {
        entity: EntityId,
        uri: String,
        verb: Verb,
        scheme: String,
    },
    DeleteEntity(EntityId),
}

/// Apply `ops` within one transaction, rolling back and surfacing the first
/// failure rather than partially committing (§4.D "per-accepted-mutation
/// transaction with minimal operation set").
async fn apply_ops(port: &dyn PersistencePort, ops: &[PersistenceOp]) -> Result<(), PersistenceError> {
    let mut tx = port.begin_transaction().await?;
    for op in ops {
        let result = match op {
            PersistenceOp::SaveEntity(entity) => tx.save_entity(entity).await,
            PersistenceOp::SaveEdge { parent, child, kind } => tx.save_edge(*parent, *child, *kind).await,
            PersistenceOp::DeleteEdge { parent, child } => tx.delete_edge(*parent, *child).await,
            PersistenceOp::SavePermission { entity, permission } => tx.save_permission(*entity, permission).await,
            PersistenceOp::DeletePermission {
                entity,
                uri,
                verb,
                scheme,
            } => tx.delete_permission(*entity, uri, *verb, scheme).await,
            PersistenceOp::DeleteEntity(id) => tx.delete_entity(*id).await,
        };
        if let Err(err) = result {
            let _ = tx.rollback().await;
            return Err(err);
        }
    }
    tx.commit().await
}

struct WriteJob {
    correlation_id: CorrelationId,
    command_type: &'static str,
    ops: Vec<PersistenceOp>,
}

/// Owns the persistence port, the `database`-class resilience guard, and the
/// dead-letter queue. A single background task drains submitted writes in
/// order, which is what makes persistence causally consistent per entity id
/// (§5): every mutation is already totally ordered by the dispatcher, and
/// this worker preserves that order rather than fanning writes out
/// concurrently.
pub struct PersistenceCoordinator {
    sender: flume::Sender<WriteJob>,
    dead_letter: Arc<DeadLetterQueue>,
}

impl PersistenceCoordinator {
    /// Spawn the write-behind worker and the dead-letter retry worker
    /// (polling every 30s) bound to `port`.
    #[must_use]
    pub fn spawn(port: Arc<dyn PersistencePort>, resilience: Arc<Resilience>, config: &PersistenceConfig) -> Arc<Self> {
        let (sender, receiver) = flume::unbounded::<WriteJob>();
        let dead_letter = DeadLetterQueue::new(config.dead_letter.clone());

        let worker_port = port.clone();
        let worker_dead_letter = dead_letter.clone();
        tokio::spawn(async move {
            while let Ok(job) = receiver.recv_async().await {
                let port_ref: &dyn PersistencePort = &*worker_port;
                let result: Result<(), GuardError<PersistenceError>> = resilience
                    .guard(OperationClass::Database, || apply_ops(port_ref, &job.ops), None)
                    .await;
                if let Err(err) = result {
                    warn!(
                        correlation_id = %job.correlation_id,
                        command_type = job.command_type,
                        error = %err,
                        "persistence write failed after retries; enqueueing to dead-letter queue"
                    );
                    worker_dead_letter.enqueue(job.correlation_id, job.command_type, job.ops, err.to_string());
                }
            }
        });

        let retry_port = port.clone();
        dead_letter.clone().spawn_worker(RetryPolicy::default(), Duration::from_secs(30), move |ops| {
            let port = retry_port.clone();
            async move { apply_ops(&*port, &ops).await.map_err(|e| e.to_string()) }
        });

        Arc::new(Self { sender, dead_letter })
    }

    /// Enqueue `ops` for write-behind persistence. Cheap: only sends to an
    /// in-process channel, the store write happens on the background
    /// worker task. A no-op for reads, whose callers never build `ops`.
    #[instrument(skip(self, ops), fields(correlation_id = %correlation_id, command_type))]
    pub async fn enqueue(&self, correlation_id: CorrelationId, command_type: &'static str, ops: Vec<PersistenceOp>) {
        if ops.is_empty() {
            return;
        }
        if self
            .sender
            .send_async(WriteJob {
                correlation_id,
                command_type,
                ops,
            })
            .await
            .is_err()
        {
            warn!(correlation_id = %correlation_id, "persistence coordinator worker has shut down; dropping write");
        }
    }

    /// Number of writes currently parked in the dead-letter queue awaiting
    /// retry — exposed for health/diagnostics surfaces.
    #[must_use]
    pub fn dead_letter_len(&self) -> usize {
        self.dead_letter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::persistence::sqlite::InMemoryPersistencePort;
    use crate::resilience::Resilience;

    #[tokio::test]
    async fn enqueue_writes_through_to_the_port() {
        let port: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistencePort::new());
        let resilience = Arc::new(Resilience::new(&crate::config::ResilienceConfig::default()));
        let coordinator = PersistenceCoordinator::spawn(port.clone(), resilience, &PersistenceConfig::default());

        let entity = Entity::Group(crate::entities::entity::Group {
            core: crate::entities::entity::EntityCore::new(EntityId::new(1)),
            name: "eng".into(),
            description: None,
        });
        coordinator
            .enqueue(CorrelationId::new(), "create_group", vec![PersistenceOp::SaveEntity(entity)])
            .await;

        // give the background worker a moment to drain the channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = port.load_snapshot().await.unwrap();
        assert_eq!(snapshot.entities.len(), 1);
    }

    #[tokio::test]
    async fn empty_ops_is_a_no_op() {
        let port: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistencePort::new());
        let resilience = Arc::new(Resilience::new(&crate::config::ResilienceConfig::default()));
        let coordinator = PersistenceCoordinator::spawn(port.clone(), resilience, &PersistenceConfig::default());
        coordinator.enqueue(CorrelationId::new(), "check_permission", Vec::new()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(port.load_snapshot().await.unwrap().entities.is_empty());
    }
}
