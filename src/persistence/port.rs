//! The persistence port (§6): the narrow interface the core depends on,
//! implemented by any concrete store. `PersistencePort::begin_transaction`
//! hands back a boxed [`Transaction`]; callers issue the minimal set of
//! operations for one accepted mutation, then `commit` or `rollback`.

use async_trait::async_trait;

use crate::entities::entity::{Entity, Permission};
use crate::entities::hydration::Snapshot;
use crate::persistence::PersistenceError;
use crate::types::{EdgeKind, EntityId, Verb};

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// A single store transaction. Every call is fallible; a failure leaves
/// the transaction's fate up to the caller, who should `rollback` (or drop
/// it, on implementations where that is equivalent) rather than `commit`.
#[async_trait]
pub trait Transaction: Send {
    async fn save_entity(&mut self, entity: &Entity) -> Result<()>;
    async fn save_edge(&mut self, parent: EntityId, child: EntityId, kind: EdgeKind) -> Result<()>;
    async fn save_permission(&mut self, entity: EntityId, permission: &Permission) -> Result<()>;
    async fn delete_entity(&mut self, id: EntityId) -> Result<()>;
    async fn delete_edge(&mut self, parent: EntityId, child: EntityId) -> Result<()>;
    async fn delete_permission(&mut self, entity: EntityId, uri: &str, verb: Verb, scheme: &str) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The store-agnostic port the coordinator depends on. Implementations:
/// [`crate::persistence::sqlite::SqlxPersistencePort`] (durable,
/// sqlite/postgres via `sqlx`) and
/// [`crate::persistence::sqlite::InMemoryPersistencePort`] (a test double,
/// not a production backend).
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Load every entity, edge, and permission, totally ordered by entity
    /// id (§6), for startup hydration.
    async fn load_snapshot(&self) -> Result<Snapshot>;
}
