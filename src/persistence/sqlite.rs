//! `sqlx`-backed and in-memory implementations of [`crate::persistence::port::PersistencePort`].
//!
//! [`SqlxPersistencePort`] is the durable backend, storing the conforming
//! schema named in §6: `entity(id, kind, attrs_json)`, `edge(parent_id, child_id, kind)`,
//! `permission(id, entity_id, uri, verb, grant, deny, scheme, priority,
//! valid_from, valid_until, predicate_json)`. Schema is created with
//! idempotent `CREATE TABLE IF NOT EXISTS` statements on connect rather
//! than `sqlx::migrate!`, since this crate ships no `migrations/`
//! directory for that macro to embed.
//!
//! [`InMemoryPersistencePort`] is a test double — not a production
//! backend — playing the role the teacher lineage's `InMemoryCheckpointer`
//! plays for workflow state.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::entities::entity::{ContextPredicate, Entity, EntityCore, Group, Permission, PermissionKind, Role, User};
use crate::entities::hydration::Snapshot;
use crate::persistence::PersistenceError;
use crate::persistence::port::{PersistencePort, Result, Transaction};
use crate::types::{EdgeKind, EntityId, UriPattern, Verb};

fn backend_err(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

fn entity_attrs_json(entity: &Entity) -> serde_json::Value {
    match entity {
        Entity::User(u) => serde_json::json!({
            "name": u.name,
            "email": u.email,
            "password_hash": u.password_hash,
            "salt": u.salt,
            "failed_login_attempts": u.failed_login_attempts,
            "locked_until": u.locked_until,
            "last_login_at": u.last_login_at,
            "is_active": u.is_active,
        }),
        Entity::Group(g) => serde_json::json!({
            "name": g.name,
            "description": g.description,
        }),
        Entity::Role(r) => serde_json::json!({
            "name": r.name,
            "description": r.description,
        }),
    }
}

fn entity_from_row(id: EntityId, kind: &str, attrs: serde_json::Value) -> Result<Entity> {
    match kind {
        "user" => Ok(Entity::User(User {
            core: EntityCore::new(id),
            name: attrs.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            email: attrs.get("email").and_then(|v| v.as_str()).map(str::to_string),
            password_hash: attrs.get("password_hash").and_then(|v| v.as_str()).map(str::to_string),
            salt: attrs.get("salt").and_then(|v| v.as_str()).map(str::to_string),
            failed_login_attempts: attrs
                .get("failed_login_attempts")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as u32,
            locked_until: attrs
                .get("locked_until")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            last_login_at: attrs
                .get("last_login_at")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            is_active: attrs.get("is_active").and_then(serde_json::Value::as_bool).unwrap_or(true),
        })),
        "group" => Ok(Entity::Group(Group {
            core: EntityCore::new(id),
            name: attrs.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            description: attrs.get("description").and_then(|v| v.as_str()).map(str::to_string),
        })),
        "role" => Ok(Entity::Role(Role {
            core: EntityCore::new(id),
            name: attrs.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            description: attrs.get("description").and_then(|v| v.as_str()).map(str::to_string),
        })),
        other => Err(PersistenceError::Backend(format!("unknown entity kind: {other}"))),
    }
}

fn edge_kind_str(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::UserToGroup => "user_to_group",
        EdgeKind::UserToRole => "user_to_role",
        EdgeKind::GroupToGroup => "group_to_group",
        EdgeKind::RoleToGroup => "role_to_group",
    }
}

fn permission_from_row(row: &SqliteRow) -> Result<(EntityId, Permission)> {
    let id: i64 = row.try_get("id").map_err(backend_err)?;
    let entity_id: i64 = row.try_get("entity_id").map_err(backend_err)?;
    let uri: String = row.try_get("uri").map_err(backend_err)?;
    let verb: String = row.try_get("verb").map_err(backend_err)?;
    let grant: bool = row.try_get("grant").map_err(backend_err)?;
    let deny: bool = row.try_get("deny").map_err(backend_err)?;
    let scheme: String = row.try_get("scheme").map_err(backend_err)?;
    let priority: i64 = row.try_get("priority").map_err(backend_err)?;
    let valid_from: Option<String> = row.try_get("valid_from").map_err(backend_err)?;
    let valid_until: Option<String> = row.try_get("valid_until").map_err(backend_err)?;
    let predicate_json: Option<String> = row.try_get("predicate_json").map_err(backend_err)?;

    let kind = match (valid_from, valid_until) {
        (Some(from), Some(until)) => PermissionKind::Temporary {
            valid_from: from.parse().map_err(|e| backend_err(format!("valid_from: {e}")))?,
            valid_until: until.parse().map_err(|e| backend_err(format!("valid_until: {e}")))?,
        },
        _ => match predicate_json {
            Some(json) => PermissionKind::Conditional {
                predicate: serde_json::from_str::<ContextPredicate>(&json)?,
            },
            None => PermissionKind::Standard,
        },
    };

    let permission = Permission {
        id: id as u64,
        uri: UriPattern::parse(uri),
        verb: Verb::decode(&verb).ok_or_else(|| backend_err(format!("unknown verb: {verb}")))?,
        grant,
        deny,
        scheme,
        priority: priority as i32,
        kind,
    };
    Ok((EntityId::new(entity_id as u64), permission))
}

/// Durable `sqlx`-backed implementation of [`PersistencePort`] over SQLite.
pub struct SqlxPersistencePort {
    pool: Arc<SqlitePool>,
}

impl SqlxPersistencePort {
    /// Connect (or create) a SQLite database at `database_url`
    /// (e.g. `sqlite://warden.db`) and ensure the conforming schema exists.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await.map_err(backend_err)?;
        Self::ensure_schema(&pool).await?;
        Ok(Self { pool: Arc::new(pool) })
    }

    async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                attrs_json TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS edge (
                parent_id INTEGER NOT NULL,
                child_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (parent_id, child_id)
            )",
        )
        .execute(pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS permission (
                id INTEGER PRIMARY KEY,
                entity_id INTEGER NOT NULL,
                uri TEXT NOT NULL,
                verb TEXT NOT NULL,
                grant INTEGER NOT NULL,
                deny INTEGER NOT NULL,
                scheme TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                valid_from TEXT,
                valid_until TEXT,
                predicate_json TEXT
            )",
        )
        .execute(pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

#[async_trait]
impl PersistencePort for SqlxPersistencePort {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(backend_err)?;
        Ok(Box::new(SqlxTransaction { tx: Some(tx) }))
    }

    #[instrument(skip(self))]
    async fn load_snapshot(&self) -> Result<Snapshot> {
        let entity_rows = sqlx::query("SELECT id, kind, attrs_json FROM entity ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(backend_err)?;
        let mut entities = Vec::with_capacity(entity_rows.len());
        for row in entity_rows {
            let id: i64 = row.try_get("id").map_err(backend_err)?;
            let kind: String = row.try_get("kind").map_err(backend_err)?;
            let attrs_json: String = row.try_get("attrs_json").map_err(backend_err)?;
            let attrs: serde_json::Value = serde_json::from_str(&attrs_json)?;
            entities.push(entity_from_row(EntityId::new(id as u64), &kind, attrs)?);
        }

        let edge_rows = sqlx::query("SELECT parent_id, child_id FROM edge ORDER BY parent_id, child_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(backend_err)?;
        let mut edges = Vec::with_capacity(edge_rows.len());
        for row in edge_rows {
            let parent_id: i64 = row.try_get("parent_id").map_err(backend_err)?;
            let child_id: i64 = row.try_get("child_id").map_err(backend_err)?;
            edges.push((EntityId::new(parent_id as u64), EntityId::new(child_id as u64)));
        }

        let permission_rows = sqlx::query(
            "SELECT id, entity_id, uri, verb, grant, deny, scheme, priority, valid_from, valid_until, predicate_json \
             FROM permission ORDER BY id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(backend_err)?;
        let mut permissions = Vec::with_capacity(permission_rows.len());
        for row in &permission_rows {
            permissions.push(permission_from_row(row)?);
        }

        Ok(Snapshot {
            entities,
            edges,
            permissions,
        })
    }
}

struct SqlxTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
}

impl SqlxTransaction {
    fn conn(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.tx.as_mut().ok_or(PersistenceError::TransactionClosed)
    }
}

#[async_trait]
impl Transaction for SqlxTransaction {
    async fn save_entity(&mut self, entity: &Entity) -> Result<()> {
        let attrs_json = serde_json::to_string(&entity_attrs_json(entity))?;
        let kind = entity.kind().as_str();
        let id = entity.id().get() as i64;
        sqlx::query("INSERT OR REPLACE INTO entity (id, kind, attrs_json) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(kind)
            .bind(attrs_json)
            .execute(&mut **self.conn()?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn save_edge(&mut self, parent: EntityId, child: EntityId, kind: EdgeKind) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO edge (parent_id, child_id, kind) VALUES (?1, ?2, ?3)")
            .bind(parent.get() as i64)
            .bind(child.get() as i64)
            .bind(edge_kind_str(kind))
            .execute(&mut **self.conn()?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn save_permission(&mut self, entity: EntityId, permission: &Permission) -> Result<()> {
        let (valid_from, valid_until, predicate_json) = match &permission.kind {
            PermissionKind::Standard => (None, None, None),
            PermissionKind::Temporary { valid_from, valid_until } => {
                (Some(valid_from.to_rfc3339()), Some(valid_until.to_rfc3339()), None)
            }
            PermissionKind::Conditional { predicate } => (None, None, Some(serde_json::to_string(predicate)?)),
        };
        sqlx::query(
            "INSERT OR REPLACE INTO permission \
             (id, entity_id, uri, verb, grant, deny, scheme, priority, valid_from, valid_until, predicate_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(permission.id as i64)
        .bind(entity.get() as i64)
        .bind(permission.uri.as_str())
        .bind(permission.verb.as_str())
        .bind(permission.grant)
        .bind(permission.deny)
        .bind(&permission.scheme)
        .bind(permission.priority as i64)
        .bind(valid_from)
        .bind(valid_until)
        .bind(predicate_json)
        .execute(&mut **self.conn()?)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_entity(&mut self, id: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM entity WHERE id = ?1")
            .bind(id.get() as i64)
            .execute(&mut **self.conn()?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_edge(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        sqlx::query("DELETE FROM edge WHERE parent_id = ?1 AND child_id = ?2")
            .bind(parent.get() as i64)
            .bind(child.get() as i64)
            .execute(&mut **self.conn()?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_permission(&mut self, entity: EntityId, uri: &str, verb: Verb, scheme: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM permission WHERE entity_id = ?1 AND uri = ?2 AND verb = ?3 AND scheme = ?4",
        )
        .bind(entity.get() as i64)
        .bind(uri)
        .bind(verb.as_str())
        .bind(scheme)
        .execute(&mut **self.conn()?)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or(PersistenceError::TransactionClosed)?;
        tx.commit().await.map_err(backend_err)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or(PersistenceError::TransactionClosed)?;
        tx.rollback().await.map_err(backend_err)
    }
}

#[derive(Default)]
struct InMemoryState {
    entities: Vec<Entity>,
    edges: Vec<(EntityId, EntityId)>,
    permissions: Vec<(EntityId, Permission)>,
}

/// An in-process test double for [`PersistencePort`]. Not a production
/// backend: state lives in a `Mutex`-guarded `Vec` and is lost on process
/// exit. Used by the coordinator's and hydration's test suites in place of
/// a real SQLite file.
#[derive(Default)]
pub struct InMemoryPersistencePort {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryPersistencePort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct InMemoryTransaction {
    state: Arc<Mutex<InMemoryState>>,
    pending: Vec<InMemoryOp>,
    closed: bool,
}

enum InMemoryOp {
    SaveEntity(Entity),
    SaveEdge(EntityId, EntityId),
    SavePermission(EntityId, Permission),
    DeleteEntity(EntityId),
    DeleteEdge(EntityId, EntityId),
    DeletePermission(EntityId, String, Verb, String),
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn save_entity(&mut self, entity: &Entity) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending.push(InMemoryOp::SaveEntity(entity.clone()));
        Ok(())
    }

    async fn save_edge(&mut self, parent: EntityId, child: EntityId, _kind: EdgeKind) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending.push(InMemoryOp::SaveEdge(parent, child));
        Ok(())
    }

    async fn save_permission(&mut self, entity: EntityId, permission: &Permission) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending.push(InMemoryOp::SavePermission(entity, permission.clone()));
        Ok(())
    }

    async fn delete_entity(&mut self, id: EntityId) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending.push(InMemoryOp::DeleteEntity(id));
        Ok(())
    }

    async fn delete_edge(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending.push(InMemoryOp::DeleteEdge(parent, child));
        Ok(())
    }

    async fn delete_permission(&mut self, entity: EntityId, uri: &str, verb: Verb, scheme: &str) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.pending
            .push(InMemoryOp::DeletePermission(entity, uri.to_string(), verb, scheme.to_string()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::TransactionClosed);
        }
        self.closed = true;
        let mut state = self.state.lock();
        for op in self.pending.drain(..) {
            match op {
                InMemoryOp::SaveEntity(entity) => {
                    state.entities.retain(|e| e.id() != entity.id());
                    state.entities.push(entity);
                }
                InMemoryOp::SaveEdge(parent, child) => {
                    if !state.edges.contains(&(parent, child)) {
                        state.edges.push((parent, child));
                    }
                }
                InMemoryOp::SavePermission(entity, permission) => {
                    state
                        .permissions
                        .retain(|(e, p)| !(*e == entity && p.identity_key() == permission.identity_key()));
                    state.permissions.push((entity, permission));
                }
                InMemoryOp::DeleteEntity(id) => {
                    state.entities.retain(|e| e.id() != id);
                }
                InMemoryOp::DeleteEdge(parent, child) => {
                    state.edges.retain(|e| *e != (parent, child));
                }
                InMemoryOp::DeletePermission(entity, uri, verb, scheme) => {
                    let uri_lower = uri.to_ascii_lowercase();
                    state
                        .permissions
                        .retain(|(e, p)| !(*e == entity && p.identity_key() == (uri_lower.clone(), verb, scheme.clone())));
                }
            }
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistencePort {
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            pending: Vec::new(),
            closed: false,
        }))
    }

    async fn load_snapshot(&self) -> Result<Snapshot> {
        let state = self.state.lock();
        let mut entities = state.entities.clone();
        entities.sort_by_key(Entity::id);
        Ok(Snapshot {
            entities,
            edges: state.edges.clone(),
            permissions: state.permissions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::entity::EntityCore;
    use crate::types::{EntityId, UriPattern, Verb};

    #[tokio::test]
    async fn in_memory_port_round_trips_entities_edges_and_permissions() {
        let port = InMemoryPersistencePort::new();
        let user = Entity::User(User {
            core: EntityCore::new(EntityId::new(1)),
            name: "alice".into(),
            email: None,
            password_hash: None,
            salt: None,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            is_active: true,
        });
        let group = Entity::Group(Group {
            core: EntityCore::new(EntityId::new(2)),
            name: "eng".into(),
            description: None,
        });
        let perm = Permission::new(1, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap();

        let mut tx = port.begin_transaction().await.unwrap();
        tx.save_entity(&user).await.unwrap();
        tx.save_entity(&group).await.unwrap();
        tx.save_edge(EntityId::new(2), EntityId::new(1), EdgeKind::UserToGroup)
            .await
            .unwrap();
        tx.save_permission(EntityId::new(2), &perm).await.unwrap();
        tx.commit().await.unwrap();

        let snapshot = port.load_snapshot().await.unwrap();
        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.edges, vec![(EntityId::new(2), EntityId::new(1))]);
        assert_eq!(snapshot.permissions.len(), 1);
    }

    #[tokio::test]
    async fn rolled_back_transaction_is_not_visible() {
        let port = InMemoryPersistencePort::new();
        let user = Entity::User(User {
            core: EntityCore::new(EntityId::new(1)),
            name: "alice".into(),
            email: None,
            password_hash: None,
            salt: None,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            is_active: true,
        });
        let mut tx = port.begin_transaction().await.unwrap();
        tx.save_entity(&user).await.unwrap();
        tx.rollback().await.unwrap();

        let snapshot = port.load_snapshot().await.unwrap();
        assert!(snapshot.entities.is_empty());
    }
}
