//! The command dispatcher: component C.
//!
//! A bounded FIFO queue with exactly one consumer task. The consumer is the
//! sole reader/writer of the entity graph's structural state, which makes
//! the graph sequentially consistent without per-entity locks (§5). Modeled
//! on this lineage's single-task run loop (`AppRunner::run_until_complete`):
//! one task owns the mutable state, producers only ever touch a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::commands::command::{
    Command, CommandError, CommandOutcome, CommandResult, CorrelationId, EntityAttrs,
};
use crate::entities::graph::EntityGraph;
use crate::evaluator::PermissionEvaluator;
use crate::persistence::coordinator::{PersistenceCoordinator, PersistenceOp};

/// Cooperative cancellation flag shared between a command's submitter and
/// the dispatcher. Checked once before dequeue (a hard cancel); after
/// dequeue, cancellation is advisory only and the command runs to
/// completion, per §4.C.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Envelope {
    command: Command,
    correlation_id: CorrelationId,
    cancel: CancelToken,
    completion: oneshot::Sender<CommandResult>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum DispatcherError {
    #[error("dispatcher queue is full or closed")]
    #[diagnostic(code(warden::dispatcher::send_failed))]
    SendFailed,

    #[error("dispatcher did not reply (consumer task ended)")]
    #[diagnostic(code(warden::dispatcher::no_reply))]
    NoReply,

    #[error("dispatcher is shutting down")]
    #[diagnostic(code(warden::dispatcher::shutting_down))]
    ShuttingDown,
}

/// Handle producers use to submit commands. Cloning is cheap (wraps a
/// `flume::Sender`); many producers may race on `submit`, which is safe
/// because `flume` provides FIFO ordering by completion of `send`.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: flume::Sender<Envelope>,
    shutting_down: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Submit `command` and await its result. Returns
    /// [`DispatcherError::ShuttingDown`] immediately if shutdown has begun,
    /// without touching the queue.
    #[instrument(skip(self, command), fields(tag = command.tag()))]
    pub async fn submit(&self, command: Command) -> Result<CommandResult, DispatcherError> {
        self.submit_cancelable(command, CancelToken::new()).await
    }

    /// Submit `command` with an explicit cancellation token. If `cancel` is
    /// already canceled by the time the consumer dequeues it, the command
    /// resolves with [`CommandError::Canceled`] without running.
    pub async fn submit_cancelable(
        &self,
        command: Command,
        cancel: CancelToken,
    ) -> Result<CommandResult, DispatcherError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(DispatcherError::ShuttingDown);
        }
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope {
            command,
            correlation_id: CorrelationId::new(),
            cancel,
            completion: tx,
        };
        self.sender
            .send_async(envelope)
            .await
            .map_err(|_| DispatcherError::SendFailed)?;
        rx.await.map_err(|_| DispatcherError::NoReply)
    }
}

/// Owns the queue's receive side, the entity graph, the evaluator, and
/// (optionally) the persistence coordinator. Run via [`Dispatcher::spawn`],
/// which returns a [`DispatcherHandle`] for producers and a [`JoinHandle`]
/// for the consumer task.
pub struct Dispatcher {
    receiver: flume::Receiver<Envelope>,
    graph: EntityGraph,
    evaluator: PermissionEvaluator,
    persistence: Option<Arc<PersistenceCoordinator>>,
    shutting_down: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Build a dispatcher with a bounded queue of `capacity` (§4.C default
    /// 1000) around an already-hydrated `graph`.
    #[must_use]
    pub fn new(
        capacity: usize,
        graph: EntityGraph,
        evaluator: PermissionEvaluator,
        persistence: Option<Arc<PersistenceCoordinator>>,
    ) -> (DispatcherHandle, Self) {
        let (sender, receiver) = flume::bounded(capacity);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let handle = DispatcherHandle {
            sender,
            shutting_down: shutting_down.clone(),
        };
        let dispatcher = Self {
            receiver,
            graph,
            evaluator,
            persistence,
            shutting_down,
        };
        (handle, dispatcher)
    }

    /// Spawn the consumer loop on the current runtime. Returns the join
    /// handle; awaiting it after [`DispatcherHandle`] shutdown observes the
    /// consumer's natural exit.
    pub fn spawn(self) -> JoinHandle<EntityGraph> {
        tokio::spawn(self.run())
    }

    /// The consumer loop: processes commands strictly in submission order,
    /// one at a time (§4.C). Returns the final graph when the channel
    /// closes (all handles dropped), so a caller can inspect post-shutdown
    /// state in tests.
    #[instrument(skip(self))]
    async fn run(mut self) -> EntityGraph {
        while let Ok(envelope) = self.receiver.recv_async().await {
            if envelope.cancel.is_canceled() {
                let _ = envelope.completion.send(Err(CommandError::Canceled));
                continue;
            }
            let tag = envelope.command.tag();
            let result = self.handle(envelope.command, envelope.correlation_id).await;
            if let Err(e) = &result {
                warn!(correlation_id = %envelope.correlation_id, tag, error = %e, "command failed");
            }
            let _ = envelope.completion.send(result);
        }
        self.graph
    }

    async fn handle(&mut self, command: Command, correlation_id: CorrelationId) -> CommandResult {
        let is_mutation = command.is_mutation();
        let tag = command.tag();
        let (outcome, ops) = self.apply(command)?;

        if is_mutation {
            if let Some(coordinator) = &self.persistence {
                coordinator.enqueue(correlation_id, tag, ops).await;
            }
        }

        Ok(outcome)
    }

    /// Applies one command to the graph/evaluator and, for mutations,
    /// produces the minimal [`PersistenceOp`] set the coordinator needs to
    /// replicate the change — captured here rather than reconstructed after
    /// the fact, since e.g. a delete's edges and permissions are gone from
    /// the graph by the time `apply` returns.
    fn apply(&mut self, command: Command) -> Result<(CommandOutcome, Vec<PersistenceOp>), CommandError> {
        use Command::*;
        let mut ops = Vec::new();
        let outcome = match command {
            CreateUser { attrs } => {
                let id = self.create_user(attrs)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            CreateGroup { attrs } => {
                let id = self
                    .graph
                    .create_group(attrs.name.unwrap_or_default(), attrs.description)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            CreateRole { attrs } => {
                let id = self
                    .graph
                    .create_role(attrs.name.unwrap_or_default(), attrs.description)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            GetUser { id } => CommandOutcome::Entity(crate::entities::entity::Entity::User(
                self.graph.get_user(id)?.clone(),
            )),
            GetGroup { id } => CommandOutcome::Entity(crate::entities::entity::Entity::Group(
                self.graph.get_group(id)?.clone(),
            )),
            GetRole { id } => CommandOutcome::Entity(crate::entities::entity::Entity::Role(
                self.graph.get_role(id)?.clone(),
            )),
            UpdateUser { id, attrs } => {
                self.update_user(id, attrs)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            UpdateGroup { id, attrs } => {
                self.update_group(id, attrs)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            UpdateRole { id, attrs } => {
                self.update_role(id, attrs)?;
                ops.push(PersistenceOp::SaveEntity(self.saved_entity(id)));
                CommandOutcome::EntityId(id)
            }
            DeleteUser { id } | DeleteGroup { id } | DeleteRole { id } => {
                let before = self.graph.get_entity(id);
                self.graph.delete(id)?;
                self.evaluator.invalidate(&[id]);
                if let Some(entity) = before {
                    let core = entity.core();
                    for parent in &core.parents {
                        ops.push(PersistenceOp::DeleteEdge { parent: *parent, child: id });
                    }
                    for child in &core.children {
                        ops.push(PersistenceOp::DeleteEdge { parent: id, child: *child });
                    }
                    for permission in &core.permissions {
                        ops.push(PersistenceOp::DeletePermission {
                            entity: id,
                            uri: permission.uri.as_str().to_string(),
                            verb: permission.verb,
                            scheme: permission.scheme.clone(),
                        });
                    }
                }
                ops.push(PersistenceOp::DeleteEntity(id));
                CommandOutcome::EntityId(id)
            }
            AddUserToGroup { user_id, group_id } => {
                self.graph.link_parent_child(group_id, user_id)?;
                self.invalidate_descendants(user_id);
                ops.push(self.save_edge_op(group_id, user_id));
                CommandOutcome::Unit
            }
            RemoveUserFromGroup { user_id, group_id } => {
                self.graph.unlink(group_id, user_id)?;
                self.invalidate_descendants(user_id);
                ops.push(PersistenceOp::DeleteEdge { parent: group_id, child: user_id });
                CommandOutcome::Unit
            }
            AssignUserToRole { user_id, role_id } => {
                self.graph.link_parent_child(role_id, user_id)?;
                self.invalidate_descendants(user_id);
                ops.push(self.save_edge_op(role_id, user_id));
                CommandOutcome::Unit
            }
            UnassignUserFromRole { user_id, role_id } => {
                self.graph.unlink(role_id, user_id)?;
                self.invalidate_descendants(user_id);
                ops.push(PersistenceOp::DeleteEdge { parent: role_id, child: user_id });
                CommandOutcome::Unit
            }
            AddRoleToGroup { role_id, group_id } => {
                self.graph.link_parent_child(group_id, role_id)?;
                self.invalidate_descendants(role_id);
                ops.push(self.save_edge_op(group_id, role_id));
                CommandOutcome::Unit
            }
            RemoveRoleFromGroup { role_id, group_id } => {
                self.graph.unlink(group_id, role_id)?;
                self.invalidate_descendants(role_id);
                ops.push(PersistenceOp::DeleteEdge { parent: group_id, child: role_id });
                CommandOutcome::Unit
            }
            AddGroupToGroup { parent_id, child_id } => {
                self.graph.link_parent_child(parent_id, child_id)?;
                self.invalidate_descendants(child_id);
                ops.push(self.save_edge_op(parent_id, child_id));
                CommandOutcome::Unit
            }
            RemoveGroupFromGroup { parent_id, child_id } => {
                self.graph.unlink(parent_id, child_id)?;
                self.invalidate_descendants(child_id);
                ops.push(PersistenceOp::DeleteEdge { parent: parent_id, child: child_id });
                CommandOutcome::Unit
            }
            AddPermissionToEntity { entity_id, mut permission } => {
                permission.id = self.graph.allocate_permission_id();
                let persisted = permission.clone();
                self.graph.add_permission(entity_id, permission)?;
                self.invalidate_descendants(entity_id);
                ops.push(PersistenceOp::SavePermission {
                    entity: entity_id,
                    permission: persisted,
                });
                CommandOutcome::Unit
            }
            RemovePermissionFromEntity {
                entity_id,
                uri,
                verb,
                scheme,
            } => {
                self.graph.remove_permission(entity_id, &uri, verb, &scheme)?;
                self.invalidate_descendants(entity_id);
                ops.push(PersistenceOp::DeletePermission {
                    entity: entity_id,
                    uri,
                    verb,
                    scheme,
                });
                CommandOutcome::Unit
            }
            CheckPermission {
                entity_id,
                uri,
                verb,
                context,
            } => {
                let decision = self
                    .evaluator
                    .evaluate(&self.graph, entity_id, &uri, verb, context.as_ref());
                CommandOutcome::Decision(decision)
            }
        };
        Ok((outcome, ops))
    }

    /// Fetch the just-created-or-updated entity for a `SaveEntity` op.
    /// Panics only if the graph's own invariants are violated (the id was
    /// just handed back by a successful create/update on this same graph).
    fn saved_entity(&self, id: crate::types::EntityId) -> crate::entities::entity::Entity {
        self.graph
            .get_entity(id)
            .expect("entity id returned by a just-applied create/update must resolve")
    }

    /// Build the `SaveEdge` op for a freshly linked `parent -> child` pair,
    /// looking up the edge kind the graph itself just validated.
    fn save_edge_op(&self, parent: crate::types::EntityId, child: crate::types::EntityId) -> PersistenceOp {
        let kind = self
            .graph
            .edge_kind_for(parent, child)
            .expect("edge kind must resolve for an edge link_parent_child just accepted");
        PersistenceOp::SaveEdge { parent, child, kind }
    }

    /// A mutation touching `entity` invalidates cache entries for `entity`
    /// and every descendant (§4.B: "invalidates that entity and all its
    /// descendants").
    fn invalidate_descendants(&mut self, entity: crate::types::EntityId) {
        let mut affected = self.graph.descendants(entity);
        affected.push(entity);
        self.evaluator.invalidate(&affected);
    }

    fn create_user(
        &mut self,
        attrs: EntityAttrs,
    ) -> Result<crate::types::EntityId, crate::entities::graph::GraphError> {
        self.graph.create_user(
            attrs.name.unwrap_or_default(),
            attrs.email,
            attrs.password_hash,
            attrs.salt,
        )
    }

    fn update_user(
        &mut self,
        id: crate::types::EntityId,
        attrs: EntityAttrs,
    ) -> Result<(), crate::entities::graph::GraphError> {
        self.graph.update_user(
            id,
            attrs.name,
            attrs.email,
            attrs.password_hash,
            attrs.salt,
            attrs.is_active,
        )
    }

    fn update_group(
        &mut self,
        id: crate::types::EntityId,
        attrs: EntityAttrs,
    ) -> Result<(), crate::entities::graph::GraphError> {
        self.graph.update_group(id, attrs.name, attrs.description)
    }

    fn update_role(
        &mut self,
        id: crate::types::EntityId,
        attrs: EntityAttrs,
    ) -> Result<(), crate::entities::graph::GraphError> {
        self.graph.update_role(id, attrs.name, attrs.description)
    }
}

/// Graceful shutdown (§4.C): rejects new submissions immediately, then
/// waits up to `timeout` for the consumer to drain in-flight commands and
/// exit, forcibly aborting it otherwise.
pub async fn shutdown(handle: &DispatcherHandle, join: JoinHandle<EntityGraph>, timeout: Duration) {
    handle.shutting_down.store(true, Ordering::SeqCst);
    drop(handle.sender.clone());
    if tokio::time::timeout(timeout, join).await.is_err() {
        warn!("dispatcher consumer did not exit within shutdown timeout; abandoning");
    }
}
