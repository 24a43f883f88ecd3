//! The command surface (§6, §4.C): the closed set of tagged variants the
//! dispatcher accepts, plus the typed result/error types every command
//! resolves with.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entities::entity::{Entity, Permission};
use crate::errors::ErrorKind;
use crate::evaluator::Decision;
use crate::types::{EntityId, Verb};

/// Errors named in §4.C / §7 that a command may resolve with.
#[derive(Debug, Error, Diagnostic)]
pub enum CommandError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] crate::entities::graph::GraphError),

    #[error("command was canceled before it was dequeued")]
    #[diagnostic(code(warden::command::canceled))]
    Canceled,

    #[error("dispatcher is shutting down")]
    #[diagnostic(code(warden::command::shutting_down))]
    ShuttingDown,

    #[error("operation is not supported: {0}")]
    #[diagnostic(code(warden::command::not_supported))]
    NotSupported(String),

    #[error("internal error: {0}")]
    #[diagnostic(code(warden::command::internal))]
    Internal(String),
}

impl CommandError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Graph(e) => e.kind(),
            CommandError::Canceled => ErrorKind::Canceled,
            CommandError::ShuttingDown => ErrorKind::ShuttingDown,
            CommandError::NotSupported(_) => ErrorKind::NotSupported,
            CommandError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type CommandResult = Result<CommandOutcome, CommandError>;

/// The typed result a command resolves its promise with: either the new
/// entity (create commands), the looked-up entity (get commands), a
/// permission evaluation `Decision` (check-permission), or unit (everything
/// else that just mutates the graph).
#[derive(Clone, Debug)]
pub enum CommandOutcome {
    Entity(Entity),
    EntityId(EntityId),
    Decision(Decision),
    Unit,
}

/// Attributes supplied to entity create/update commands. Kept as a single
/// loosely-typed bag (mirroring the `attrs` the spec's command surface
/// names) rather than one struct per entity kind, since create and update
/// share the same shape.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityAttrs {
    pub name: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub password_hash: Option<String>,
    pub salt: Option<String>,
    pub is_active: Option<bool>,
}

/// The closed set of command variants (§6 "Command surface"). Each maps to
/// exactly one dispatcher handler; there is no reflection-based dispatch
/// (per the design notes), only a match in [`crate::commands::dispatcher`].
#[derive(Clone, Debug)]
pub enum Command {
    CreateUser { attrs: EntityAttrs },
    CreateGroup { attrs: EntityAttrs },
    CreateRole { attrs: EntityAttrs },
    GetUser { id: EntityId },
    GetGroup { id: EntityId },
    GetRole { id: EntityId },
    UpdateUser { id: EntityId, attrs: EntityAttrs },
    UpdateGroup { id: EntityId, attrs: EntityAttrs },
    UpdateRole { id: EntityId, attrs: EntityAttrs },
    DeleteUser { id: EntityId },
    DeleteGroup { id: EntityId },
    DeleteRole { id: EntityId },

    AddUserToGroup { user_id: EntityId, group_id: EntityId },
    RemoveUserFromGroup { user_id: EntityId, group_id: EntityId },
    AssignUserToRole { user_id: EntityId, role_id: EntityId },
    UnassignUserFromRole { user_id: EntityId, role_id: EntityId },
    AddRoleToGroup { role_id: EntityId, group_id: EntityId },
    RemoveRoleFromGroup { role_id: EntityId, group_id: EntityId },
    AddGroupToGroup { parent_id: EntityId, child_id: EntityId },
    RemoveGroupFromGroup { parent_id: EntityId, child_id: EntityId },

    AddPermissionToEntity { entity_id: EntityId, permission: Permission },
    RemovePermissionFromEntity {
        entity_id: EntityId,
        uri: String,
        verb: Verb,
        scheme: String,
    },
    CheckPermission {
        entity_id: EntityId,
        uri: String,
        verb: Verb,
        context: Option<serde_json::Value>,
    },
}

impl Command {
    /// A short, stable tag for logging/metrics — not used for dispatch.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Command::CreateUser { .. } => "create_user",
            Command::CreateGroup { .. } => "create_group",
            Command::CreateRole { .. } => "create_role",
            Command::GetUser { .. } => "get_user",
            Command::GetGroup { .. } => "get_group",
            Command::GetRole { .. } => "get_role",
            Command::UpdateUser { .. } => "update_user",
            Command::UpdateGroup { .. } => "update_group",
            Command::UpdateRole { .. } => "update_role",
            Command::DeleteUser { .. } => "delete_user",
            Command::DeleteGroup { .. } => "delete_group",
            Command::DeleteRole { .. } => "delete_role",
            Command::AddUserToGroup { .. } => "add_user_to_group",
            Command::RemoveUserFromGroup { .. } => "remove_user_from_group",
            Command::AssignUserToRole { .. } => "assign_user_to_role",
            Command::UnassignUserFromRole { .. } => "unassign_user_from_role",
            Command::AddRoleToGroup { .. } => "add_role_to_group",
            Command::RemoveRoleFromGroup { .. } => "remove_role_from_group",
            Command::AddGroupToGroup { .. } => "add_group_to_group",
            Command::RemoveGroupFromGroup { .. } => "remove_group_from_group",
            Command::AddPermissionToEntity { .. } => "add_permission_to_entity",
            Command::RemovePermissionFromEntity { .. } => "remove_permission_from_entity",
            Command::CheckPermission { .. } => "check_permission",
        }
    }

    /// Whether this command mutates the graph (vs. a pure read like
    /// `GetUser`/`CheckPermission`). Used to decide whether to forward the
    /// command to the persistence coordinator after it's applied.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Command::GetUser { .. }
                | Command::GetGroup { .. }
                | Command::GetRole { .. }
                | Command::CheckPermission { .. }
        )
    }
}

/// Correlation id carried by every submitted command, threaded through to
/// completion and, where applicable, the dead-letter queue's error chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
