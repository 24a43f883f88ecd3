//! The in-memory entity graph: component A.
//!
//! `EntityGraph` is the sole owner of every entity and permission object.
//! It is mutated only by the command dispatcher, which is the graph's only
//! writer — so, per the design notes, no internal locking is needed here;
//! the dispatcher's single-writer discipline is the synchronization.

use std::collections::VecDeque;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::entities::entity::{Entity, EntityCore, Group, Permission, Role, User};
use crate::errors::ErrorKind;
use crate::types::{EdgeKind, EntityId, EntityKind};

/// Errors raised by graph mutator primitives and lookups.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("entity not found: {id} (expected {expected})")]
    #[diagnostic(code(warden::graph::not_found))]
    NotFound { id: EntityId, expected: EntityKind },

    #[error("email already in use: {email}")]
    #[diagnostic(code(warden::graph::already_exists))]
    AlreadyExists { email: String },

    #[error("would create a cycle in the group-containment graph: {parent} -> {child}")]
    #[diagnostic(
        code(warden::graph::would_create_cycle),
        help("`{child}` is already an ancestor of `{parent}`; linking them would close a loop.")
    )]
    WouldCreateCycle { parent: EntityId, child: EntityId },

    #[error("illegal edge kind {kind} between {parent} ({parent_kind}) and {child} ({child_kind})")]
    #[diagnostic(code(warden::graph::illegal_edge))]
    IllegalEdge {
        kind: EdgeKind,
        parent: EntityId,
        parent_kind: EntityKind,
        child: EntityId,
        child_kind: EntityKind,
    },

    #[error("permission {uri}/{verb:?} already exists on entity {entity}")]
    #[diagnostic(code(warden::graph::duplicate_permission))]
    DuplicatePermission {
        entity: EntityId,
        uri: String,
        verb: crate::types::Verb,
    },

    #[error("graph is not hydrated yet")]
    #[diagnostic(
        code(warden::graph::not_ready),
        help("Mutations are refused until hydration from the persistent store completes.")
    )]
    NotReady,

    #[error("invalid argument: {0}")]
    #[diagnostic(code(warden::graph::invalid_argument))]
    InvalidArgument(String),
}

impl GraphError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::NotFound { .. } => ErrorKind::NotFound,
            GraphError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            GraphError::WouldCreateCycle { .. } => ErrorKind::WouldCreateCycle,
            GraphError::IllegalEdge { .. } => ErrorKind::InvalidArgument,
            GraphError::DuplicatePermission { .. } => ErrorKind::Conflict,
            GraphError::NotReady => ErrorKind::Internal,
            GraphError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// The in-memory entity graph.
///
/// Holds three keyed collections (§3: users/groups/roles, `id → entity`)
/// plus an id allocator and an email index maintained for the "email unique
/// across users" invariant. `ready` gates mutation until hydration (§4.A)
/// completes.
#[derive(Debug, Default)]
pub struct EntityGraph {
    users: FxHashMap<EntityId, User>,
    groups: FxHashMap<EntityId, Group>,
    roles: FxHashMap<EntityId, Role>,
    emails: FxHashMap<String, EntityId>,
    next_id: u64,
    next_permission_id: u64,
    ready: bool,
}

impl EntityGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Mark the graph ready to accept mutations. Called once hydration
    /// (`crate::entities::hydration`) finishes loading entities, edges, and
    /// permissions from the persistent store.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    fn require_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(GraphError::NotReady)
        }
    }

    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::new(self.next_id)
    }

    /// Allocate a permission id. Monotonically increasing, used by the
    /// `MOST_RECENT` conflict strategy as a recency proxy.
    pub fn allocate_permission_id(&mut self) -> u64 {
        self.next_permission_id += 1;
        self.next_permission_id
    }

    // ---- lookups ----------------------------------------------------

    pub fn get_user(&self, id: EntityId) -> Result<&User> {
        self.users.get(&id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::User,
        })
    }

    pub fn get_group(&self, id: EntityId) -> Result<&Group> {
        self.groups.get(&id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::Group,
        })
    }

    pub fn get_role(&self, id: EntityId) -> Result<&Role> {
        self.roles.get(&id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::Role,
        })
    }

    /// Look up any entity regardless of kind.
    #[must_use]
    pub fn get_entity(&self, id: EntityId) -> Option<Entity> {
        if let Some(u) = self.users.get(&id) {
            return Some(Entity::User(u.clone()));
        }
        if let Some(g) = self.groups.get(&id) {
            return Some(Entity::Group(g.clone()));
        }
        if let Some(r) = self.roles.get(&id) {
            return Some(Entity::Role(r.clone()));
        }
        None
    }

    fn core_mut(&mut self, id: EntityId) -> Option<&mut EntityCore> {
        if let Some(u) = self.users.get_mut(&id) {
            return Some(&mut u.core);
        }
        if let Some(g) = self.groups.get_mut(&id) {
            return Some(&mut g.core);
        }
        if let Some(r) = self.roles.get_mut(&id) {
            return Some(&mut r.core);
        }
        None
    }

    fn core(&self, id: EntityId) -> Option<&EntityCore> {
        if let Some(u) = self.users.get(&id) {
            return Some(&u.core);
        }
        if let Some(g) = self.groups.get(&id) {
            return Some(&g.core);
        }
        if let Some(r) = self.roles.get(&id) {
            return Some(&r.core);
        }
        None
    }

    fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        if self.users.contains_key(&id) {
            Some(EntityKind::User)
        } else if self.groups.contains_key(&id) {
            Some(EntityKind::Group)
        } else if self.roles.contains_key(&id) {
            Some(EntityKind::Role)
        } else {
            None
        }
    }

    // ---- hydration (bypasses the ready gate; used only at startup) ------

    /// Insert a fully-formed user during hydration, bypassing the
    /// mutation-gate and id allocator (the snapshot already carries stable
    /// ids). Called only by [`crate::entities::hydration`].
    pub(crate) fn hydrate_user(&mut self, user: User) {
        if let Some(email) = user.email.clone() {
            self.emails.insert(email, user.core.id);
        }
        self.next_id = self.next_id.max(user.core.id.get());
        self.users.insert(user.core.id, user);
    }

    pub(crate) fn hydrate_group(&mut self, group: Group) {
        self.next_id = self.next_id.max(group.core.id.get());
        self.groups.insert(group.core.id, group);
    }

    pub(crate) fn hydrate_role(&mut self, role: Role) {
        self.next_id = self.next_id.max(role.core.id.get());
        self.roles.insert(role.core.id, role);
    }

    /// Wire a `parent -> child` edge during hydration, skipping the cycle
    /// check (the snapshot is assumed already-valid store state) but still
    /// maintaining both sides symmetrically.
    pub(crate) fn hydrate_edge(&mut self, parent: EntityId, child: EntityId) {
        if let Some(c) = self.core_mut(parent) {
            c.children.insert(child);
        }
        if let Some(c) = self.core_mut(child) {
            c.parents.insert(parent);
        }
    }

    pub(crate) fn hydrate_permission(&mut self, entity: EntityId, permission: Permission) {
        self.next_permission_id = self.next_permission_id.max(permission.id);
        if let Some(core) = self.core_mut(entity) {
            core.permissions.push(permission);
        }
    }

    // ---- creation -----------------------------------------------------

    #[instrument(skip(self, password_hash, salt), err)]
    pub fn create_user(
        &mut self,
        name: String,
        email: Option<String>,
        password_hash: Option<String>,
        salt: Option<String>,
    ) -> Result<EntityId> {
        self.require_ready()?;
        let normalized_email = email.map(|e| e.to_ascii_lowercase());
        if let Some(email) = &normalized_email {
            if self.emails.contains_key(email) {
                return Err(GraphError::AlreadyExists {
                    email: email.clone(),
                });
            }
        }
        let id = self.allocate_id();
        let user = User {
            core: EntityCore::new(id),
            name,
            email: normalized_email.clone(),
            password_hash,
            salt,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            is_active: true,
        };
        if let Some(email) = normalized_email {
            self.emails.insert(email, id);
        }
        self.users.insert(id, user);
        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub fn create_group(&mut self, name: String, description: Option<String>) -> Result<EntityId> {
        self.require_ready()?;
        let id = self.allocate_id();
        self.groups.insert(
            id,
            Group {
                core: EntityCore::new(id),
                name,
                description,
            },
        );
        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub fn create_role(&mut self, name: String, description: Option<String>) -> Result<EntityId> {
        self.require_ready()?;
        let id = self.allocate_id();
        self.roles.insert(
            id,
            Role {
                core: EntityCore::new(id),
                name,
                description,
            },
        );
        Ok(id)
    }

    /// Apply a partial attribute update to a user. Only fields present in
    /// the patch are touched; `email` re-validates the uniqueness invariant
    /// and re-indexes `emails` if it changes.
    #[instrument(skip(self, password_hash, salt), err)]
    pub fn update_user(
        &mut self,
        id: EntityId,
        name: Option<String>,
        email: Option<String>,
        password_hash: Option<String>,
        salt: Option<String>,
        is_active: Option<bool>,
    ) -> Result<()> {
        self.require_ready()?;
        if !self.users.contains_key(&id) {
            return Err(GraphError::NotFound {
                id,
                expected: EntityKind::User,
            });
        }

        if let Some(email) = &email {
            let normalized = email.to_ascii_lowercase();
            if self.emails.get(&normalized).is_some_and(|owner| *owner != id) {
                return Err(GraphError::AlreadyExists { email: normalized });
            }
        }

        let user = self.users.get_mut(&id).expect("checked above");
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            let normalized = email.to_ascii_lowercase();
            if let Some(old) = user.email.take() {
                self.emails.remove(&old);
            }
            self.emails.insert(normalized.clone(), id);
            self.users.get_mut(&id).expect("checked above").email = Some(normalized);
        }
        let user = self.users.get_mut(&id).expect("checked above");
        if let Some(password_hash) = password_hash {
            user.password_hash = Some(password_hash);
        }
        if let Some(salt) = salt {
            user.salt = Some(salt);
        }
        if let Some(is_active) = is_active {
            user.is_active = is_active;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn update_group(&mut self, id: EntityId, name: Option<String>, description: Option<String>) -> Result<()> {
        self.require_ready()?;
        let group = self.groups.get_mut(&id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::Group,
        })?;
        if let Some(name) = name {
            group.name = name;
        }
        if let Some(description) = description {
            group.description = Some(description);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn update_role(&mut self, id: EntityId, name: Option<String>, description: Option<String>) -> Result<()> {
        self.require_ready()?;
        let role = self.roles.get_mut(&id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::Role,
        })?;
        if let Some(name) = name {
            role.name = name;
        }
        if let Some(description) = description {
            role.description = Some(description);
        }
        Ok(())
    }

    /// Delete an entity: first removes all incident edges, then removes the
    /// entity itself (§3 lifecycle). Hard delete — the id is never reused.
    #[instrument(skip(self), err)]
    pub fn delete(&mut self, id: EntityId) -> Result<()> {
        self.require_ready()?;
        let kind = self.kind_of(id).ok_or(GraphError::NotFound {
            id,
            expected: EntityKind::User,
        })?;

        let core = self.core(id).expect("kind_of found it").clone_neighbors();
        for parent in &core.parents {
            self.disconnect_sides(*parent, id);
        }
        for child in &core.children {
            self.disconnect_sides(id, *child);
        }

        match kind {
            EntityKind::User => {
                if let Some(u) = self.users.remove(&id) {
                    if let Some(email) = u.email {
                        self.emails.remove(&email);
                    }
                }
            }
            EntityKind::Group => {
                self.groups.remove(&id);
            }
            EntityKind::Role => {
                self.roles.remove(&id);
            }
        }
        Ok(())
    }

    fn disconnect_sides(&mut self, parent: EntityId, child: EntityId) {
        if let Some(c) = self.core_mut(parent) {
            c.children.remove(&child);
        }
        if let Some(c) = self.core_mut(child) {
            c.parents.remove(&parent);
        }
    }

    // ---- edges ----------------------------------------------------------

    /// Determine the legal edge kind for a `parent -> child` pair, or
    /// `None` if the kind combination is illegal (invariant 5).
    pub(crate) fn edge_kind_for(&self, parent: EntityId, child: EntityId) -> Option<EdgeKind> {
        let parent_kind = self.kind_of(parent)?;
        let child_kind = self.kind_of(child)?;
        match (parent_kind, child_kind) {
            (EntityKind::Group, EntityKind::User) => Some(EdgeKind::UserToGroup),
            (EntityKind::Role, EntityKind::User) => Some(EdgeKind::UserToRole),
            (EntityKind::Group, EntityKind::Group) => Some(EdgeKind::GroupToGroup),
            (EntityKind::Group, EntityKind::Role) => Some(EdgeKind::RoleToGroup),
            _ => None,
        }
    }

    /// Link `child` as a child of `parent`. For `group->group` edges, runs
    /// the cycle check first: a BFS from the prospective child following
    /// `children` edges; if `parent` is reachable, the link is rejected.
    #[instrument(skip(self), err)]
    pub fn link_parent_child(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        self.require_ready()?;
        let parent_kind = self.kind_of(parent).ok_or(GraphError::NotFound {
            id: parent,
            expected: EntityKind::Group,
        })?;
        let child_kind = self.kind_of(child).ok_or(GraphError::NotFound {
            id: child,
            expected: EntityKind::User,
        })?;
        let edge_kind = self.edge_kind_for(parent, child).ok_or(GraphError::IllegalEdge {
            kind: EdgeKind::GroupToGroup,
            parent,
            parent_kind,
            child,
            child_kind,
        })?;

        if edge_kind == EdgeKind::GroupToGroup && self.would_create_cycle(parent, child) {
            return Err(GraphError::WouldCreateCycle { parent, child });
        }

        if let Some(c) = self.core_mut(parent) {
            c.children.insert(child);
        }
        if let Some(c) = self.core_mut(child) {
            c.parents.insert(parent);
        }
        Ok(())
    }

    /// BFS from `child` following `children` edges; `true` if `parent` is
    /// reachable (meaning linking `parent -> child` would close a loop).
    fn would_create_cycle(&self, parent: EntityId, child: EntityId) -> bool {
        if parent == child {
            return true;
        }
        let mut visited = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(child);
        visited.insert(child);
        while let Some(current) = queue.pop_front() {
            if current == parent {
                return true;
            }
            if let Some(core) = self.core(current) {
                for next in &core.children {
                    if visited.insert(*next) {
                        queue.push_back(*next);
                    }
                }
            }
        }
        false
    }

    #[instrument(skip(self), err)]
    pub fn unlink(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        self.require_ready()?;
        if self.kind_of(parent).is_none() {
            return Err(GraphError::NotFound {
                id: parent,
                expected: EntityKind::Group,
            });
        }
        if self.kind_of(child).is_none() {
            return Err(GraphError::NotFound {
                id: child,
                expected: EntityKind::User,
            });
        }
        self.disconnect_sides(parent, child);
        Ok(())
    }

    // ---- permissions ------------------------------------------------------

    #[instrument(skip(self, permission), err)]
    pub fn add_permission(&mut self, entity: EntityId, permission: Permission) -> Result<()> {
        self.require_ready()?;
        let core = self.core_mut(entity).ok_or(GraphError::NotFound {
            id: entity,
            expected: EntityKind::User,
        })?;
        let key = permission.identity_key();
        if core.permissions.iter().any(|p| p.identity_key() == key) {
            return Err(GraphError::DuplicatePermission {
                entity,
                uri: permission.uri.as_str().to_string(),
                verb: permission.verb,
            });
        }
        core.permissions.push(permission);
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn remove_permission(
        &mut self,
        entity: EntityId,
        uri: &str,
        verb: crate::types::Verb,
        scheme: &str,
    ) -> Result<()> {
        self.require_ready()?;
        let core = self.core_mut(entity).ok_or(GraphError::NotFound {
            id: entity,
            expected: EntityKind::User,
        })?;
        let before = core.permissions.len();
        let uri_lower = uri.to_ascii_lowercase();
        core.permissions
            .retain(|p| p.identity_key() != (uri_lower.clone(), verb, scheme.to_string()));
        if core.permissions.len() == before {
            return Err(GraphError::InvalidArgument(format!(
                "no such permission {uri}/{verb:?} on entity {entity}"
            )));
        }
        Ok(())
    }

    /// Ancestors reachable from `entity` via `parents`, BFS with a
    /// visited-set to collapse diamond inheritance. Does not include
    /// `entity` itself.
    #[must_use]
    pub fn ancestors(&self, entity: EntityId) -> Vec<EntityId> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(entity);
        visited.insert(entity);
        while let Some(current) = queue.pop_front() {
            if let Some(core) = self.core(current) {
                for parent in &core.parents {
                    if visited.insert(*parent) {
                        order.push(*parent);
                        queue.push_back(*parent);
                    }
                }
            }
        }
        order
    }

    /// Descendants reachable from `entity` via `children` (used by cache
    /// invalidation cascades). Does not include `entity` itself.
    #[must_use]
    pub fn descendants(&self, entity: EntityId) -> Vec<EntityId> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(entity);
        visited.insert(entity);
        while let Some(current) = queue.pop_front() {
            if let Some(core) = self.core(current) {
                for child in &core.children {
                    if visited.insert(*child) {
                        order.push(*child);
                        queue.push_back(*child);
                    }
                }
            }
        }
        order
    }

    #[must_use]
    pub fn permissions_of(&self, entity: EntityId) -> &[Permission] {
        self.core(entity).map(|c| c.permissions.as_slice()).unwrap_or(&[])
    }

    /// Verifies invariant 1 (edge symmetry) across the whole graph; used by
    /// property tests, not on any hot path.
    #[must_use]
    pub fn edges_are_symmetric(&self) -> bool {
        let all_ids: Vec<EntityId> = self
            .users
            .keys()
            .chain(self.groups.keys())
            .chain(self.roles.keys())
            .copied()
            .collect();
        for id in &all_ids {
            let core = self.core(*id).unwrap();
            for child in &core.children {
                let Some(child_core) = self.core(*child) else {
                    return false;
                };
                if !child_core.parents.contains(id) {
                    return false;
                }
            }
            for parent in &core.parents {
                let Some(parent_core) = self.core(*parent) else {
                    return false;
                };
                if !parent_core.children.contains(id) {
                    return false;
                }
            }
        }
        true
    }

    /// Verifies invariant 2 (group-containment acyclicity); used by property
    /// tests.
    #[must_use]
    pub fn group_graph_is_acyclic(&self) -> bool {
        for &id in self.groups.keys() {
            let mut visited = std::collections::HashSet::new();
            let mut queue = VecDeque::new();
            if let Some(core) = self.groups.get(&id) {
                for child in &core.core.children {
                    queue.push_back(*child);
                }
            }
            while let Some(current) = queue.pop_front() {
                if current == id {
                    return false;
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(core) = self.groups.get(&current) {
                    for child in &core.core.children {
                        queue.push_back(*child);
                    }
                }
            }
        }
        true
    }
}

impl EntityCore {
    fn clone_neighbors(&self) -> EntityCore {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_graph() -> EntityGraph {
        let mut g = EntityGraph::new();
        g.mark_ready();
        g
    }

    #[test]
    fn create_and_lookup_user() {
        let mut g = ready_graph();
        let id = g.create_user("alice".into(), Some("Alice@Example.com".into()), None, None).unwrap();
        let user = g.get_user(id).unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn duplicate_email_rejected() {
        let mut g = ready_graph();
        g.create_user("a".into(), Some("x@y.com".into()), None, None).unwrap();
        let err = g.create_user("b".into(), Some("X@Y.com".into()), None, None).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyExists { .. }));
    }

    #[test]
    fn link_maintains_symmetry() {
        let mut g = ready_graph();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let grp = g.create_group("g".into(), None).unwrap();
        g.link_parent_child(grp, u).unwrap();
        assert!(g.edges_are_symmetric());
        assert!(g.get_user(u).unwrap().core.parents.contains(&grp));
        assert!(g.get_group(grp).unwrap().core.children.contains(&u));
    }

    #[test]
    fn group_cycle_is_rejected() {
        let mut g = ready_graph();
        let g1 = g.create_group("g1".into(), None).unwrap();
        let g2 = g.create_group("g2".into(), None).unwrap();
        let g3 = g.create_group("g3".into(), None).unwrap();
        g.link_parent_child(g1, g2).unwrap();
        g.link_parent_child(g2, g3).unwrap();
        let err = g.link_parent_child(g3, g1).unwrap_err();
        assert!(matches!(err, GraphError::WouldCreateCycle { .. }));
        assert!(g.group_graph_is_acyclic());
    }

    #[test]
    fn delete_removes_incident_edges_first() {
        let mut g = ready_graph();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let grp = g.create_group("g".into(), None).unwrap();
        g.link_parent_child(grp, u).unwrap();
        g.delete(u).unwrap();
        assert!(g.get_user(u).is_err());
        assert!(!g.get_group(grp).unwrap().core.children.contains(&u));
    }

    #[test]
    fn update_user_reindexes_email() {
        let mut g = ready_graph();
        let id = g.create_user("a".into(), Some("a@x.com".into()), None, None).unwrap();
        g.update_user(id, None, Some("b@x.com".into()), None, None, None).unwrap();
        assert_eq!(g.get_user(id).unwrap().email.as_deref(), Some("b@x.com"));
        assert!(g.create_user("c".into(), Some("a@x.com".into()), None, None).is_ok());
    }

    #[test]
    fn update_user_rejects_email_owned_by_another_user() {
        let mut g = ready_graph();
        g.create_user("a".into(), Some("a@x.com".into()), None, None).unwrap();
        let b = g.create_user("b".into(), Some("b@x.com".into()), None, None).unwrap();
        let err = g.update_user(b, None, Some("A@X.com".into()), None, None, None).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyExists { .. }));
    }

    #[test]
    fn mutation_refused_before_ready() {
        let mut g = EntityGraph::new();
        let err = g.create_group("g".into(), None).unwrap_err();
        assert!(matches!(err, GraphError::NotReady));
    }
}
