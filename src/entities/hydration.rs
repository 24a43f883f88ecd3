//! Startup hydration: loads the entity graph from a persistence-port
//! snapshot (§3 lifecycle, §4.A "Hydration").
//!
//! Hydration is one-shot and non-incremental. It loads in dependency order
//! — entities, then edges, then permissions — and marks the graph ready
//! only once every record has been applied. Hydration failures are fatal
//! at startup (§7): callers should propagate [`HydrationError`] up to their
//! `main` rather than attempt to run with a partially-loaded graph.

use miette::Diagnostic;
use thiserror::Error;

use crate::entities::entity::{Entity, Permission};
use crate::entities::graph::EntityGraph;
use crate::errors::ErrorKind;
use crate::types::EntityId;

#[derive(Debug, Error, Diagnostic)]
pub enum HydrationError {
    #[error("hydration edge references unknown entity: {0}")]
    #[diagnostic(code(warden::hydration::unknown_entity))]
    UnknownEntity(EntityId),

    #[error("hydration source error: {0}")]
    #[diagnostic(code(warden::hydration::source))]
    Source(String),
}

impl HydrationError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// The raw data a persistence port's `loadSnapshot()` returns: entities,
/// then edges, then permissions, totally ordered by entity id per §6.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub entities: Vec<Entity>,
    pub edges: Vec<(EntityId, EntityId)>,
    pub permissions: Vec<(EntityId, Permission)>,
}

/// Apply `snapshot` to a fresh graph, in dependency order, then mark it
/// ready. `graph` should not have been mutated before this call.
pub fn hydrate(graph: &mut EntityGraph, snapshot: Snapshot) -> Result<(), HydrationError> {
    for entity in snapshot.entities {
        match entity {
            Entity::User(u) => graph.hydrate_user(u),
            Entity::Group(g) => graph.hydrate_group(g),
            Entity::Role(r) => graph.hydrate_role(r),
        }
    }

    for (parent, child) in snapshot.edges {
        if graph.get_entity(parent).is_none() {
            return Err(HydrationError::UnknownEntity(parent));
        }
        if graph.get_entity(child).is_none() {
            return Err(HydrationError::UnknownEntity(child));
        }
        graph.hydrate_edge(parent, child);
    }

    for (entity, permission) in snapshot.permissions {
        if graph.get_entity(entity).is_none() {
            return Err(HydrationError::UnknownEntity(entity));
        }
        graph.hydrate_permission(entity, permission);
    }

    graph.mark_ready();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::entity::{EntityCore, Group, User};
    use crate::types::{UriPattern, Verb};

    #[test]
    fn hydrate_loads_entities_edges_and_permissions_in_order() {
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

        let snapshot = Snapshot {
            entities: vec![user, group],
            edges: vec![(EntityId::new(2), EntityId::new(1))],
            permissions: vec![(EntityId::new(2), perm)],
        };

        let mut graph = EntityGraph::new();
        hydrate(&mut graph, snapshot).unwrap();

        assert!(graph.is_ready());
        assert!(graph.edges_are_symmetric());
        assert_eq!(graph.permissions_of(EntityId::new(2)).len(), 1);
    }

    #[test]
    fn hydrate_rejects_edge_to_unknown_entity() {
        let snapshot = Snapshot {
            entities: vec![],
            edges: vec![(EntityId::new(1), EntityId::new(2))],
            permissions: vec![],
        };
        let mut graph = EntityGraph::new();
        let err = hydrate(&mut graph, snapshot).unwrap_err();
        assert!(matches!(err, HydrationError::UnknownEntity(_)));
    }
}
