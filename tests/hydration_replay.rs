//! Property 6: a snapshot saved to a persistence port and reloaded through
//! `hydrate()` reproduces an equivalent graph — same entities, same
//! symmetric edges, same permissions per entity.

use warden::entities::entity::{Entity, Permission};
use warden::entities::graph::EntityGraph;
use warden::entities::hydration::hydrate;
use warden::persistence::port::PersistencePort;
use warden::persistence::sqlite::InMemoryPersistencePort;
use warden::types::{EntityId, Verb, UriPattern};

async fn build_source_graph(port: &InMemoryPersistencePort) -> (EntityGraph, EntityId, EntityId, EntityId) {
    let mut g = EntityGraph::new();
    g.mark_ready();

    let admins = g.create_group("admins".into(), Some("administrators".into())).unwrap();
    let alice = g.create_user("alice".into(), Some("alice@example.com".into()), None, None).unwrap();
    let editor = g.create_role("editor".into(), None).unwrap();

    g.link_parent_child(admins, alice).unwrap();
    g.link_parent_child(editor, alice).unwrap();

    let pid1 = g.allocate_permission_id();
    g.add_permission(
        admins,
        Permission::new(pid1, UriPattern::parse("/admin/*"), Verb::Delete, true, false, "api").unwrap(),
    )
    .unwrap();
    let pid2 = g.allocate_permission_id();
    g.add_permission(
        editor,
        Permission::new(pid2, UriPattern::parse("/articles/{id}"), Verb::Put, true, false, "api").unwrap(),
    )
    .unwrap();

    let mut tx = port.begin_transaction().await.unwrap();
    for entity in [
        Entity::Group(g.get_group(admins).unwrap().clone()),
        Entity::User(g.get_user(alice).unwrap().clone()),
        Entity::Role(g.get_role(editor).unwrap().clone()),
    ] {
        tx.save_entity(&entity).await.unwrap();
    }
    tx.save_edge(admins, alice, warden::types::EdgeKind::UserToGroup).await.unwrap();
    tx.save_edge(editor, alice, warden::types::EdgeKind::UserToRole).await.unwrap();
    for permission in g.permissions_of(admins) {
        tx.save_permission(admins, permission).await.unwrap();
    }
    for permission in g.permissions_of(editor) {
        tx.save_permission(editor, permission).await.unwrap();
    }
    tx.commit().await.unwrap();

    (g, admins, alice, editor)
}

#[tokio::test]
async fn reloaded_graph_matches_the_source_graph() {
    let port = InMemoryPersistencePort::new();
    let (source, admins, alice, editor) = build_source_graph(&port).await;

    let raw = port.load_snapshot().await.unwrap();
    let mut reloaded = EntityGraph::new();
    hydrate(&mut reloaded, raw).unwrap();

    assert!(reloaded.is_ready());
    assert!(reloaded.edges_are_symmetric());
    assert!(reloaded.group_graph_is_acyclic());

    for id in [admins, alice, editor] {
        let before = source.get_entity(id);
        let after = reloaded.get_entity(id);
        assert_eq!(before.is_some(), after.is_some());
    }

    assert_eq!(source.permissions_of(admins).len(), reloaded.permissions_of(admins).len());
    assert_eq!(source.permissions_of(editor).len(), reloaded.permissions_of(editor).len());

    let mut source_ancestors = source.ancestors(alice);
    let mut reloaded_ancestors = reloaded.ancestors(alice);
    source_ancestors.sort();
    reloaded_ancestors.sort();
    assert_eq!(source_ancestors, reloaded_ancestors);
}

#[tokio::test]
async fn empty_port_hydrates_to_an_empty_ready_graph() {
    let port = InMemoryPersistencePort::new();
    let raw = port.load_snapshot().await.unwrap();
    let mut g = EntityGraph::new();
    hydrate(&mut g, raw).unwrap();
    assert!(g.is_ready());
    assert!(g.edges_are_symmetric());
}
