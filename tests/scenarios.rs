//! End-to-end scenarios driven through the command dispatcher, exercising
//! the full create -> link -> grant -> check -> mutate -> re-check path a
//! real caller would take, not just the evaluator in isolation.

use std::time::Duration;

use warden::commands::command::{Command, CommandOutcome, EntityAttrs};
use warden::commands::dispatcher::Dispatcher;
use warden::entities::entity::Permission;
use warden::entities::graph::EntityGraph;
use warden::evaluator::PermissionEvaluator;
use warden::evaluator::conflict::ConflictStrategy;
use warden::types::{EntityId, UriPattern, Verb};

fn spawn_dispatcher(
    strategy: ConflictStrategy,
) -> warden::commands::dispatcher::DispatcherHandle {
    let mut graph = EntityGraph::new();
    graph.mark_ready();
    let evaluator = PermissionEvaluator::new(strategy, Duration::from_secs(300));
    let (handle, dispatcher) = Dispatcher::new(64, graph, evaluator, None);
    dispatcher.spawn();
    handle
}

fn entity_id(outcome: CommandOutcome) -> EntityId {
    match outcome {
        CommandOutcome::EntityId(id) => id,
        other => panic!("expected an entity id, got {other:?}"),
    }
}

async fn check(
    handle: &warden::commands::dispatcher::DispatcherHandle,
    entity_id: EntityId,
    uri: &str,
    verb: Verb,
) -> bool {
    let outcome = handle
        .submit(Command::CheckPermission {
            entity_id,
            uri: uri.to_string(),
            verb,
            context: None,
        })
        .await
        .unwrap()
        .unwrap();
    match outcome {
        CommandOutcome::Decision(d) => d.allowed,
        other => panic!("expected a decision, got {other:?}"),
    }
}

/// Scenario: a user in a group inherits the group's grant through a glob
/// pattern, scoped to the granted verb only.
#[tokio::test]
async fn group_grant_is_inherited_by_its_members() {
    let handle = spawn_dispatcher(ConflictStrategy::DenyOverrides);

    let group = entity_id(
        handle
            .submit(Command::CreateGroup {
                attrs: EntityAttrs {
                    name: Some("engineering".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap()
            .unwrap(),
    );
    let user = entity_id(
        handle
            .submit(Command::CreateUser {
                attrs: EntityAttrs {
                    name: Some("bob".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap()
            .unwrap(),
    );
    handle
        .submit(Command::AddUserToGroup { user_id: user, group_id: group })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: group,
            permission: Permission::new(0, UriPattern::parse("/api/users/*"), Verb::Get, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(check(&handle, user, "/api/users/7", Verb::Get).await);
    assert!(!check(&handle, user, "/api/users/7", Verb::Post).await);
}

/// Scenario: a direct deny on the user overrides an inherited group grant
/// under `DenyOverrides`, but loses under `GrantOverrides`.
#[tokio::test]
async fn direct_deny_beats_inherited_grant_under_deny_overrides() {
    let deny_first = spawn_dispatcher(ConflictStrategy::DenyOverrides);

    let group = entity_id(
        deny_first
            .submit(Command::CreateGroup { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    let user = entity_id(
        deny_first
            .submit(Command::CreateUser { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    deny_first
        .submit(Command::AddUserToGroup { user_id: user, group_id: group })
        .await
        .unwrap()
        .unwrap();
    deny_first
        .submit(Command::AddPermissionToEntity {
            entity_id: group,
            permission: Permission::new(0, UriPattern::parse("/api/users/42"), Verb::Get, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();
    deny_first
        .submit(Command::AddPermissionToEntity {
            entity_id: user,
            permission: Permission::new(0, UriPattern::parse("/api/users/42"), Verb::Get, false, true, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(!check(&deny_first, user, "/api/users/42", Verb::Get).await);
}

/// Scenario: a role grant reaches a user through role assignment just like
/// group membership, and removing the assignment revokes it.
#[tokio::test]
async fn role_grant_is_revoked_when_the_assignment_is_removed() {
    let handle = spawn_dispatcher(ConflictStrategy::DenyOverrides);

    let role = entity_id(
        handle
            .submit(Command::CreateRole {
                attrs: EntityAttrs { name: Some("admin".into()), ..Default::default() },
            })
            .await
            .unwrap()
            .unwrap(),
    );
    let user = entity_id(
        handle
            .submit(Command::CreateUser { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    handle
        .submit(Command::AssignUserToRole { user_id: user, role_id: role })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: role,
            permission: Permission::new(0, UriPattern::parse("/admin/*"), Verb::Delete, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(check(&handle, user, "/admin/purge", Verb::Delete).await);

    handle
        .submit(Command::UnassignUserFromRole { user_id: user, role_id: role })
        .await
        .unwrap()
        .unwrap();

    assert!(!check(&handle, user, "/admin/purge", Verb::Delete).await);
}

/// Scenario: a nested group (group-of-groups) propagates its grant down to
/// users in the innermost group.
#[tokio::test]
async fn grant_propagates_through_nested_groups() {
    let handle = spawn_dispatcher(ConflictStrategy::DenyOverrides);

    let parent = entity_id(
        handle
            .submit(Command::CreateGroup {
                attrs: EntityAttrs { name: Some("org".into()), ..Default::default() },
            })
            .await
            .unwrap()
            .unwrap(),
    );
    let child = entity_id(
        handle
            .submit(Command::CreateGroup {
                attrs: EntityAttrs { name: Some("team".into()), ..Default::default() },
            })
            .await
            .unwrap()
            .unwrap(),
    );
    let user = entity_id(
        handle
            .submit(Command::CreateUser { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );

    handle
        .submit(Command::AddGroupToGroup { parent_id: parent, child_id: child })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddUserToGroup { user_id: user, group_id: child })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: parent,
            permission: Permission::new(0, UriPattern::parse("/org/*"), Verb::Get, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(check(&handle, user, "/org/reports", Verb::Get).await);
}

/// Scenario: deleting a group removes its grant from every member
/// immediately (cache invalidation cascades through the dispatcher).
#[tokio::test]
async fn deleting_a_group_revokes_its_members_inherited_grant() {
    let handle = spawn_dispatcher(ConflictStrategy::DenyOverrides);

    let group = entity_id(
        handle
            .submit(Command::CreateGroup { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    let user = entity_id(
        handle
            .submit(Command::CreateUser { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    handle
        .submit(Command::AddUserToGroup { user_id: user, group_id: group })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: group,
            permission: Permission::new(0, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(check(&handle, user, "/x", Verb::Get).await);

    handle.submit(Command::DeleteGroup { id: group }).await.unwrap().unwrap();

    let outcome = handle
        .submit(Command::CheckPermission {
            entity_id: user,
            uri: "/x".into(),
            verb: Verb::Get,
            context: None,
        })
        .await
        .unwrap()
        .unwrap();
    match outcome {
        CommandOutcome::Decision(d) => assert!(!d.allowed),
        other => panic!("expected a decision, got {other:?}"),
    }
}

/// Scenario: the more specific of two matching patterns wins under
/// `MostSpecific`, regardless of grant/deny or recency.
#[tokio::test]
async fn most_specific_pattern_wins_under_most_specific_strategy() {
    let handle = spawn_dispatcher(ConflictStrategy::MostSpecific);

    let user = entity_id(
        handle
            .submit(Command::CreateUser { attrs: EntityAttrs::default() })
            .await
            .unwrap()
            .unwrap(),
    );
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: user,
            permission: Permission::new(0, UriPattern::parse("/api/*"), Verb::Get, true, false, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();
    handle
        .submit(Command::AddPermissionToEntity {
            entity_id: user,
            permission: Permission::new(0, UriPattern::parse("/api/users/42"), Verb::Get, false, true, "api").unwrap(),
        })
        .await
        .unwrap()
        .unwrap();

    assert!(!check(&handle, user, "/api/users/42", Verb::Get).await);
    assert!(check(&handle, user, "/api/other", Verb::Get).await);
}
