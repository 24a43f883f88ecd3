//! Property tests over the entity graph and evaluator: edge symmetry,
//! group-containment acyclicity, evaluator soundness/stability under
//! mutation, and cache invalidation correctness.

use std::time::Duration;

use proptest::prelude::*;
use warden::entities::graph::EntityGraph;
use warden::evaluator::PermissionEvaluator;
use warden::evaluator::conflict::ConflictStrategy;
use warden::{Permission, UriPattern, Verb};

fn ready_graph() -> EntityGraph {
    let mut g = EntityGraph::new();
    g.mark_ready();
    g
}

fn evaluator() -> PermissionEvaluator {
    PermissionEvaluator::new(ConflictStrategy::DenyOverrides, Duration::from_secs(300))
}

#[derive(Clone, Debug)]
enum GraphOp {
    NewGroup,
    NewUser,
    Link(usize, usize),
    Unlink(usize, usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<GraphOp>> {
    prop::collection::vec(
        prop_oneof![
            Just(GraphOp::NewGroup),
            Just(GraphOp::NewUser),
            (0usize..8, 0usize..8).prop_map(|(a, b)| GraphOp::Link(a, b)),
            (0usize..8, 0usize..8).prop_map(|(a, b)| GraphOp::Unlink(a, b)),
        ],
        1..60,
    )
}

proptest! {
    /// Invariant 1: every edge is symmetric (appears in both the parent's
    /// `children` and the child's `parents`) no matter what sequence of
    /// creates/links/unlinks produced the graph.
    #[test]
    fn edges_stay_symmetric_under_random_mutation(ops in arb_ops()) {
        let mut g = ready_graph();
        let mut groups = Vec::new();
        let mut users = Vec::new();

        for op in ops {
            match op {
                GraphOp::NewGroup => {
                    groups.push(g.create_group(format!("g{}", groups.len()), None).unwrap());
                }
                GraphOp::NewUser => {
                    users.push(g.create_user(format!("u{}", users.len()), None, None, None).unwrap());
                }
                GraphOp::Link(a, b) => {
                    if let (Some(&group), Some(&user)) = (groups.get(a % groups.len().max(1)), users.get(b % users.len().max(1))) {
                        let _ = g.link_parent_child(group, user);
                    }
                }
                GraphOp::Unlink(a, b) => {
                    if let (Some(&group), Some(&user)) = (groups.get(a % groups.len().max(1)), users.get(b % users.len().max(1))) {
                        let _ = g.unlink(group, user);
                    }
                }
            }
        }

        prop_assert!(g.edges_are_symmetric());
    }

    /// Invariant 2: group-containment is always acyclic — `link_parent_child`
    /// must reject any edge that would close a loop.
    #[test]
    fn group_links_never_introduce_a_cycle(pairs in prop::collection::vec((0usize..6, 0usize..6), 1..40)) {
        let mut g = ready_graph();
        let groups: Vec<_> = (0..6).map(|i| g.create_group(format!("g{i}"), None).unwrap()).collect();
        for (a, b) in pairs {
            let _ = g.link_parent_child(groups[a], groups[b]);
        }
        prop_assert!(g.group_graph_is_acyclic());
    }
}

#[test]
fn evaluator_soundness_grant_without_deny_is_allowed() {
    let mut g = ready_graph();
    let u = g.create_user("u".into(), None, None, None).unwrap();
    let pid = g.allocate_permission_id();
    g.add_permission(
        u,
        Permission::new(pid, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
    )
    .unwrap();

    let ev = evaluator();
    assert!(ev.check(&g, u, "/x", Verb::Get));
}

#[test]
fn evaluator_soundness_no_permission_is_not_allowed() {
    let g = ready_graph();
    let mut g = g;
    let u = g.create_user("u".into(), None, None, None).unwrap();
    let ev = evaluator();
    assert!(!ev.check(&g, u, "/anything", Verb::Get));
}

#[test]
fn repeated_evaluation_without_mutation_is_stable() {
    let mut g = ready_graph();
    let u = g.create_user("u".into(), None, None, None).unwrap();
    let pid = g.allocate_permission_id();
    g.add_permission(
        u,
        Permission::new(pid, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
    )
    .unwrap();

    let ev = evaluator();
    let first = ev.evaluate(&g, u, "/x", Verb::Get, None);
    for _ in 0..10 {
        let again = ev.evaluate(&g, u, "/x", Verb::Get, None);
        assert_eq!(first.allowed, again.allowed);
    }
}

#[test]
fn invalidating_an_entity_forces_its_descendants_to_recompute() {
    let mut g = ready_graph();
    let grp = g.create_group("g".into(), None).unwrap();
    let u = g.create_user("u".into(), None, None, None).unwrap();
    g.link_parent_child(grp, u).unwrap();

    let ev = evaluator();
    let before = ev.evaluate(&g, u, "/x", Verb::Get, None);
    assert!(!before.allowed);

    let pid = g.allocate_permission_id();
    g.add_permission(
        grp,
        Permission::new(pid, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
    )
    .unwrap();
    // without invalidation the stale "not allowed" decision would still be
    // served from cache for `u` since `grp` is an ancestor, not `u` itself.
    ev.invalidate(&[grp, u]);

    let after = ev.evaluate(&g, u, "/x", Verb::Get, None);
    assert!(after.allowed);
    assert!(!after.from_cache);
}
