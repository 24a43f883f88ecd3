//! Benchmarks for the permission evaluator: ancestor-chain fan-out and the
//! effect of the decision cache on repeated checks.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use warden::entities::entity::Permission;
use warden::entities::graph::EntityGraph;
use warden::evaluator::PermissionEvaluator;
use warden::evaluator::conflict::ConflictStrategy;
use warden::types::{EntityId, UriPattern, Verb};

/// Build a user nested under `depth` groups, each granted a distinct URI,
/// so ancestor-chain walks scale with `depth`.
fn build_nested_chain(depth: usize) -> (EntityGraph, EntityId) {
    let mut g = EntityGraph::new();
    g.mark_ready();

    let mut parent = None;
    let mut top = None;
    for i in 0..depth {
        let group = g.create_group(format!("g{i}"), None).unwrap();
        if top.is_none() {
            top = Some(group);
        }
        if let Some(p) = parent {
            g.link_parent_child(p, group).unwrap();
        }
        let pid = g.allocate_permission_id();
        g.add_permission(
            group,
            Permission::new(pid, UriPattern::parse(format!("/r/{i}")), Verb::Get, true, false, "api").unwrap(),
        )
        .unwrap();
        parent = Some(group);
    }

    let user = g.create_user("leaf".into(), None, None, None).unwrap();
    if let Some(bottom) = parent {
        g.link_parent_child(bottom, user).unwrap();
    }

    (g, user)
}

fn bench_cold_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator_cold");

    for depth in [1, 8, 32, 128] {
        let (graph, user) = build_nested_chain(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter_batched(
                || PermissionEvaluator::new(ConflictStrategy::DenyOverrides, Duration::from_secs(300)),
                |evaluator| evaluator.check(&graph, user, "/r/0", Verb::Get),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_cached_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator_cached");

    for depth in [1, 8, 32, 128] {
        let (graph, user) = build_nested_chain(depth);
        let evaluator = PermissionEvaluator::new(ConflictStrategy::DenyOverrides, Duration::from_secs(300));
        evaluator.check(&graph, user, "/r/0", Verb::Get);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| evaluator.check(&graph, user, "/r/0", Verb::Get));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cold_evaluation, bench_cached_evaluation);
criterion_main!(benches);
