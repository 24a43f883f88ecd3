//! The permission evaluation engine: component B.
//!
//! Walks the entity graph to compute effective permissions under
//! inheritance, matches URI patterns, and resolves grant/deny conflicts.
//! See the module-level docs on [`PermissionEvaluator::evaluate`] for the
//! resolution algorithm (§4.B).

pub mod cache;
pub mod conflict;
pub mod matcher;
pub mod reporting;

use std::time::Instant;

use chrono::Utc;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::entities::entity::{Permission, PermissionKind};
use crate::entities::graph::EntityGraph;
use crate::errors::ErrorKind;
use crate::evaluator::cache::DecisionCache;
use crate::evaluator::conflict::ConflictStrategy;
use crate::types::{EntityId, Verb};

#[derive(Debug, Error, Diagnostic)]
pub enum EvaluatorError {
    #[error("entity not found: {0}")]
    #[diagnostic(code(warden::evaluator::not_found))]
    EntityNotFound(EntityId),
}

impl EvaluatorError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvaluatorError::EntityNotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// The result of an `evaluate` call: whether the action is allowed, why, the
/// ordered source trace, the applied permissions, timing, and whether the
/// answer came from cache.
#[derive(Clone, Debug, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    /// Ordered chain of ancestors (closest first) contributing permissions
    /// to this decision.
    pub sources: Vec<EntityId>,
    pub applied_permissions: Vec<u64>,
    #[serde(skip)]
    pub evaluation_time: std::time::Duration,
    pub from_cache: bool,
}

/// Stateful evaluator: owns the conflict-resolution strategy and the
/// decision cache. Graph access is borrowed per call — the evaluator itself
/// holds no entity data, keeping the dispatcher the sole owner of the
/// graph's structural state.
pub struct PermissionEvaluator {
    strategy: ConflictStrategy,
    cache: DecisionCache,
}

impl PermissionEvaluator {
    #[must_use]
    pub fn new(strategy: ConflictStrategy, cache_ttl: std::time::Duration) -> Self {
        Self {
            strategy,
            cache: DecisionCache::new(cache_ttl),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Replace the process-wide conflict resolution strategy. Changing it
    /// invalidates nothing by itself — callers that change strategy should
    /// also clear the cache if they need immediate effect, since stale
    /// entries were computed under the old strategy.
    pub fn set_strategy(&mut self, strategy: ConflictStrategy) {
        self.strategy = strategy;
        self.cache.clear();
    }

    pub fn invalidate(&self, affected: &[EntityId]) {
        self.cache.invalidate_entities(affected);
    }

    /// `evaluate(entityId, uri, verb, context?) → Decision`, per §4.B:
    ///
    /// 1. Collect candidate permissions: direct plus, recursively through
    ///    `parents`, all ancestor permissions (BFS with visited-set already
    ///    applied by [`EntityGraph::ancestors`], handling diamond
    ///    inheritance).
    /// 2. Filter to permissions whose `verb` matches and whose `uri` pattern
    ///    matches `uri`.
    /// 3. If `context` was provided, also admit conditional permissions
    ///    whose predicate evaluates true, and temporary permissions whose
    ///    validity window contains now.
    /// 4. Apply conflict resolution to reduce to one effective permission.
    /// 5. `allowed = effective.grant && !effective.deny`.
    #[instrument(skip(self, graph, context), fields(entity = %entity, uri, verb = ?verb))]
    pub fn evaluate(
        &self,
        graph: &EntityGraph,
        entity: EntityId,
        uri: &str,
        verb: Verb,
        context: Option<&serde_json::Value>,
    ) -> Decision {
        let started = Instant::now();

        if let Some(cached) = self.cache.get(entity, uri, verb) {
            return Decision {
                allowed: cached.allowed,
                reason: cached.reason,
                sources: cached.sources,
                applied_permissions: Vec::new(),
                evaluation_time: started.elapsed(),
                from_cache: true,
            };
        }

        let chain: Vec<EntityId> = std::iter::once(entity).chain(graph.ancestors(entity)).collect();

        let mut candidates: Vec<(&Permission, EntityId)> = Vec::new();
        for &who in &chain {
            for permission in graph.permissions_of(who) {
                if permission.verb != verb {
                    continue;
                }
                if !matcher::matches(&permission.uri, uri) {
                    continue;
                }
                match &permission.kind {
                    PermissionKind::Standard => candidates.push((permission, who)),
                    PermissionKind::Conditional { predicate } => {
                        if let Some(ctx) = context {
                            if predicate.evaluate(ctx) {
                                candidates.push((permission, who));
                            }
                        }
                    }
                    PermissionKind::Temporary {
                        valid_from,
                        valid_until,
                    } => {
                        if context.is_some() {
                            let now = Utc::now();
                            if now >= *valid_from && now <= *valid_until {
                                candidates.push((permission, who));
                            }
                        }
                    }
                }
            }
        }

        let refs: Vec<&Permission> = candidates.iter().map(|(p, _)| *p).collect();
        let effective = conflict::resolve(&refs, self.strategy);

        let (allowed, reason, applied_permissions) = match effective {
            Some(p) => (
                p.grant && !p.deny,
                format!(
                    "resolved via {:?}: grant={} deny={}",
                    self.strategy, p.grant, p.deny
                ),
                vec![p.id],
            ),
            None => (false, "no matching permission".to_string(), Vec::new()),
        };

        let sources: Vec<EntityId> = candidates
            .iter()
            .filter(|(p, _)| applied_permissions.contains(&p.id))
            .map(|(_, who)| *who)
            .collect();

        self.cache.insert(
            entity,
            uri,
            verb,
            allowed,
            reason.clone(),
            sources.clone(),
        );

        Decision {
            allowed,
            reason,
            sources,
            applied_permissions,
            evaluation_time: started.elapsed(),
            from_cache: false,
        }
    }

    /// Convenience wrapper matching §8 property 3's `check(e, u, v)` phrasing.
    pub fn check(&self, graph: &EntityGraph, entity: EntityId, uri: &str, verb: Verb) -> bool {
        self.evaluate(graph, entity, uri, verb, None).allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UriPattern;
    use std::time::Duration;

    fn evaluator() -> PermissionEvaluator {
        PermissionEvaluator::new(ConflictStrategy::DenyOverrides, Duration::from_secs(300))
    }

    #[test]
    fn scenario_1_group_grant_inherited_by_member() {
        let mut g = EntityGraph::new();
        g.mark_ready();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let grp = g.create_group("g".into(), None).unwrap();
        g.link_parent_child(grp, u).unwrap();
        let pid = g.allocate_permission_id();
        let perm = Permission::new(pid, UriPattern::parse("/api/users/*"), Verb::Get, true, false, "api").unwrap();
        g.add_permission(grp, perm).unwrap();

        let ev = evaluator();
        assert!(ev.check(&g, u, "/api/users/42", Verb::Get));
        assert!(!ev.check(&g, u, "/api/users/42", Verb::Post));
    }

    #[test]
    fn scenario_2_deny_and_grant_overrides_strategies() {
        let mut g = EntityGraph::new();
        g.mark_ready();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let grp = g.create_group("g".into(), None).unwrap();
        g.link_parent_child(grp, u).unwrap();
        let pid1 = g.allocate_permission_id();
        g.add_permission(
            grp,
            Permission::new(pid1, UriPattern::parse("/api/users/*"), Verb::Get, true, false, "api").unwrap(),
        )
        .unwrap();
        let pid2 = g.allocate_permission_id();
        g.add_permission(
            u,
            Permission::new(pid2, UriPattern::parse("/api/users/42"), Verb::Get, false, true, "api").unwrap(),
        )
        .unwrap();

        let deny_first = PermissionEvaluator::new(ConflictStrategy::DenyOverrides, Duration::from_secs(300));
        assert!(!deny_first.check(&g, u, "/api/users/42", Verb::Get));

        let grant_first = PermissionEvaluator::new(ConflictStrategy::GrantOverrides, Duration::from_secs(300));
        assert!(grant_first.check(&g, u, "/api/users/42", Verb::Get));
    }

    #[test]
    fn scenario_4_role_permission_traced_as_source() {
        let mut g = EntityGraph::new();
        g.mark_ready();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let role = g.create_role("admin".into(), None).unwrap();
        g.link_parent_child(role, u).unwrap();
        let pid = g.allocate_permission_id();
        g.add_permission(
            role,
            Permission::new(pid, UriPattern::parse("/admin/*"), Verb::Delete, true, false, "api").unwrap(),
        )
        .unwrap();

        let ev = evaluator();
        let decision = ev.evaluate(&g, u, "/admin/purge", Verb::Delete, None);
        assert!(decision.allowed);
        assert!(decision.sources.contains(&role));
    }

    #[test]
    fn evaluator_stability_between_mutations() {
        let mut g = EntityGraph::new();
        g.mark_ready();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let pid = g.allocate_permission_id();
        g.add_permission(
            u,
            Permission::new(pid, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
        )
        .unwrap();

        let ev = evaluator();
        let first = ev.evaluate(&g, u, "/x", Verb::Get, None);
        let second = ev.evaluate(&g, u, "/x", Verb::Get, None);
        assert_eq!(first.allowed, second.allowed);
        assert!(second.from_cache);
    }

    #[test]
    fn cache_invalidation_forces_recompute() {
        let mut g = EntityGraph::new();
        g.mark_ready();
        let u = g.create_user("u".into(), None, None, None).unwrap();
        let ev = evaluator();
        let before = ev.evaluate(&g, u, "/x", Verb::Get, None);
        assert!(!before.allowed);

        let pid = g.allocate_permission_id();
        g.add_permission(
            u,
            Permission::new(pid, UriPattern::parse("/x"), Verb::Get, true, false, "api").unwrap(),
        )
        .unwrap();
        ev.invalidate(&[u]);

        let after = ev.evaluate(&g, u, "/x", Verb::Get, None);
        assert!(after.allowed);
        assert!(!after.from_cache);
    }
}
