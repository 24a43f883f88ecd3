//! Reporting queries built on [`crate::evaluator::PermissionEvaluator::evaluate`]
//! (§4.B "Reporting queries"): effective-permissions list, permission
//! matrix, conflict report, gap report, and inheritance trace.

use serde::Serialize;

use crate::entities::graph::EntityGraph;
use crate::evaluator::{Decision, PermissionEvaluator};
use crate::types::{EntityId, Verb};

/// One row of an effective-permissions listing: a `(uri, verb)` the entity
/// can reach, together with the decision that produced it.
#[derive(Clone, Debug, Serialize)]
pub struct EffectivePermission {
    pub uri: String,
    pub verb: Verb,
    pub allowed: bool,
    pub sources: Vec<EntityId>,
}

/// Compute the effective-permissions list for `entity`: one row per distinct
/// `(uri, verb)` reachable through its own and inherited permissions.
pub fn effective_permissions(
    evaluator: &PermissionEvaluator,
    graph: &EntityGraph,
    entity: EntityId,
) -> Vec<EffectivePermission> {
    let mut seen = std::collections::HashSet::new();
    let mut rows = Vec::new();
    for candidate_entity in std::iter::once(entity).chain(graph.ancestors(entity)) {
        for permission in graph.permissions_of(candidate_entity) {
            let key = (permission.uri.as_str().to_ascii_lowercase(), permission.verb);
            if !seen.insert(key) {
                continue;
            }
            let decision = evaluator.evaluate(graph, entity, permission.uri.as_str(), permission.verb, None);
            rows.push(EffectivePermission {
                uri: permission.uri.as_str().to_string(),
                verb: permission.verb,
                allowed: decision.allowed,
                sources: decision.sources,
            });
        }
    }
    rows
}

/// A single cell of a permission matrix: whether `entity` may `verb` `uri`.
#[derive(Clone, Debug, Serialize)]
pub struct MatrixCell {
    pub entity: EntityId,
    pub uri: String,
    pub verb: Verb,
    pub allowed: bool,
}

/// Build the `entities × resources × verbs` permission matrix named in
/// §4.B. `resources` and `verbs` are the caller-supplied axes; entities
/// come from `entities`.
pub fn permission_matrix(
    evaluator: &PermissionEvaluator,
    graph: &EntityGraph,
    entities: &[EntityId],
    resources: &[String],
    verbs: &[Verb],
) -> Vec<MatrixCell> {
    let mut cells = Vec::with_capacity(entities.len() * resources.len() * verbs.len());
    for &entity in entities {
        for uri in resources {
            for &verb in verbs {
                let decision = evaluator.evaluate(graph, entity, uri, verb, None);
                cells.push(MatrixCell {
                    entity,
                    uri: uri.clone(),
                    verb,
                    allowed: decision.allowed,
                });
            }
        }
    }
    cells
}

/// A conflict report entry: a `(uri, verb)` where more than one candidate
/// permission disagreed on grant/deny before conflict resolution collapsed
/// them to the single effective `Decision`.
#[derive(Clone, Debug, Serialize)]
pub struct ConflictReportEntry {
    pub uri: String,
    pub verb: Verb,
    pub grant_sources: Vec<EntityId>,
    pub deny_sources: Vec<EntityId>,
}

/// Report every `(uri, verb)` reachable by `entity` where at least one
/// ancestor grants and at least one (possibly the same) denies.
pub fn conflict_report(graph: &EntityGraph, entity: EntityId) -> Vec<ConflictReportEntry> {
    let mut by_key: std::collections::HashMap<(String, Verb), (Vec<EntityId>, Vec<EntityId>)> =
        std::collections::HashMap::new();
    for candidate_entity in std::iter::once(entity).chain(graph.ancestors(entity)) {
        for permission in graph.permissions_of(candidate_entity) {
            let key = (permission.uri.as_str().to_ascii_lowercase(), permission.verb);
            let entry = by_key.entry(key).or_default();
            if permission.grant {
                entry.0.push(candidate_entity);
            }
            if permission.deny {
                entry.1.push(candidate_entity);
            }
        }
    }
    by_key
        .into_iter()
        .filter(|(_, (grants, denies))| !grants.is_empty() && !denies.is_empty())
        .map(|((uri, verb), (grant_sources, deny_sources))| ConflictReportEntry {
            uri,
            verb,
            grant_sources,
            deny_sources,
        })
        .collect()
}

/// Report which of `required` `(uri, verb)` pairs `entity` cannot reach.
pub fn gap_report(
    evaluator: &PermissionEvaluator,
    graph: &EntityGraph,
    entity: EntityId,
    required: &[(String, Verb)],
) -> Vec<(String, Verb)> {
    required
        .iter()
        .filter(|(uri, verb)| !evaluator.evaluate(graph, entity, uri, *verb, None).allowed)
        .cloned()
        .collect()
}

/// The ordered chain of ancestors contributing to a decision, as returned
/// inline on [`Decision::sources`]; exposed here as a named query for
/// callers that only want the trace without re-running `evaluate`.
#[must_use]
pub fn inheritance_trace(decision: &Decision) -> &[EntityId] {
    &decision.sources
}
