//! Conflict resolution strategies (§4.B.ii): reduce a candidate permission
//! set to a single effective permission per `(uri, verb)` key.

use serde::{Deserialize, Serialize};

use crate::entities::entity::Permission;
use crate::evaluator::matcher;

/// Process-wide, configurable conflict resolution strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Default: if any candidate has `deny`, the result is deny.
    DenyOverrides,
    /// If any candidate has `grant`, the result is grant.
    GrantOverrides,
    /// By specificity ordering; ties resolved by `DenyOverrides`.
    MostSpecific,
    /// Highest permission id wins.
    MostRecent,
    /// Uses each permission's explicit priority; ties resolved by
    /// `DenyOverrides`.
    HighestPriority,
}

/// Reduce `candidates` (already filtered to the same `(uri, verb)` query) to
/// a single effective permission under `strategy`. Returns `None` if
/// `candidates` is empty — the caller treats that as "no opinion", i.e. not
/// allowed.
#[must_use]
pub fn resolve<'a>(
    candidates: &[&'a Permission],
    strategy: ConflictStrategy,
) -> Option<&'a Permission> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    match strategy {
        ConflictStrategy::DenyOverrides => deny_overrides(candidates),
        ConflictStrategy::GrantOverrides => grant_overrides(candidates),
        ConflictStrategy::MostSpecific => most_specific(candidates),
        ConflictStrategy::MostRecent => most_recent(candidates),
        ConflictStrategy::HighestPriority => highest_priority(candidates),
    }
}

fn deny_overrides<'a>(candidates: &[&'a Permission]) -> Option<&'a Permission> {
    candidates
        .iter()
        .find(|p| p.deny)
        .or_else(|| candidates.iter().find(|p| p.grant))
        .copied()
        .or(candidates.first().copied())
}

fn grant_overrides<'a>(candidates: &[&'a Permission]) -> Option<&'a Permission> {
    candidates
        .iter()
        .find(|p| p.grant)
        .or_else(|| candidates.iter().find(|p| p.deny))
        .copied()
        .or(candidates.first().copied())
}

fn most_specific<'a>(candidates: &[&'a Permission]) -> Option<&'a Permission> {
    let max_specificity = candidates
        .iter()
        .map(|p| matcher::specificity(&p.uri))
        .max()?;
    let tied: Vec<&&Permission> = candidates
        .iter()
        .filter(|p| matcher::specificity(&p.uri) == max_specificity)
        .collect();
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    let owned: Vec<&Permission> = tied.into_iter().copied().collect();
    deny_overrides(&owned)
}

fn most_recent<'a>(candidates: &[&'a Permission]) -> Option<&'a Permission> {
    candidates.iter().max_by_key(|p| p.id).copied()
}

fn highest_priority<'a>(candidates: &[&'a Permission]) -> Option<&'a Permission> {
    let max_priority = candidates.iter().map(|p| p.priority).max()?;
    let tied: Vec<&Permission> = candidates
        .iter()
        .filter(|p| p.priority == max_priority)
        .copied()
        .collect();
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    deny_overrides(&tied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UriPattern, Verb};

    fn perm(id: u64, uri: &str, grant: bool, deny: bool, priority: i32) -> Permission {
        Permission::new(id, UriPattern::parse(uri), Verb::Get, grant, deny, "api")
            .unwrap()
            .with_priority(priority)
    }

    #[test]
    fn deny_overrides_wins_over_grant() {
        let a = perm(1, "/x", true, false, 0);
        let b = perm(2, "/x", false, true, 0);
        let resolved = resolve(&[&a, &b], ConflictStrategy::DenyOverrides).unwrap();
        assert!(resolved.deny);
    }

    #[test]
    fn grant_overrides_wins_over_deny() {
        let a = perm(1, "/x", true, false, 0);
        let b = perm(2, "/x", false, true, 0);
        let resolved = resolve(&[&a, &b], ConflictStrategy::GrantOverrides).unwrap();
        assert!(resolved.grant);
    }

    #[test]
    fn most_recent_picks_highest_id() {
        let a = perm(1, "/x", true, false, 0);
        let b = perm(5, "/x", false, true, 0);
        let resolved = resolve(&[&a, &b], ConflictStrategy::MostRecent).unwrap();
        assert_eq!(resolved.id, 5);
    }

    #[test]
    fn highest_priority_breaks_ties_with_deny_overrides() {
        let a = perm(1, "/x", true, false, 10);
        let b = perm(2, "/x", false, true, 10);
        let resolved = resolve(&[&a, &b], ConflictStrategy::HighestPriority).unwrap();
        assert!(resolved.deny);
    }

    #[test]
    fn most_specific_prefers_literal_over_glob() {
        let literal = perm(1, "/api/users/42", true, false, 0);
        let glob = perm(2, "/api/users/*", false, true, 0);
        let resolved = resolve(&[&literal, &glob], ConflictStrategy::MostSpecific).unwrap();
        assert_eq!(resolved.id, 1);
    }
}
