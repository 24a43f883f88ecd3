//! The evaluator's bounded decision cache (§4.B "Caching").
//!
//! Keyed by `(entityId, uri, verb)`, TTL-expiring, with cascading
//! invalidation: a mutation touching an entity or any of its ancestors
//! invalidates every cache entry whose key entity is that entity or one of
//! its descendants. This is bespoke enough (graph-shaped invalidation, not
//! a flat LRU) that it's hand-rolled rather than pulled from a memoization
//! crate, the way this lineage hand-rolls its own versioned state channels
//! rather than reaching for a generic container.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{EntityId, Verb};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    entity: EntityId,
    uri: String,
    verb: Verb,
}

struct CacheEntry {
    allowed: bool,
    reason: String,
    sources: Vec<EntityId>,
    inserted_at: Instant,
}

/// Bounded TTL cache for evaluator decisions. "Bounded" here means bounded
/// by TTL expiry and invalidation, not by an entry-count limit — the entity
/// graph itself bounds the key space.
pub struct DecisionCache {
    ttl: Duration,
    entries: RwLock<FxHashMap<CacheKey, CacheEntry>>,
}

/// A cached decision, or a miss.
pub struct CachedDecision {
    pub allowed: bool,
    pub reason: String,
    pub sources: Vec<EntityId>,
}

impl DecisionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn get(&self, entity: EntityId, uri: &str, verb: Verb) -> Option<CachedDecision> {
        let key = CacheKey {
            entity,
            uri: uri.to_ascii_lowercase(),
            verb,
        };
        let entries = self.entries.read();
        let entry = entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(CachedDecision {
            allowed: entry.allowed,
            reason: entry.reason.clone(),
            sources: entry.sources.clone(),
        })
    }

    pub fn insert(
        &self,
        entity: EntityId,
        uri: &str,
        verb: Verb,
        allowed: bool,
        reason: String,
        sources: Vec<EntityId>,
    ) {
        let key = CacheKey {
            entity,
            uri: uri.to_ascii_lowercase(),
            verb,
        };
        self.entries.write().insert(
            key,
            CacheEntry {
                allowed,
                reason,
                sources,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Invalidate every entry whose key entity is in `affected` (an entity
    /// plus all of its descendants, per §4.B: "invalidates all entries whose
    /// `entityId` is `e` or a descendant of `e`").
    pub fn invalidate_entities(&self, affected: &[EntityId]) {
        if affected.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        entries.retain(|key, _| !affected.contains(&key.entity));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
