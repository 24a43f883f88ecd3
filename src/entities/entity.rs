//! Entity and permission types: the tagged-variant design called for in the
//! design notes (`Entity = User | Group | Role`, shared capability factored
//! into an embedded struct, kind-specific fields on the variant).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityKind, UriPattern, Verb};

/// Fields shared by every entity kind: identity, permission set, and the
/// relational neighbor sets that make up the graph's edges.
///
/// Neighbors are kept as sets of ids, not owning references, so the graph
/// stays cycle-safe without lifetimes or `Rc`/`Weak` bookkeeping — the
/// pattern the design notes call for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityCore {
    pub id: EntityId,
    pub permissions: Vec<Permission>,
    pub parents: BTreeSet<EntityId>,
    pub children: BTreeSet<EntityId>,
}

impl EntityCore {
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            permissions: Vec::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub core: EntityCore,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub salt: Option<String>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub core: EntityCore,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Role {
    pub core: EntityCore,
    pub name: String,
    pub description: Option<String>,
}

/// A node in the access-control graph: a user, group, or role.
///
/// Kind-specific fields live on the variant; shared fields are reached
/// through [`Entity::core`]/[`Entity::core_mut`] so graph code can stay
/// kind-agnostic for edge and permission bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Entity {
    User(User),
    Group(Group),
    Role(Role),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::User(_) => EntityKind::User,
            Entity::Group(_) => EntityKind::Group,
            Entity::Role(_) => EntityKind::Role,
        }
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        self.core().id
    }

    #[must_use]
    pub fn core(&self) -> &EntityCore {
        match self {
            Entity::User(u) => &u.core,
            Entity::Group(g) => &g.core,
            Entity::Role(r) => &r.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut EntityCore {
        match self {
            Entity::User(u) => &mut u.core,
            Entity::Group(g) => &mut g.core,
            Entity::Role(r) => &mut r.core,
        }
    }

    #[must_use]
    pub fn as_user(&self) -> Option<&User> {
        match self {
            Entity::User(u) => Some(u),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Entity::Group(g) => Some(g),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_role(&self) -> Option<&Role> {
        match self {
            Entity::Role(r) => Some(r),
            _ => None,
        }
    }
}

/// A narrow, serializable predicate over an evaluation `context`, used by
/// [`PermissionKind::Conditional`]. Kept intentionally small — a closed
/// expression language over JSON scalars, not an embedded scripting
/// language — since the source this was distilled from treats this corner
/// as thinly specified (see `DESIGN.md`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ContextPredicate {
    /// True when `context` has the given key, with any value.
    HasKey(String),
    /// True when `context[key] == value`.
    Equals { key: String, value: serde_json::Value },
    And(Vec<ContextPredicate>),
    Or(Vec<ContextPredicate>),
}

impl ContextPredicate {
    #[must_use]
    pub fn evaluate(&self, context: &serde_json::Value) -> bool {
        match self {
            ContextPredicate::HasKey(key) => {
                context.get(key).is_some()
            }
            ContextPredicate::Equals { key, value } => {
                context.get(key).is_some_and(|v| v == value)
            }
            ContextPredicate::And(preds) => preds.iter().all(|p| p.evaluate(context)),
            ContextPredicate::Or(preds) => preds.iter().any(|p| p.evaluate(context)),
        }
    }
}

/// Distinguishes a standard always-on permission from conditional and
/// temporary variants (§3 supplement).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PermissionKind {
    Standard,
    Conditional { predicate: ContextPredicate },
    Temporary {
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
}

/// A `(uri, verb, grant, deny, scheme)` tuple attached to an entity, plus the
/// priority and kind fields this expansion adds.
///
/// `grant` and `deny` are independent booleans; both false means "no
/// opinion", both true is illegal and rejected at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Permission {
    /// Assigned by the dispatcher at `AddPermissionToEntity` time; used by
    /// the `MOST_RECENT` conflict strategy (highest id wins).
    pub id: u64,
    pub uri: UriPattern,
    pub verb: Verb,
    pub grant: bool,
    pub deny: bool,
    pub scheme: String,
    pub priority: i32,
    pub kind: PermissionKind,
}

impl Permission {
    /// Construct a standard permission. Returns `None` if both `grant` and
    /// `deny` are true (illegal per §3 invariant on `Permission`).
    #[must_use]
    pub fn new(
        id: u64,
        uri: UriPattern,
        verb: Verb,
        grant: bool,
        deny: bool,
        scheme: impl Into<String>,
    ) -> Option<Self> {
        if grant && deny {
            return None;
        }
        Some(Self {
            id,
            uri,
            verb,
            grant,
            deny,
            scheme: scheme.into(),
            priority: 0,
            kind: PermissionKind::Standard,
        })
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: PermissionKind) -> Self {
        self.kind = kind;
        self
    }

    /// The `(uri, verb, scheme)` identity key used to enforce the
    /// no-two-permissions-equal-by-key invariant on a single entity's set.
    #[must_use]
    pub fn identity_key(&self) -> (String, Verb, String) {
        (self.uri.as_str().to_ascii_lowercase(), self.verb, self.scheme.clone())
    }
}
