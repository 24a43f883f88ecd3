//! Core identifiers and small tagged types shared across the authorization core.
//!
//! These are the fundamental domain vocabulary: [`EntityId`] names a node in the
//! entity graph, [`EntityKind`] tags what kind of node it is, [`Verb`] and
//! [`UriPattern`] describe what a permission covers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable integer identifier for an entity (user, group, or role).
///
/// Ids are assigned once at creation and never reused, per the graph's
/// lifecycle rules: deletion removes an id from the graph entirely rather
/// than marking it free for reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The kind of entity a node represents.
///
/// `EntityKind` is the tag half of the tagged-variant design: shared fields
/// (id, permissions, parents, children) live on [`crate::entities::entity::Entity`]
/// while kind carries only what distinguishes a user from a group from a role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Group,
    Role,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Role => "role",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The HTTP-shaped verb a permission grants or denies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Verb {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Patch => "PATCH",
        }
    }

    /// Decode a verb from its persisted/wire string form, falling back to
    /// `None` for unrecognized input rather than panicking.
    #[must_use]
    pub fn decode(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            "DELETE" => Some(Verb::Delete),
            "PATCH" => Some(Verb::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed edge kind between two entities. Always maintained symmetrically:
/// every edge appears in the source's `parents` and the target's `children`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    UserToGroup,
    UserToRole,
    GroupToGroup,
    RoleToGroup,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::UserToGroup => "user->group",
            EdgeKind::UserToRole => "user->role",
            EdgeKind::GroupToGroup => "group->group",
            EdgeKind::RoleToGroup => "role->group",
        };
        write!(f, "{s}")
    }
}

/// A URI pattern attached to a permission: literal, glob, or path template.
///
/// Stored as the raw pattern string plus a pre-classified tag so matching
/// and specificity ordering (literal > template > glob, longer globs more
/// specific) don't need to re-parse the string on every evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UriPattern {
    raw: String,
    tag: PatternTag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum PatternTag {
    Literal,
    Glob,
    Template,
}

impl UriPattern {
    /// Classify a raw pattern string: `*` anywhere makes it a glob, `{name}`
    /// segments (with no `*`) make it a template, otherwise it's literal.
    #[must_use]
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let tag = if raw.contains('*') {
            PatternTag::Glob
        } else if raw.contains('{') {
            PatternTag::Template
        } else {
            PatternTag::Literal
        };
        Self { raw, tag }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.tag, PatternTag::Literal)
    }

    #[must_use]
    pub fn is_glob(&self) -> bool {
        matches!(self.tag, PatternTag::Glob)
    }

    #[must_use]
    pub fn is_template(&self) -> bool {
        matches!(self.tag, PatternTag::Template)
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
