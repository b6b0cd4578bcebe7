// ── Core identity types ──
//
// CacheKey, CacheId and ClassKind form the addressing layer of the core.
// Every cache slot, change event and subscription filter is expressed in
// these types.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic revision number stamped on an entity by the authoritative store.
pub type Revision = u64;

// ── CacheKey ────────────────────────────────────────────────────────

/// Composite key of a cache slot.
///
/// The same identity may be cached once per context scope (for instance
/// once per open iteration), so the scope is part of the key. `None` is the
/// unscoped slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub iid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Uuid>,
}

impl CacheKey {
    /// Unscoped key for `iid`.
    pub const fn new(iid: Uuid) -> Self {
        Self { iid, scope: None }
    }

    /// Key for `iid` inside the context scope `scope`.
    pub const fn scoped(iid: Uuid, scope: Uuid) -> Self {
        Self {
            iid,
            scope: Some(scope),
        }
    }

    /// Key for `iid` with an optional scope.
    pub const fn with_scope(iid: Uuid, scope: Option<Uuid>) -> Self {
        Self { iid, scope }
    }

    /// The same scope, a different identity. Used to resolve references
    /// held by an entity relative to the slot it lives in.
    pub const fn sibling(&self, iid: Uuid) -> Self {
        Self {
            iid,
            scope: self.scope,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}@{scope}", self.iid),
            None => write!(f, "{}", self.iid),
        }
    }
}

impl From<Uuid> for CacheKey {
    fn from(iid: Uuid) -> Self {
        Self::new(iid)
    }
}

impl FromStr for CacheKey {
    type Err = uuid::Error;

    /// Parses `"<iid>"` or `"<iid>@<scope>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((iid, scope)) => Ok(Self::scoped(iid.parse()?, scope.parse()?)),
            None => Ok(Self::new(s.parse()?)),
        }
    }
}

// ── CacheId ─────────────────────────────────────────────────────────

/// Identity of one cache instance.
///
/// Several sessions may be open at once, each with its own cache; change
/// events carry the id of the cache they originate from so subscribers can
/// ignore traffic that belongs to another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheId(Uuid);

impl CacheId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CacheId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── ClassKind ───────────────────────────────────────────────────────

/// Type tag of an entity, used for broadcast-to-type subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassKind(Cow<'static, str>);

impl ClassKind {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ClassKind {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for ClassKind {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}
