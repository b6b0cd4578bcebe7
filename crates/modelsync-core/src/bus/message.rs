// ── Bus messages ──
//
// Every message type carried by the bus declares how subscriptions filter
// it. Entity change notifications are the primary message; applications
// add their own (highlight requests, busy indicators, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::cache::Live;
use crate::model::{CacheId, CacheKey, ClassKind, Entity, Revision};

/// A value that can travel on the bus.
///
/// `Clone` is required because queued subscriptions receive their own copy
/// on the target context.
pub trait Message: Clone + Send + Sync + 'static {
    /// Subscription-side selector for this message type.
    type Filter: Send + Sync + 'static;

    fn matches(&self, filter: &Self::Filter) -> bool;
}

// ── ObjectChange ────────────────────────────────────────────────────

/// Kind of change an entity went through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

/// Notification that a cached entity changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectChange {
    pub key: CacheKey,
    pub class_kind: ClassKind,
    pub kind: EventKind,
    /// Revision of the entity at publish time.
    pub revision: Revision,
    /// Cache the entity lives in.
    pub cache: CacheId,
    pub container: Option<Uuid>,
    pub published_at: DateTime<Utc>,
}

impl ObjectChange {
    /// Describe the current state of `live` as a change of `kind`.
    pub fn from_live<T: Entity>(kind: EventKind, live: &Live<T>) -> Self {
        let state = live.read();
        Self {
            key: live.key(),
            class_kind: state.class_kind(),
            kind,
            revision: state.revision(),
            cache: live.cache_id(),
            container: state.container(),
            published_at: Utc::now(),
        }
    }

    pub fn iid(&self) -> Uuid {
        self.key.iid
    }
}

/// What an entity-change subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeTarget {
    All,
    Identity(Uuid),
    Kind(ClassKind),
}

/// Subscription filter for [`ObjectChange`].
///
/// Targets one identity, one class kind, or everything; optionally narrowed
/// to one cache and to a subset of event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub target: ChangeTarget,
    pub cache: Option<CacheId>,
    pub kinds: Vec<EventKind>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::targeting(ChangeTarget::All)
    }

    pub fn identity(iid: Uuid) -> Self {
        Self::targeting(ChangeTarget::Identity(iid))
    }

    pub fn kind(kind: impl Into<ClassKind>) -> Self {
        Self::targeting(ChangeTarget::Kind(kind.into()))
    }

    fn targeting(target: ChangeTarget) -> Self {
        Self {
            target,
            cache: None,
            kinds: Vec::new(),
        }
    }

    /// Only changes originating from `cache`.
    #[must_use]
    pub fn in_cache(mut self, cache: CacheId) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Only changes of the given kind. May be chained to accept several.
    #[must_use]
    pub fn only(mut self, kind: EventKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }
}

impl Message for ObjectChange {
    type Filter = ChangeFilter;

    fn matches(&self, filter: &ChangeFilter) -> bool {
        let target = match &filter.target {
            ChangeTarget::All => true,
            ChangeTarget::Identity(iid) => self.key.iid == *iid,
            ChangeTarget::Kind(kind) => self.class_kind == *kind,
        };
        target
            && filter.cache.is_none_or(|c| c == self.cache)
            && (filter.kinds.is_empty() || filter.kinds.contains(&self.kind))
    }
}
