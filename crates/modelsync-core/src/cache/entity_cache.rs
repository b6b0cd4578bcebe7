// ── Entity cache ──
//
// Identity map keyed by `CacheKey`. The single funnel for construction
// (`get_or_create`) and in-place update (`apply_update`); the revision
// guard lives in the update path.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::live::Live;
use crate::config::CacheConfig;
use crate::error::CoreError;
use crate::model::{CacheId, CacheKey, ClassKind, Entity, Revision};

/// Result of [`EntityCache::apply_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The mutator ran and the revision moved from `previous` to the
    /// incoming revision.
    Applied { previous: Revision },
    /// The incoming revision was not newer than `current`; nothing changed
    /// and no change event should be published.
    Ignored { current: Revision },
    /// No entity is cached under the key. Callers must `get_or_create` first.
    NotFound,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Counters describing cache traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub created: u64,
    pub applied: u64,
    pub ignored: u64,
    pub removed: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    applied: AtomicU64,
    ignored: AtomicU64,
    removed: AtomicU64,
}

/// Concurrent identity map of live entities.
///
/// Uses `DashMap` for O(1) concurrent lookups. Construction of a missing
/// slot happens under the shard lock, so racing `get_or_create` callers on
/// one key run the factory exactly once and all receive the same instance.
pub struct EntityCache<T: Entity> {
    id: CacheId,
    entries: DashMap<CacheKey, Arc<Live<T>>>,
    counters: Counters,
}

impl<T: Entity> EntityCache<T> {
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        let entries = match config.shard_amount {
            Some(shards) if shards > 1 && shards.is_power_of_two() => {
                DashMap::with_capacity_and_shard_amount(config.initial_capacity, shards)
            }
            Some(shards) => {
                warn!(shards, "shard amount must be a power of two greater than one, using default");
                DashMap::with_capacity(config.initial_capacity)
            }
            None => DashMap::with_capacity(config.initial_capacity),
        };
        Self {
            id: CacheId::new(),
            entries,
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> CacheId {
        self.id
    }

    // ── Construction ─────────────────────────────────────────────────

    /// Return the entity cached under `key`, constructing it with `factory`
    /// if the slot is empty.
    ///
    /// `factory` runs while the slot's shard is locked: it must be cheap and
    /// must not call back into this cache.
    pub fn get_or_create(&self, key: CacheKey, factory: impl FnOnce() -> T) -> Arc<Live<T>> {
        self.get_or_create_tracked(key, factory).0
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether
    /// this call constructed the entity.
    pub fn get_or_create_tracked(
        &self,
        key: CacheKey,
        factory: impl FnOnce() -> T,
    ) -> (Arc<Live<T>>, bool) {
        match self.entries.entry(key) {
            Entry::Occupied(slot) => (Arc::clone(slot.get()), false),
            Entry::Vacant(slot) => {
                let state = factory();
                debug_assert_eq!(state.iid(), key.iid, "factory built an entity for another key");
                let live = Arc::new(Live::new(key, self.id, state));
                slot.insert(Arc::clone(&live));
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "entity constructed");
                (live, true)
            }
        }
    }

    /// Fallible variant of [`get_or_create`](Self::get_or_create). A failing
    /// factory leaves the slot empty.
    pub fn try_get_or_create<E>(
        &self,
        key: CacheKey,
        factory: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<Live<T>>, E> {
        match self.entries.entry(key) {
            Entry::Occupied(slot) => Ok(Arc::clone(slot.get())),
            Entry::Vacant(slot) => {
                let live = Arc::new(Live::new(key, self.id, factory()?));
                slot.insert(Arc::clone(&live));
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                Ok(live)
            }
        }
    }

    // ── Update path (revision guard) ─────────────────────────────────

    /// Run `mutator` against the cached entity in place, if and only if
    /// `incoming` is strictly newer than the cached revision.
    ///
    /// Ties are stale, which makes redelivery of an unchanged update a
    /// no-op. The revision is stamped after the mutator returns, so a
    /// mutator cannot move it backward.
    pub fn apply_update(
        &self,
        key: &CacheKey,
        incoming: Revision,
        mutator: impl FnOnce(&mut T),
    ) -> UpdateOutcome {
        let Some(live) = self.lookup(key) else {
            return UpdateOutcome::NotFound;
        };

        let mut state = live.write();
        let current = state.revision();
        if incoming <= current {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, current, incoming, "stale update ignored");
            return UpdateOutcome::Ignored { current };
        }

        mutator(&mut state);
        debug_assert_eq!(state.iid(), key.iid, "mutator changed the entity identity");
        state.set_revision(incoming);
        drop(state);

        self.counters.applied.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, previous = current, revision = incoming, "update applied");
        UpdateOutcome::Applied { previous: current }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<Live<T>>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Required lookup: an absent key is a usage error.
    pub fn get(&self, key: &CacheKey) -> Result<Arc<Live<T>>, CoreError> {
        self.lookup(key).ok_or(CoreError::NotFound { key: *key })
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All current keys.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|r| *r.key()).collect()
    }

    /// Keys of the given context scope (`None` = the unscoped slots).
    pub fn keys_in_scope(&self, scope: Option<Uuid>) -> Vec<CacheKey> {
        self.entries
            .iter()
            .filter(|r| r.key().scope == scope)
            .map(|r| *r.key())
            .collect()
    }

    /// All live instances, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<Live<T>>> {
        self.entries.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Live instances whose class kind is `kind`.
    pub fn of_kind(&self, kind: &ClassKind) -> Vec<Arc<Live<T>>> {
        self.entries
            .iter()
            .filter(|r| r.value().class_kind() == *kind)
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Ancestors of the entity at `key`, nearest first.
    ///
    /// Containers are resolved in the same scope first, then in the
    /// unscoped slot. The walk stops at a missing container or a repeated
    /// identity.
    pub fn container_chain(&self, key: &CacheKey) -> Vec<Arc<Live<T>>> {
        let mut chain = Vec::new();
        let Some(mut current) = self.lookup(key) else {
            return chain;
        };
        let mut seen = HashSet::from([key.iid]);

        while let Some(parent) = current.container() {
            if !seen.insert(parent) {
                break;
            }
            let next = self.lookup(&key.sibling(parent)).or_else(|| {
                key.scope
                    .and_then(|_| self.lookup(&CacheKey::new(parent)))
            });
            let Some(next) = next else { break };
            chain.push(Arc::clone(&next));
            current = next;
        }
        chain
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            created: self.counters.created.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
        }
    }

    // ── Removal ──────────────────────────────────────────────────────

    /// Detach the entry. Holders of the instance keep their `Arc`, but
    /// subsequent lookups miss.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<Live<T>>> {
        let removed = self.entries.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.counters.removed.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "entity removed");
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!(cache = %self.id, count, "cache cleared");
    }
}

impl<T: Entity> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
