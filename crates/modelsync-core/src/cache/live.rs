// ── Live entity handle ──
//
// Shared ownership with a single-writer / many-reader discipline: every
// holder of an `Arc<Live<T>>` observes in-place updates made by the cache
// without re-fetching. Only the cache takes the write lock.

use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::model::{CacheId, CacheKey, ClassKind, Entity, Revision};

/// A cached entity instance. There is at most one per `CacheKey` per cache.
pub struct Live<T: Entity> {
    key: CacheKey,
    cache: CacheId,
    state: RwLock<T>,
}

impl<T: Entity> Live<T> {
    pub(crate) fn new(key: CacheKey, cache: CacheId, state: T) -> Self {
        Self {
            key,
            cache,
            state: RwLock::new(state),
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn iid(&self) -> Uuid {
        self.key.iid
    }

    /// The cache this instance belongs to (non-owning).
    pub fn cache_id(&self) -> CacheId {
        self.cache
    }

    pub fn revision(&self) -> Revision {
        self.state.read().revision()
    }

    pub fn class_kind(&self) -> ClassKind {
        self.state.read().class_kind()
    }

    pub fn container(&self) -> Option<Uuid> {
        self.state.read().container()
    }

    /// Borrow the current state. Hold the guard briefly: the cache's update
    /// path waits for readers to release it.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.state.read()
    }

    /// Run `f` against the current state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read())
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> T {
        self.state.read().clone()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.state.write()
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for Live<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Live")
            .field("key", &self.key)
            .field("cache", &self.cache)
            .field("state", &*self.state.read())
            .finish()
    }
}
