// ── Mutation session ──
//
// Local edit staging. Each staged identity keeps an immutable original
// snapshot next to a private working clone; `finalize` diffs the two into
// an ordered operation batch. Nothing here touches the live cached
// instances.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};
use uuid::Uuid;

use super::batch::{OperationBatch, OperationKind};
use super::planner::{self, Draft};
use crate::cache::EntityCache;
use crate::error::CoreError;
use crate::model::{CacheId, CacheKey, Entity};

#[derive(Debug, Clone)]
struct Staged<T> {
    /// Snapshot at staging time. `None` for entities created in the session.
    original: Option<T>,
    working: T,
    deleted: bool,
}

/// A single-use staging area bound to one cache.
///
/// Open until [`finalize`](Self::finalize); every call after that fails
/// with `AlreadyFinalized`.
pub struct MutationSession<T: Entity> {
    id: Uuid,
    cache: Arc<EntityCache<T>>,
    scope: Option<Uuid>,
    parent: Option<Uuid>,
    /// The parent's staged state at the time the nested session was opened.
    inherited: IndexMap<Uuid, Staged<T>>,
    staged: IndexMap<Uuid, Staged<T>>,
    finalized: bool,
}

impl<T: Entity> MutationSession<T> {
    /// Open a session over the unscoped slots of `cache`.
    pub fn begin(cache: Arc<EntityCache<T>>) -> Self {
        Self::begin_scoped(cache, None)
    }

    /// Open a session reading entities of one context scope. Lookups fall
    /// back to the unscoped slot.
    pub fn begin_scoped(cache: Arc<EntityCache<T>>, scope: Option<Uuid>) -> Self {
        let id = Uuid::new_v4();
        trace!(session = %id, cache = %cache.id(), "mutation session opened");
        Self {
            id,
            cache,
            scope,
            parent: None,
            inherited: IndexMap::new(),
            staged: IndexMap::new(),
            finalized: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache_id(&self) -> CacheId {
        self.cache.id()
    }

    pub fn scope(&self) -> Option<Uuid> {
        self.scope
    }

    /// Id of the session this one was nested from.
    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn is_staged(&self, iid: Uuid) -> bool {
        self.staged.contains_key(&iid)
    }

    pub fn is_deleted(&self, iid: Uuid) -> bool {
        self.staged.get(&iid).is_some_and(|s| s.deleted)
    }

    /// Staged identities in staging order.
    pub fn staged_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.staged.keys().copied()
    }

    /// The working clone of a staged entity.
    pub fn working(&self, iid: Uuid) -> Option<&T> {
        self.staged.get(&iid).map(|s| &s.working)
    }

    /// The original snapshot of a staged entity (`None` if created here or
    /// not staged).
    pub fn original(&self, iid: Uuid) -> Option<&T> {
        self.staged.get(&iid).and_then(|s| s.original.as_ref())
    }

    /// Whether a staged entity currently differs from its original.
    pub fn is_dirty(&self, iid: Uuid) -> bool {
        self.staged.get(&iid).is_some_and(|s| match &s.original {
            None => !s.deleted,
            Some(original) => s.deleted || *original != s.working,
        })
    }

    // ── Staging ──────────────────────────────────────────────────────

    /// Stage an existing entity for editing and return its working clone.
    ///
    /// The first call snapshots the entity; later calls for the same
    /// identity return the same clone.
    pub fn stage(&mut self, iid: Uuid) -> Result<&mut T, CoreError> {
        self.ensure_open()?;
        if !self.staged.contains_key(&iid) {
            let original = self.resolve(iid)?;
            trace!(session = %self.id, iid = %iid, revision = original.revision(), "staged");
            self.staged.insert(
                iid,
                Staged {
                    working: original.clone(),
                    original: Some(original),
                    deleted: false,
                },
            );
        }
        self.working_mut(iid)
    }

    /// Stage an entity that does not exist yet. Finalizes into a create.
    pub fn stage_new(&mut self, entity: T) -> Result<&mut T, CoreError> {
        self.ensure_open()?;
        let iid = entity.iid();
        if self.staged.contains_key(&iid) || self.inherited.contains_key(&iid) {
            return Err(CoreError::AlreadyStaged { iid });
        }
        if self.cache.contains_key(&self.key(iid)) || self.cache.contains_key(&CacheKey::new(iid)) {
            return Err(CoreError::AlreadyCached { iid });
        }
        trace!(session = %self.id, iid = %iid, "staged new");
        self.staged.insert(
            iid,
            Staged {
                original: None,
                working: entity,
                deleted: false,
            },
        );
        self.working_mut(iid)
    }

    /// Mark an entity for deletion, staging it first if needed. Deleting an
    /// entity created in this session cancels the create.
    pub fn delete(&mut self, iid: Uuid) -> Result<(), CoreError> {
        self.stage(iid)?;
        if let Some(entry) = self.staged.get_mut(&iid) {
            entry.deleted = true;
        }
        trace!(session = %self.id, iid = %iid, "marked deleted");
        Ok(())
    }

    /// Undo a deletion mark. Returns `false` if the entity was not marked.
    pub fn restore(&mut self, iid: Uuid) -> Result<bool, CoreError> {
        self.ensure_open()?;
        Ok(self
            .staged
            .get_mut(&iid)
            .is_some_and(|entry| std::mem::replace(&mut entry.deleted, false)))
    }

    /// Drop a staged entry and its edits. Returns whether it was staged.
    pub fn discard(&mut self, iid: Uuid) -> Result<bool, CoreError> {
        self.ensure_open()?;
        Ok(self.staged.shift_remove(&iid).is_some())
    }

    // ── Nesting ──────────────────────────────────────────────────────

    /// Open a child session over this session's current working state.
    ///
    /// The child sees the parent's working clones as its originals; its own
    /// edits stay invisible to the parent until
    /// [`merge_nested`](Self::merge_nested).
    pub fn nested(&self) -> Result<Self, CoreError> {
        self.ensure_open()?;
        let mut inherited = self.inherited.clone();
        for (iid, entry) in &self.staged {
            inherited.insert(*iid, entry.clone());
        }
        let id = Uuid::new_v4();
        trace!(session = %id, parent = %self.id, "nested session opened");
        Ok(Self {
            id,
            cache: Arc::clone(&self.cache),
            scope: self.scope,
            parent: Some(self.id),
            inherited,
            staged: IndexMap::new(),
            finalized: false,
        })
    }

    /// Fold a child session's edits back into this one and finalize the
    /// child. Returns the number of entries merged.
    pub fn merge_nested(&mut self, mut child: Self) -> Result<usize, CoreError> {
        self.ensure_open()?;
        if child.parent != Some(self.id) {
            return Err(CoreError::ForeignSession {
                parent: self.id,
                child: child.id,
            });
        }
        child.ensure_open()?;
        child.finalized = true;

        let merged = child.staged.len();
        for (iid, entry) in child.staged.drain(..) {
            match self.staged.get_mut(&iid) {
                Some(mine) => {
                    mine.working = entry.working;
                    mine.deleted = entry.deleted;
                }
                None => {
                    self.staged.insert(iid, entry);
                }
            }
        }
        debug!(session = %self.id, child = %child.id, merged, "nested session merged");
        Ok(merged)
    }

    // ── Finalize ─────────────────────────────────────────────────────

    /// Diff every staged entry against its original and produce the ordered
    /// batch. Single use.
    pub fn finalize(&mut self) -> Result<OperationBatch<T>, CoreError> {
        self.ensure_open()?;
        self.finalized = true;

        let staged = std::mem::take(&mut self.staged);
        let drafts: Vec<Draft<T>> = staged.into_values().filter_map(draft).collect();
        let operations = planner::order(drafts);
        let batch = OperationBatch::new(self.id, self.cache.id(), operations);

        let summary = batch.summary();
        debug!(
            session = %self.id,
            creates = summary.creates,
            updates = summary.updates,
            deletes = summary.deletes,
            deferred = summary.deferred,
            "session finalized"
        );
        Ok(batch)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.finalized {
            Err(CoreError::AlreadyFinalized { session: self.id })
        } else {
            Ok(())
        }
    }

    fn key(&self, iid: Uuid) -> CacheKey {
        CacheKey::with_scope(iid, self.scope)
    }

    /// The state a new staging of `iid` starts from: the parent session's
    /// working clone if nested, else the cache.
    fn resolve(&self, iid: Uuid) -> Result<T, CoreError> {
        if let Some(entry) = self.inherited.get(&iid) {
            if entry.deleted {
                return Err(CoreError::NotFound { key: self.key(iid) });
            }
            return Ok(entry.working.clone());
        }
        let key = self.key(iid);
        let live = self
            .cache
            .lookup(&key)
            .or_else(|| self.scope.and_then(|_| self.cache.lookup(&CacheKey::new(iid))))
            .ok_or(CoreError::NotFound { key })?;
        Ok(live.snapshot())
    }

    fn working_mut(&mut self, iid: Uuid) -> Result<&mut T, CoreError> {
        self.staged
            .get_mut(&iid)
            .map(|s| &mut s.working)
            .ok_or_else(|| CoreError::Internal(format!("staged entry {iid} vanished")))
    }
}

/// The operation a staged entry finalizes into, if any.
fn draft<T: Entity>(entry: Staged<T>) -> Option<Draft<T>> {
    match (entry.original, entry.deleted) {
        (None, true) => None,
        (Some(original), true) => Some(Draft {
            kind: OperationKind::Delete,
            token: Some(original.revision()),
            payload: original,
        }),
        (None, false) => Some(Draft {
            kind: OperationKind::Create,
            payload: entry.working,
            token: None,
        }),
        (Some(original), false) if original != entry.working => Some(Draft {
            kind: OperationKind::Update,
            payload: entry.working,
            token: Some(original.revision()),
        }),
        (Some(_), false) => None,
    }
}

impl<T: Entity> fmt::Debug for MutationSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationSession")
            .field("id", &self.id)
            .field("cache", &self.cache.id())
            .field("scope", &self.scope)
            .field("parent", &self.parent)
            .field("staged", &self.staged.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::Record;

    fn cache_with(records: &[Record]) -> Arc<EntityCache<Record>> {
        let cache = Arc::new(EntityCache::new());
        for r in records {
            let _ = cache.get_or_create(CacheKey::new(r.iid), || r.clone());
        }
        cache
    }

    #[test]
    fn edit_produces_one_whole_value_update_with_token() {
        let r = Record::new("Parameter")
            .with_revision(4)
            .with_field("A", 1)
            .with_field("B", 2);
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin(Arc::clone(&cache));

        session.stage(r.iid).unwrap().set_field("B", 5);
        let batch = session.finalize().unwrap();

        assert_eq!(batch.len(), 1);
        let op = &batch.operations()[0];
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.iid, r.iid);
        assert_eq!(op.token, Some(4));
        assert_eq!(op.payload.field("A"), Some(&json!(1)));
        assert_eq!(op.payload.field("B"), Some(&json!(5)));
    }

    #[test]
    fn unedited_stage_produces_nothing() {
        let r = Record::new("Parameter").with_revision(2);
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin(cache);
        session.stage(r.iid).unwrap();
        assert!(!session.is_dirty(r.iid));
        assert!(session.finalize().unwrap().is_empty());
    }

    #[test]
    fn working_clone_is_isolated_from_the_cache() {
        let r = Record::new("Parameter").with_field("name", "mass");
        let cache = cache_with(&[r.clone()]);
        let live = cache.get(&CacheKey::new(r.iid)).unwrap();
        let mut session = MutationSession::begin(Arc::clone(&cache));

        session.stage(r.iid).unwrap().set_field("name", "weight");

        assert_eq!(live.read().field("name"), Some(&json!("mass")));
        assert_eq!(
            session.working(r.iid).unwrap().field("name"),
            Some(&json!("weight"))
        );
    }

    #[test]
    fn restaging_returns_the_same_clone() {
        let r = Record::new("Parameter");
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin(cache);
        session.stage(r.iid).unwrap().set_field("x", 1);
        let again = session.stage(r.iid).unwrap();
        assert_eq!(again.field("x"), Some(&json!(1)));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn staging_an_uncached_identity_is_not_found() {
        let mut session = MutationSession::<Record>::begin(Arc::new(EntityCache::new()));
        let err = session.stage(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn second_finalize_fails() {
        let mut session = MutationSession::<Record>::begin(Arc::new(EntityCache::new()));
        session.finalize().unwrap();
        assert!(matches!(
            session.finalize(),
            Err(CoreError::AlreadyFinalized { .. })
        ));
        assert!(matches!(
            session.stage_new(Record::new("X")),
            Err(CoreError::AlreadyFinalized { .. })
        ));
    }

    #[test]
    fn stage_new_rejects_duplicates_and_cached_identities() {
        let existing = Record::new("Category");
        let cache = cache_with(&[existing.clone()]);
        let mut session = MutationSession::begin(cache);

        assert!(matches!(
            session.stage_new(existing.clone()),
            Err(CoreError::AlreadyCached { .. })
        ));
        let fresh = Record::new("Category");
        session.stage_new(fresh.clone()).unwrap();
        assert!(matches!(
            session.stage_new(fresh),
            Err(CoreError::AlreadyStaged { .. })
        ));
    }

    #[test]
    fn dependent_creates_are_ordered() {
        let mut session = MutationSession::<Record>::begin(Arc::new(EntityCache::new()));
        let x = Record::new("Scale");
        let y = Record::new("Parameter").with_link("scale", x.iid);
        session.stage_new(y.clone()).unwrap();
        session.stage_new(x.clone()).unwrap();

        let batch = session.finalize().unwrap();
        assert!(
            batch.position(OperationKind::Create, x.iid).unwrap()
                < batch.position(OperationKind::Create, y.iid).unwrap()
        );
    }

    #[test]
    fn delete_carries_original_revision() {
        let r = Record::new("Category").with_revision(11);
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin(cache);
        session.delete(r.iid).unwrap();

        let batch = session.finalize().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.operations()[0].kind, OperationKind::Delete);
        assert_eq!(batch.operations()[0].token, Some(11));
    }

    #[test]
    fn created_then_deleted_produces_nothing() {
        let mut session = MutationSession::<Record>::begin(Arc::new(EntityCache::new()));
        let fresh = Record::new("Category");
        session.stage_new(fresh.clone()).unwrap();
        session.delete(fresh.iid).unwrap();
        assert!(session.finalize().unwrap().is_empty());
    }

    #[test]
    fn restore_and_discard() {
        let r = Record::new("Category").with_revision(1);
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin(cache);
        session.delete(r.iid).unwrap();
        assert!(session.restore(r.iid).unwrap());
        assert!(!session.is_deleted(r.iid));

        session.stage(r.iid).unwrap().set_field("x", 1);
        assert!(session.discard(r.iid).unwrap());
        assert!(!session.discard(r.iid).unwrap());
        assert!(session.finalize().unwrap().is_empty());
    }

    #[test]
    fn scoped_session_falls_back_to_unscoped_slot() {
        let r = Record::new("Category");
        let cache = cache_with(&[r.clone()]);
        let mut session = MutationSession::begin_scoped(cache, Some(Uuid::new_v4()));
        assert!(session.stage(r.iid).is_ok());
    }

    #[test]
    fn nested_session_edits_merge_into_parent() {
        let a = Record::new("Category").with_revision(3).with_field("n", 1);
        let b = Record::new("Category").with_revision(5);
        let cache = cache_with(&[a.clone(), b.clone()]);
        let mut parent = MutationSession::begin(cache);
        parent.stage(a.iid).unwrap().set_field("n", 2);

        let mut child = parent.nested().unwrap();
        assert_eq!(child.stage(a.iid).unwrap().field("n"), Some(&json!(2)));
        child.stage(a.iid).unwrap().set_field("n", 3);
        child.delete(b.iid).unwrap();
        let created = Record::new("Category");
        child.stage_new(created.clone()).unwrap();

        // child edits invisible until merged
        assert_eq!(parent.working(a.iid).unwrap().field("n"), Some(&json!(2)));
        assert_eq!(parent.merge_nested(child).unwrap(), 3);

        let batch = parent.finalize().unwrap();
        let summary = batch.summary();
        assert_eq!((summary.creates, summary.updates, summary.deletes), (1, 1, 1));
        let update = batch.for_iid(a.iid).next().unwrap();
        assert_eq!(update.payload.field("n"), Some(&json!(3)));
        assert_eq!(update.token, Some(3));
    }

    #[test]
    fn merging_a_foreign_or_used_child_fails() {
        let cache = Arc::new(EntityCache::<Record>::new());
        let mut one = MutationSession::begin(Arc::clone(&cache));
        let other = MutationSession::begin(Arc::clone(&cache));
        let stranger = other.nested().unwrap();
        assert!(matches!(
            one.merge_nested(stranger),
            Err(CoreError::ForeignSession { .. })
        ));

        let mut child = one.nested().unwrap();
        child.finalize().unwrap();
        assert!(matches!(
            one.merge_nested(child),
            Err(CoreError::AlreadyFinalized { .. })
        ));
    }

    #[test]
    fn nested_session_cannot_stage_parent_deleted_entity() {
        let r = Record::new("Category");
        let cache = cache_with(&[r.clone()]);
        let mut parent = MutationSession::begin(cache);
        parent.delete(r.iid).unwrap();
        let mut child = parent.nested().unwrap();
        assert!(matches!(child.stage(r.iid), Err(CoreError::NotFound { .. })));
    }
}
