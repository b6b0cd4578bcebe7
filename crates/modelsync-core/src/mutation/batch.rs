// ── Operation batch ──
//
// The output of a finalized mutation session: an ordered, immutable list
// of whole-value create/update/delete operations for the write boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::model::{CacheId, ClassKind, Revision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One write operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation<T> {
    pub kind: OperationKind,
    pub iid: Uuid,
    pub class_kind: ClassKind,
    /// Full state to write. For a delete, the original snapshot.
    pub payload: T,
    /// Revision the session's original was taken at. The store rejects the
    /// operation if the entity has moved on since. `None` for creates and
    /// for the completion update of a create in the same batch.
    pub token: Option<Revision>,
    /// References left out of this create because their targets are
    /// created later in the same batch. A completion update follows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred_references: Vec<Uuid>,
}

impl<T> Operation<T> {
    pub fn is_deferred(&self) -> bool {
        !self.deferred_references.is_empty()
    }
}

/// Per-kind operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub deferred: usize,
}

/// Ordered operations produced by one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationBatch<T> {
    id: Uuid,
    session: Uuid,
    cache: CacheId,
    created_at: DateTime<Utc>,
    operations: Vec<Operation<T>>,
}

impl<T> OperationBatch<T> {
    pub(crate) fn new(session: Uuid, cache: CacheId, operations: Vec<Operation<T>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            cache,
            created_at: Utc::now(),
            operations,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Cache the session was bound to.
    pub fn cache(&self) -> CacheId {
        self.cache
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn operations(&self) -> &[Operation<T>] {
        &self.operations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation<T>> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations targeting `iid`, in batch order.
    pub fn for_iid(&self, iid: Uuid) -> impl Iterator<Item = &Operation<T>> {
        self.operations.iter().filter(move |op| op.iid == iid)
    }

    /// Index of the first `kind` operation on `iid`.
    pub fn position(&self, kind: OperationKind, iid: Uuid) -> Option<usize> {
        self.operations
            .iter()
            .position(|op| op.kind == kind && op.iid == iid)
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for op in &self.operations {
            match op.kind {
                OperationKind::Create => summary.creates += 1,
                OperationKind::Update => summary.updates += 1,
                OperationKind::Delete => summary.deletes += 1,
            }
            if op.is_deferred() {
                summary.deferred += 1;
            }
        }
        summary
    }

    pub fn into_operations(self) -> Vec<Operation<T>> {
        self.operations
    }
}

impl<'a, T> IntoIterator for &'a OperationBatch<T> {
    type Item = &'a Operation<T>;
    type IntoIter = std::slice::Iter<'a, Operation<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
