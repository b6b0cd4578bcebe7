// ── Entity capabilities ──
//
// The cache, bus and session depend only on this small closed set of
// capabilities, never on a concrete domain hierarchy. Domain crates
// implement them for their own types; `Record` is the built-in one.

use uuid::Uuid;

use super::identity::{ClassKind, Revision};

/// Stable identity of an entity. Never changes over the entity's lifetime.
pub trait HasIdentity {
    fn iid(&self) -> Uuid;
}

/// Revision stamp written by the authoritative store.
pub trait HasRevision {
    fn revision(&self) -> Revision;

    /// Only the cache's update path and the write boundary call this.
    fn set_revision(&mut self, revision: Revision);
}

/// Non-owning back-reference to the containing entity.
pub trait HasContainer {
    fn container(&self) -> Option<Uuid>;
}

/// Everything the synchronization core needs from a cached type.
///
/// `PartialEq` is the dirty check of a mutation session: a working clone
/// equal to its original snapshot produces no operation.
pub trait Entity:
    HasIdentity + HasRevision + HasContainer + Clone + PartialEq + Send + Sync + 'static
{
    /// Type tag used by broadcast-to-type subscriptions.
    fn class_kind(&self) -> ClassKind;

    /// Identities referenced through the entity's own fields. The container
    /// is not included.
    fn references(&self) -> Vec<Uuid> {
        Vec::new()
    }

    /// A copy of `self` with every field referring to `target` cleared.
    ///
    /// Used to defer one side of a reference cycle between entities created
    /// in the same batch.
    #[must_use]
    fn without_reference(&self, target: Uuid) -> Self {
        let _ = target;
        self.clone()
    }

    /// Every identity this entity needs to exist before it can be created:
    /// its container plus its references, deduplicated, self excluded.
    fn dependencies(&self) -> Vec<Uuid> {
        let me = self.iid();
        let mut deps: Vec<Uuid> = self.container().into_iter().collect();
        for target in self.references() {
            if target != me && !deps.contains(&target) {
                deps.push(target);
            }
        }
        deps.retain(|d| *d != me);
        deps
    }
}
