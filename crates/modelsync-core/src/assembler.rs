// ── Entity assembler ──
//
// Funnels incoming entity data into the cache and, only after the cache
// mutation has completed, announces it on the bus. Also applies full
// snapshot refreshes for one scope with upsert-then-prune.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::bus::{EventKind, MessageBus, ObjectChange};
use crate::cache::{EntityCache, Live, UpdateOutcome};
use crate::model::{CacheKey, Entity};

/// What [`Assembler::ingest`] did with one incoming entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IngestOutcome {
    /// Constructed in the cache; `Added` was published.
    Added,
    /// Applied in place; `Updated` was published.
    Updated,
    /// Not newer than the cached revision; nothing published.
    Ignored,
}

/// Tally of a bulk ingest or synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub ignored: usize,
    pub removed: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Added => self.added += 1,
            IngestOutcome::Updated => self.updated += 1,
            IngestOutcome::Ignored => self.ignored += 1,
        }
    }

    /// Events published while producing this report.
    pub fn published(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

/// Cache-then-bus orchestration for one cache.
pub struct Assembler<T: Entity> {
    cache: Arc<EntityCache<T>>,
    bus: MessageBus,
}

impl<T: Entity> Clone for Assembler<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            bus: self.bus.clone(),
        }
    }
}

impl<T: Entity> Assembler<T> {
    pub fn new(cache: Arc<EntityCache<T>>, bus: MessageBus) -> Self {
        Self { cache, bus }
    }

    pub fn cache(&self) -> &Arc<EntityCache<T>> {
        &self.cache
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Take in one entity as delivered by the store, at the revision it
    /// carries.
    ///
    /// An absent entity is constructed and announced as `Added`. A present
    /// one is replaced in place (whole value) if the incoming revision is
    /// newer, then announced as `Updated`.
    pub fn ingest(&self, scope: Option<Uuid>, raw: T) -> IngestOutcome {
        let key = CacheKey::with_scope(raw.iid(), scope);

        let live = match self.cache.lookup(&key) {
            Some(live) => live,
            None => {
                let (live, created) = self.cache.get_or_create_tracked(key, || raw.clone());
                if created {
                    self.announce(EventKind::Added, &live);
                    return IngestOutcome::Added;
                }
                live
            }
        };

        let incoming = raw.revision();
        match self.cache.apply_update(&key, incoming, move |state| *state = raw) {
            UpdateOutcome::Applied { .. } => {
                self.announce(EventKind::Updated, &live);
                IngestOutcome::Updated
            }
            UpdateOutcome::Ignored { .. } => IngestOutcome::Ignored,
            UpdateOutcome::NotFound => {
                // Removed between lookup and update; the removal wins.
                trace!(key = %key, "entity removed while ingesting, dropped");
                IngestOutcome::Ignored
            }
        }
    }

    pub fn ingest_many(&self, scope: Option<Uuid>, items: impl IntoIterator<Item = T>) -> SyncReport {
        let mut report = SyncReport::default();
        for raw in items {
            report.record(self.ingest(scope, raw));
        }
        report
    }

    /// Apply a complete snapshot of `scope`.
    ///
    /// Every incoming entity is ingested first; then cached entities of the
    /// scope missing from the snapshot are removed and announced. Readers
    /// never observe a transient empty scope.
    pub fn synchronize(&self, scope: Option<Uuid>, items: impl IntoIterator<Item = T>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut incoming = HashSet::new();
        for raw in items {
            incoming.insert(raw.iid());
            report.record(self.ingest(scope, raw));
        }
        for key in self.cache.keys_in_scope(scope) {
            if !incoming.contains(&key.iid) && self.remove(&key) {
                report.removed += 1;
            }
        }
        debug!(
            scope = ?scope,
            added = report.added,
            updated = report.updated,
            ignored = report.ignored,
            removed = report.removed,
            "scope synchronized"
        );
        report
    }

    /// Remove an entity and announce it as `Removed`. Returns whether it
    /// was cached.
    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.cache.remove(key) {
            Some(live) => {
                self.announce(EventKind::Removed, &live);
                true
            }
            None => false,
        }
    }

    fn announce(&self, kind: EventKind, live: &Live<T>) {
        let change = ObjectChange::from_live(kind, live);
        let dispatched = self.bus.publish(&change);
        trace!(key = %change.key, kind = %kind, revision = change.revision, dispatched, "change published");
    }
}
