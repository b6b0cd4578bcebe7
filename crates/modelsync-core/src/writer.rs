// ── Write boundary ──
//
// Where a finalized batch leaves the core. The transport belongs to the
// application; `LoopbackWriter` is an in-process stand-in for the
// authoritative store that applies batches straight back through the
// assembler.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::assembler::Assembler;
use crate::error::CoreError;
use crate::model::{CacheKey, Entity, Revision};
use crate::mutation::{OperationBatch, OperationKind};

/// One operation as accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedOperation {
    pub kind: OperationKind,
    pub iid: Uuid,
    /// Revision the store stamped on the entity.
    pub revision: Revision,
}

/// Acknowledgement of a written batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub batch: Uuid,
    pub committed: Vec<CommittedOperation>,
    pub committed_at: DateTime<Utc>,
}

/// Consumer of operation batches.
///
/// Implementations either commit the whole batch or none of it.
pub trait WriteBoundary<T: Entity>: Send + Sync {
    fn write(
        &self,
        batch: OperationBatch<T>,
    ) -> impl Future<Output = Result<WriteReceipt, CoreError>> + Send;
}

/// In-process authoritative store.
///
/// Checks every concurrency token against the cached revision, stamps
/// accepted operations with fresh server revisions and feeds the results
/// back through the assembler, so subscribers see the write land exactly
/// like a remote echo.
pub struct LoopbackWriter<T: Entity> {
    assembler: Assembler<T>,
    scope: Option<Uuid>,
    latency: Option<Duration>,
    clock: AtomicU64,
    serial: Mutex<()>,
}

impl<T: Entity> LoopbackWriter<T> {
    pub fn new(assembler: Assembler<T>) -> Self {
        Self {
            assembler,
            scope: None,
            latency: None,
            clock: AtomicU64::new(0),
            serial: Mutex::new(()),
        }
    }

    /// Write into the slots of one context scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Option<Uuid>) -> Self {
        self.scope = scope;
        self
    }

    /// Simulated round-trip delay before the batch is committed.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Highest revision this store has handed out.
    pub fn last_revision(&self) -> Revision {
        self.clock.load(Ordering::Acquire)
    }

    fn next_revision(&self, current: Revision) -> Revision {
        self.clock.fetch_max(current, Ordering::AcqRel);
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn key(&self, iid: Uuid) -> CacheKey {
        CacheKey::with_scope(iid, self.scope)
    }

    fn validate(&self, batch: &OperationBatch<T>) -> Result<(), CoreError> {
        let cache = self.assembler.cache();
        let mut created = HashSet::new();
        for op in batch {
            let key = self.key(op.iid);
            match op.kind {
                OperationKind::Create => {
                    if cache.contains_key(&key) {
                        return Err(CoreError::WriteFailed {
                            message: format!("entity {} already exists", op.iid),
                        });
                    }
                    created.insert(op.iid);
                }
                OperationKind::Update | OperationKind::Delete => {
                    let Some(expected) = op.token else {
                        if created.contains(&op.iid) {
                            continue;
                        }
                        return Err(CoreError::WriteFailed {
                            message: format!("{} of {} carries no revision token", op.kind, op.iid),
                        });
                    };
                    let actual = cache.get(&key)?.revision();
                    if actual != expected {
                        return Err(CoreError::Conflict {
                            iid: op.iid,
                            expected,
                            actual,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(&self, batch: OperationBatch<T>) -> Result<WriteReceipt, CoreError> {
        let _serial = self.serial.lock();
        self.validate(&batch)?;

        let batch_id = batch.id();
        let mut committed = Vec::with_capacity(batch.len());
        for op in batch.into_operations() {
            let key = self.key(op.iid);
            let current = self
                .assembler
                .cache()
                .lookup(&key)
                .map_or(0, |live| live.revision());
            let revision = self.next_revision(current);
            match op.kind {
                OperationKind::Create | OperationKind::Update => {
                    let mut payload = op.payload;
                    payload.set_revision(revision);
                    self.assembler.ingest(self.scope, payload);
                }
                OperationKind::Delete => {
                    self.assembler.remove(&key);
                }
            }
            committed.push(CommittedOperation {
                kind: op.kind,
                iid: op.iid,
                revision,
            });
        }

        info!(batch = %batch_id, operations = committed.len(), "batch committed");
        Ok(WriteReceipt {
            batch: batch_id,
            committed,
            committed_at: Utc::now(),
        })
    }
}

impl<T: Entity> WriteBoundary<T> for LoopbackWriter<T> {
    async fn write(&self, batch: OperationBatch<T>) -> Result<WriteReceipt, CoreError> {
        debug!(batch = %batch.id(), operations = batch.len(), "writing batch");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.commit(batch)
    }
}
