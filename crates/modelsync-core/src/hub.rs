// ── SyncHub ──
//
// Lifecycle-scoped owner of one cache, one bus and the assembler between
// them. Opened when a repository session starts, closed when it ends;
// consumers receive it explicitly instead of reaching for global state.

use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::assembler::Assembler;
use crate::bus::{DispatchQueue, FaultObserver, MessageBus, TracingFaultObserver};
use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::{CacheId, Entity};
use crate::mutation::{MutationSession, OperationBatch};
use crate::writer::{WriteBoundary, WriteReceipt};

// ── HubState ─────────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HubState {
    Open,
    Closed,
}

// ── SyncHub ──────────────────────────────────────────────────────────

/// The synchronization service for one open repository session.
///
/// Cheaply cloneable via `Arc<HubInner>`.
pub struct SyncHub<T: Entity> {
    inner: Arc<HubInner<T>>,
}

struct HubInner<T: Entity> {
    config: SyncConfig,
    assembler: Assembler<T>,
    state: watch::Sender<HubState>,
}

impl<T: Entity> Clone for SyncHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> SyncHub<T> {
    /// Open a hub with a fresh cache and bus. Subscriber faults are logged.
    pub fn open(config: SyncConfig) -> Self {
        Self::open_with_observer(config, Arc::new(TracingFaultObserver))
    }

    pub fn open_with_observer(config: SyncConfig, observer: Arc<dyn FaultObserver>) -> Self {
        let cache = Arc::new(EntityCache::with_config(&config.cache));
        let bus = MessageBus::with_observer(&config.bus, observer);
        let (state, _) = watch::channel(HubState::Open);
        info!(cache = %cache.id(), "sync hub opened");
        Self {
            inner: Arc::new(HubInner {
                assembler: Assembler::new(cache, bus),
                config,
                state,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<EntityCache<T>> {
        self.inner.assembler.cache()
    }

    pub fn cache_id(&self) -> CacheId {
        self.cache().id()
    }

    pub fn bus(&self) -> &MessageBus {
        self.inner.assembler.bus()
    }

    pub fn assembler(&self) -> &Assembler<T> {
        &self.inner.assembler
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> HubState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == HubState::Open
    }

    /// Subscribe to lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<HubState> {
        self.inner.state.subscribe()
    }

    // ── Operations ───────────────────────────────────────────────────

    pub fn begin_session(&self) -> Result<MutationSession<T>, CoreError> {
        self.begin_scoped_session(None)
    }

    pub fn begin_scoped_session(&self, scope: Option<Uuid>) -> Result<MutationSession<T>, CoreError> {
        self.ensure_open()?;
        Ok(MutationSession::begin_scoped(Arc::clone(self.cache()), scope))
    }

    /// A dispatch queue sized by this hub's bus configuration.
    pub fn dispatch_queue(&self) -> DispatchQueue {
        DispatchQueue::with_warning_threshold(self.inner.config.bus.queue_warning_threshold)
    }

    /// Hand a finalized batch to `boundary`, bounded by the configured
    /// write timeout.
    pub async fn write<W>(&self, batch: OperationBatch<T>, boundary: &W) -> Result<WriteReceipt, CoreError>
    where
        W: WriteBoundary<T>,
    {
        self.ensure_open()?;
        if batch.cache() != self.cache_id() {
            return Err(CoreError::WriteFailed {
                message: format!("batch {} was staged against another cache", batch.id()),
            });
        }
        let timeout = self.inner.config.write.timeout;
        tokio::time::timeout(timeout, boundary.write(batch))
            .await
            .map_err(|_| CoreError::WriteTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Tear down: dispose every subscription, empty the cache and move to
    /// `Closed`. Returns `false` if the hub was already closed.
    pub fn close(&self) -> bool {
        let closed = self.inner.state.send_if_modified(|state| {
            if *state == HubState::Closed {
                return false;
            }
            *state = HubState::Closed;
            true
        });
        if !closed {
            return false;
        }
        let disposed = self.bus().clear_all();
        let entities = self.cache().len();
        self.cache().clear();
        info!(cache = %self.cache_id(), disposed, entities, "sync hub closed");
        true
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::HubClosed)
        }
    }
}
