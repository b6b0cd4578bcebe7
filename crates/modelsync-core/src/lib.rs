//! Client-side synchronization core for a collaborative engineering-data
//! repository.
//!
//! The crate keeps an in-memory model consistent with a remote
//! authoritative store and turns local edits into atomic write batches:
//!
//! - **[`EntityCache`]** — Identity map keyed by [`CacheKey`]. The single
//!   funnel for construction ([`get_or_create`](EntityCache::get_or_create))
//!   and in-place update ([`apply_update`](EntityCache::apply_update)), which
//!   enforces the revision guard: updates not newer than the cached revision
//!   are dropped. Entities are shared as `Arc<Live<T>>`, so every holder sees
//!   an update without re-fetching.
//!
//! - **[`MessageBus`]** — Typed publish/subscribe. Entity changes travel as
//!   [`ObjectChange`]; applications may define their own [`Message`] types.
//!   Subscriptions run [`Immediate`](Scheduler::Immediate)ly or on a
//!   [`DispatchQueue`], are isolated from each other's failures, and end with
//!   their [`SubscriptionHandle`].
//!
//! - **[`MutationSession`]** — Stages edits on private working clones and
//!   finalizes them into a dependency-ordered [`OperationBatch`].
//!
//! - **[`Assembler`]** — Cache-then-bus orchestration for incoming data,
//!   including upsert-then-prune scope synchronization.
//!
//! - **[`WriteBoundary`]** — Where batches leave the core;
//!   [`LoopbackWriter`] is an in-process store for tests and tooling.
//!
//! - **[`SyncHub`]** — Lifecycle-scoped owner of all of the above.
//!
//! The core is generic over the cached type through the capability traits
//! in [`model`]; [`Record`] is a domain-neutral implementation.

pub mod assembler;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod model;
pub mod mutation;
pub mod writer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use assembler::{Assembler, IngestOutcome, SyncReport};
pub use bus::{
    ChangeFilter, ChangeStream, DispatchQueue, EventKind, FaultObserver, FaultReason, Message,
    MessageBus, MessageStream, ObjectChange, QueueHandle, Scheduler, SubscriberError,
    SubscriberFault, SubscriptionHandle, SubscriptionSet, SubscriptionState,
};
pub use cache::{CacheStats, EntityCache, Live, UpdateOutcome};
pub use config::{BusConfig, CacheConfig, SyncConfig, WriteConfig};
pub use error::CoreError;
pub use hub::{HubState, SyncHub};
pub use model::{
    CacheId, CacheKey, ClassKind, Entity, HasContainer, HasIdentity, HasRevision, Record,
    Revision,
};
pub use mutation::{BatchSummary, MutationSession, Operation, OperationBatch, OperationKind};
pub use writer::{CommittedOperation, LoopbackWriter, WriteBoundary, WriteReceipt};
