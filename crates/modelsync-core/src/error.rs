// ── Core error types ──
//
// Hard errors surfaced by modelsync-core. Expected outcomes such as a
// stale update or a cyclic create pair are NOT errors -- they come back as
// status enums (`UpdateOutcome`, `IngestOutcome`) and callers branch on them.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{CacheKey, Revision};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Cache errors ─────────────────────────────────────────────────
    #[error("Entity not found: {key}")]
    NotFound { key: CacheKey },

    #[error("Entity {iid} is already cached and cannot be staged as new")]
    AlreadyCached { iid: Uuid },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Mutation session {session} has already been finalized")]
    AlreadyFinalized { session: Uuid },

    #[error("Entity {iid} is already staged in this session")]
    AlreadyStaged { iid: Uuid },

    #[error("Nested session {child} does not belong to session {parent}")]
    ForeignSession { parent: Uuid, child: Uuid },

    // ── Write errors ─────────────────────────────────────────────────
    #[error("Revision conflict on {iid}: expected revision {expected}, store holds {actual}")]
    Conflict {
        iid: Uuid,
        expected: Revision,
        actual: Revision,
    },

    #[error("Write rejected: {message}")]
    WriteFailed { message: String },

    #[error("Write timed out after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Sync hub has been closed")]
    HubClosed,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the error reports a usage-contract violation by the caller
    /// (as opposed to a failure of the remote store or the environment).
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyCached { .. }
                | Self::AlreadyFinalized { .. }
                | Self::AlreadyStaged { .. }
                | Self::ForeignSession { .. }
                | Self::HubClosed
        )
    }
}
