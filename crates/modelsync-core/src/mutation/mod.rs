// ── Mutation sessions ──
//
// Staging of local edits and their translation into an ordered batch of
// write operations.

mod batch;
mod planner;
mod session;

pub use batch::{BatchSummary, Operation, OperationBatch, OperationKind};
pub use session::MutationSession;
