// ── Entity cache ──
//
// Identity-mapped live entities with revision-gated in-place updates.

mod entity_cache;
mod live;

pub use entity_cache::{CacheStats, EntityCache, UpdateOutcome};
pub use live::Live;
