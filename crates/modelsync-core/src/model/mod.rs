// ── Domain-neutral model ──
//
// Identity types, the entity capability traits, and the generic `Record`
// entity. The core never depends on anything more specific than this.

pub mod capability;
pub mod identity;
pub mod record;

// ── Re-exports ──────────────────────────────────────────────────────

pub use capability::{Entity, HasContainer, HasIdentity, HasRevision};
pub use identity::{CacheId, CacheKey, ClassKind, Revision};
pub use record::Record;
