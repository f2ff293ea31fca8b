//! Mirror store: the tenant-scoped local cache of rail data.
//!
//! The mirror is the sole read path of the sync layer — callers never see
//! rail responses that have not been upserted here first. One logical table
//! exists per entity type, keyed by `(tenant, entity_id)`.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::MemoryMirrorStore;
pub use sql::SqlMirrorStore;
pub use traits::{MirrorFilter, MirrorStore, StoreError};
