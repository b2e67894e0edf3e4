//! Sync domain models and the contact synchronization engine.

mod engine;
mod model;

pub use engine::{ContactSyncEngine, CACHE_SCHEMA_VERSION};
pub use model::{SyncMetadata, SyncState, SyncSummary, UpsertOutcome};
