//! SQLite persistence for cached contacts and per-source sync state.

mod model;
mod store;

pub use model::{ContactRowDB, SyncStateDB};
pub use store::SqliteContactsCacheStore;
