//! SQLite persistence for the contacts cache: schema, embedded
//! migrations, and the durable store backend.
//!
//! The database runs in WAL mode so readers keep observing the last
//! committed snapshot while a sync transaction is open.

pub mod contacts;
pub mod db;
pub mod errors;
pub mod schema;

pub use contacts::SqliteContactsCacheStore;
pub use errors::StorageError;
