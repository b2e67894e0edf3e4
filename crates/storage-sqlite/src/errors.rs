//! Storage error types.

use contacts_cache_core::errors::Error as CoreError;
use thiserror::Error;

/// Errors raised by the SQLite backend before conversion into the core
/// error taxonomy.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("database connection failed: {0}")]
    Connection(#[from] diesel::result::ConnectionError),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::Store(err.to_string())
    }
}
