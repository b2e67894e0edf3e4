//! Error types for the contacts cache.

use thiserror::Error;

/// Result type alias for contacts cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sync engine and the store contract.
///
/// Invalid individual contact records are not errors: the engine drops
/// them and counts them in `SyncSummary::invalid_dropped`.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-provided argument violates a precondition. Raised before
    /// any state change.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine refused the whole batch due to a policy violation
    /// (capacity exceeded, sequence regression). Raised before commit;
    /// no partial writes remain visible.
    #[error("sync rejected: {0}")]
    SyncRejected(String),

    /// The underlying persistence layer failed. The enclosing
    /// transaction, if any, has been aborted.
    #[error("store error: {0}")]
    Store(String),

    /// API misuse such as writing outside a transaction or nesting
    /// transactions. Indicates a bug in the caller; not meant to be
    /// caught for recovery.
    #[error("programming error: {0}")]
    Programming(String),
}

impl Error {
    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a sync-rejected error.
    pub fn sync_rejected(message: impl Into<String>) -> Self {
        Self::SyncRejected(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a programming error.
    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming(message.into())
    }
}
