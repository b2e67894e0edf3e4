//! Transactional store contract consumed by the sync engine.

mod memory;

pub use memory::InMemoryContactsCacheStore;

use std::collections::HashSet;

use crate::contacts::{CachedContact, ContactPayload};
use crate::errors::Result;
use crate::sync::{SyncState, UpsertOutcome};

/// Backend hook driven by [`StoreTransaction`]. Implementations finish
/// the write transaction opened by `begin_transaction`.
pub trait TxHandle {
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Scoped write transaction guard.
///
/// [`StoreTransaction::commit`] consumes the guard and makes every
/// mutation since `begin_transaction` visible at once. Dropping the
/// guard without committing rolls the transaction back, so every early
/// exit path leaves the store at its pre-begin snapshot.
pub struct StoreTransaction<'a> {
    handle: Option<Box<dyn TxHandle + 'a>>,
}

impl<'a> StoreTransaction<'a> {
    pub fn new(handle: Box<dyn TxHandle + 'a>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> Result<()> {
        match self.handle.take() {
            Some(mut handle) => handle.commit(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for StoreTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransaction").finish()
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.rollback() {
                log::error!("failed to roll back store transaction: {err}");
            }
        }
    }
}

/// Persistence contract for the per-source contacts cache.
///
/// Mutations (`upsert_contact`, `mark_deleted`, `mark_missing_deleted`,
/// `upsert_sync_state`) require an active transaction and fail with a
/// programming error otherwise. Readers and `purge_deleted_before` need
/// no transaction and observe the last committed state. No operation
/// ever touches rows under a different source device than the one named
/// in the call.
pub trait ContactsCacheStore: Send + Sync {
    /// Opens a scoped write transaction. Nested transactions are not
    /// supported and fail with a programming error.
    fn begin_transaction(&self) -> Result<StoreTransaction<'_>>;

    /// Inserts or updates one contact row, resolving conflicts by source
    /// version and then source modification time. A payload older than
    /// the stored row is ignored; an equal payload on a live row is a
    /// no-op; everything else overwrites all fields, clears the
    /// tombstone, and stamps `local_updated_ms = now_ms`.
    fn upsert_contact(
        &self,
        source_device: &str,
        payload: &ContactPayload,
        now_ms: i64,
    ) -> Result<UpsertOutcome>;

    /// Tombstones the named rows that are currently live. Returns the
    /// number of rows actually flipped; an empty id set is a no-op.
    fn mark_deleted(
        &self,
        source_device: &str,
        external_contact_ids: &[String],
        now_ms: i64,
    ) -> Result<usize>;

    /// Tombstones every live row for the source whose id is not in
    /// `live_contact_ids`. An empty live set tombstones all of them.
    fn mark_missing_deleted(
        &self,
        source_device: &str,
        live_contact_ids: &HashSet<String>,
        now_ms: i64,
    ) -> Result<usize>;

    /// Permanently removes tombstoned rows whose `local_updated_ms` is
    /// older than the cutoff, across all sources.
    fn purge_deleted_before(&self, cutoff_ms: i64) -> Result<usize>;

    /// Lists live rows for the source, optionally filtered by a
    /// case-insensitive display-name prefix, ordered by display name
    /// (case-insensitive) then external id. A `limit` of zero means
    /// unlimited.
    fn list_active_contacts(
        &self,
        source_device: &str,
        name_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CachedContact>>;

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>>;

    /// Creates or overwrites the source's sync-state row.
    fn upsert_sync_state(
        &self,
        source_device: &str,
        last_full_sync_ms: i64,
        last_sync_token: Option<&str>,
        last_source_sync_sequence: i64,
        cache_schema_version: i32,
    ) -> Result<()>;

    fn count_active_contacts(&self, source_device: &str) -> Result<usize>;
}
