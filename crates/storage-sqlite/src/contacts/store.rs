//! Durable store backend over SQLite in WAL mode.
//!
//! Reads go through an r2d2 pool and observe the last committed state.
//! Writes go through one dedicated writer connection driving
//! `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`, so a sync transaction
//! spans store calls until its guard resolves.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use diesel::dsl::sql;
use diesel::prelude::*;
use log::debug;

use contacts_cache_core::contacts::{CachedContact, ContactPayload};
use contacts_cache_core::errors::{Error, Result};
use contacts_cache_core::store::{ContactsCacheStore, StoreTransaction, TxHandle};
use contacts_cache_core::sync::{SyncState, UpsertOutcome};

use crate::contacts::model::{encode_string_list, ContactRowDB, SyncStateDB};
use crate::db::{self, SqlitePool};
use crate::errors::StorageError;
use crate::schema::{synced_contacts_cache, synced_contacts_sync_state};

struct Writer {
    conn: SqliteConnection,
    in_transaction: bool,
}

/// SQLite implementation of the store contract.
pub struct SqliteContactsCacheStore {
    pool: Arc<SqlitePool>,
    writer: Mutex<Writer>,
}

impl SqliteContactsCacheStore {
    /// Opens (creating if needed) the cache database at `db_path` and
    /// runs pending migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut conn = db::establish_connection(db_path)?;
        db::run_migrations(&mut conn)?;
        let pool = db::create_pool(db_path)?;
        debug!("opened contacts cache database at {}", db_path.display());
        Ok(Self {
            pool,
            writer: Mutex::new(Writer {
                conn,
                in_transaction: false,
            }),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Writer>> {
        self.writer
            .lock()
            .map_err(|_| Error::store("writer connection lock poisoned"))
    }

    /// Locks the writer and verifies a transaction is active.
    fn write_conn(&self) -> Result<MutexGuard<'_, Writer>> {
        let guard = self.writer()?;
        if !guard.in_transaction {
            return Err(Error::programming(
                "write operation requires an active transaction",
            ));
        }
        Ok(guard)
    }

    fn encode_payload_json(payload: &ContactPayload) -> Result<(String, String)> {
        let phones_json = encode_string_list(&payload.phones)
            .map_err(|err| Error::store(format!("failed to encode phone list: {err}")))?;
        let emails_json = encode_string_list(&payload.emails)
            .map_err(|err| Error::store(format!("failed to encode email list: {err}")))?;
        Ok((phones_json, emails_json))
    }
}

struct SqliteTx<'a> {
    store: &'a SqliteContactsCacheStore,
}

impl TxHandle for SqliteTx<'_> {
    fn commit(&mut self) -> Result<()> {
        let mut writer = self.store.writer()?;
        if !writer.in_transaction {
            return Err(Error::programming("transaction already closed"));
        }
        if let Err(err) = diesel::sql_query("COMMIT").execute(&mut writer.conn) {
            let _ = diesel::sql_query("ROLLBACK").execute(&mut writer.conn);
            writer.in_transaction = false;
            return Err(StorageError::from(err).into());
        }
        writer.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut writer = self.store.writer()?;
        if !writer.in_transaction {
            return Ok(());
        }
        diesel::sql_query("ROLLBACK")
            .execute(&mut writer.conn)
            .map_err(StorageError::from)?;
        writer.in_transaction = false;
        Ok(())
    }
}

impl ContactsCacheStore for SqliteContactsCacheStore {
    fn begin_transaction(&self) -> Result<StoreTransaction<'_>> {
        let mut writer = self.writer()?;
        if writer.in_transaction {
            return Err(Error::programming("nested transactions are not supported"));
        }
        diesel::sql_query("BEGIN IMMEDIATE")
            .execute(&mut writer.conn)
            .map_err(StorageError::from)?;
        writer.in_transaction = true;
        drop(writer);
        Ok(StoreTransaction::new(Box::new(SqliteTx { store: self })))
    }

    fn upsert_contact(
        &self,
        source_device: &str,
        payload: &ContactPayload,
        now_ms: i64,
    ) -> Result<UpsertOutcome> {
        let mut writer = self.write_conn()?;
        let conn = &mut writer.conn;

        let existing = synced_contacts_cache::table
            .find((source_device, &payload.external_contact_id))
            .first::<ContactRowDB>(conn)
            .optional()
            .map_err(StorageError::from)?;

        let (phones_json, emails_json) = Self::encode_payload_json(payload)?;

        let Some(existing) = existing else {
            let row = ContactRowDB {
                source_device: source_device.to_string(),
                external_contact_id: payload.external_contact_id.clone(),
                display_name: payload.display_name.clone(),
                phones_json,
                emails_json,
                avatar_etag: payload.avatar_etag.clone(),
                source_version: payload.source_version,
                source_last_modified_ms: payload.source_last_modified_ms,
                local_updated_ms: now_ms,
                deleted: 0,
            };
            diesel::insert_into(synced_contacts_cache::table)
                .values(&row)
                .execute(conn)
                .map_err(StorageError::from)?;
            return Ok(UpsertOutcome::Inserted);
        };

        if payload.source_version < existing.source_version {
            return Ok(UpsertOutcome::StaleIgnored);
        }
        if payload.source_version == existing.source_version
            && payload.source_last_modified_ms < existing.source_last_modified_ms
        {
            return Ok(UpsertOutcome::StaleIgnored);
        }

        let unchanged = existing.deleted == 0
            && existing.display_name == payload.display_name
            && existing.phones_json == phones_json
            && existing.emails_json == emails_json
            && existing.avatar_etag == payload.avatar_etag
            && existing.source_version == payload.source_version
            && existing.source_last_modified_ms == payload.source_last_modified_ms;
        if unchanged {
            return Ok(UpsertOutcome::Unchanged);
        }

        diesel::update(
            synced_contacts_cache::table.find((source_device, &payload.external_contact_id)),
        )
        .set((
            synced_contacts_cache::display_name.eq(&payload.display_name),
            synced_contacts_cache::phones_json.eq(&phones_json),
            synced_contacts_cache::emails_json.eq(&emails_json),
            synced_contacts_cache::avatar_etag.eq(payload.avatar_etag.as_deref()),
            synced_contacts_cache::source_version.eq(payload.source_version),
            synced_contacts_cache::source_last_modified_ms.eq(payload.source_last_modified_ms),
            synced_contacts_cache::local_updated_ms.eq(now_ms),
            synced_contacts_cache::deleted.eq(0),
        ))
        .execute(conn)
        .map_err(StorageError::from)?;

        Ok(UpsertOutcome::Updated)
    }

    fn mark_deleted(
        &self,
        source_device: &str,
        external_contact_ids: &[String],
        now_ms: i64,
    ) -> Result<usize> {
        let mut writer = self.write_conn()?;
        if external_contact_ids.is_empty() {
            return Ok(0);
        }

        let changed = diesel::update(
            synced_contacts_cache::table
                .filter(synced_contacts_cache::source_device.eq(source_device))
                .filter(synced_contacts_cache::external_contact_id.eq_any(external_contact_ids))
                .filter(synced_contacts_cache::deleted.eq(0)),
        )
        .set((
            synced_contacts_cache::deleted.eq(1),
            synced_contacts_cache::local_updated_ms.eq(now_ms),
        ))
        .execute(&mut writer.conn)
        .map_err(StorageError::from)?;
        Ok(changed)
    }

    fn mark_missing_deleted(
        &self,
        source_device: &str,
        live_contact_ids: &HashSet<String>,
        now_ms: i64,
    ) -> Result<usize> {
        let mut writer = self.write_conn()?;
        let tombstone = (
            synced_contacts_cache::deleted.eq(1),
            synced_contacts_cache::local_updated_ms.eq(now_ms),
        );

        let changed = if live_contact_ids.is_empty() {
            diesel::update(
                synced_contacts_cache::table
                    .filter(synced_contacts_cache::source_device.eq(source_device))
                    .filter(synced_contacts_cache::deleted.eq(0)),
            )
            .set(tombstone)
            .execute(&mut writer.conn)
        } else {
            let live: Vec<&str> = live_contact_ids.iter().map(String::as_str).collect();
            diesel::update(
                synced_contacts_cache::table
                    .filter(synced_contacts_cache::source_device.eq(source_device))
                    .filter(synced_contacts_cache::deleted.eq(0))
                    .filter(synced_contacts_cache::external_contact_id.ne_all(live)),
            )
            .set(tombstone)
            .execute(&mut writer.conn)
        }
        .map_err(StorageError::from)?;
        Ok(changed)
    }

    fn purge_deleted_before(&self, cutoff_ms: i64) -> Result<usize> {
        let mut writer = self.writer()?;
        let purged = diesel::delete(
            synced_contacts_cache::table
                .filter(synced_contacts_cache::deleted.eq(1))
                .filter(synced_contacts_cache::local_updated_ms.lt(cutoff_ms)),
        )
        .execute(&mut writer.conn)
        .map_err(StorageError::from)?;
        Ok(purged)
    }

    fn list_active_contacts(
        &self,
        source_device: &str,
        name_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CachedContact>> {
        let mut conn = db::get_connection(&self.pool)?;

        let mut query = synced_contacts_cache::table
            .filter(synced_contacts_cache::source_device.eq(source_device))
            .filter(synced_contacts_cache::deleted.eq(0))
            .into_boxed();

        if let Some(prefix) = name_prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
            query = query.filter(synced_contacts_cache::display_name.like(format!("{prefix}%")));
        }

        query = query
            .order(sql::<diesel::sql_types::Text>(
                "display_name COLLATE NOCASE ASC",
            ))
            .then_order_by(synced_contacts_cache::external_contact_id.asc());

        if limit > 0 {
            query = query.limit(limit as i64);
        }

        let rows = query
            .load::<ContactRowDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(CachedContact::from).collect())
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        let mut conn = db::get_connection(&self.pool)?;
        let row = synced_contacts_sync_state::table
            .find(source_device)
            .first::<SyncStateDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(SyncState::from))
    }

    fn upsert_sync_state(
        &self,
        source_device: &str,
        last_full_sync_ms: i64,
        last_sync_token: Option<&str>,
        last_source_sync_sequence: i64,
        cache_schema_version: i32,
    ) -> Result<()> {
        let mut writer = self.write_conn()?;
        let row = SyncStateDB {
            source_device: source_device.to_string(),
            last_full_sync_ms,
            last_sync_token: last_sync_token.map(str::to_string),
            last_source_sync_sequence,
            cache_schema_version,
        };

        diesel::insert_into(synced_contacts_sync_state::table)
            .values(&row)
            .on_conflict(synced_contacts_sync_state::source_device)
            .do_update()
            .set((
                synced_contacts_sync_state::last_full_sync_ms.eq(last_full_sync_ms),
                synced_contacts_sync_state::last_sync_token.eq(last_sync_token),
                synced_contacts_sync_state::last_source_sync_sequence
                    .eq(last_source_sync_sequence),
                synced_contacts_sync_state::cache_schema_version.eq(cache_schema_version),
            ))
            .execute(&mut writer.conn)
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn count_active_contacts(&self, source_device: &str) -> Result<usize> {
        let mut conn = db::get_connection(&self.pool)?;
        let count: i64 = synced_contacts_cache::table
            .filter(synced_contacts_cache::source_device.eq(source_device))
            .filter(synced_contacts_cache::deleted.eq(0))
            .count()
            .get_result(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }
}
