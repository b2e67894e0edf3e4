//! Database row models for the contacts cache tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use contacts_cache_core::contacts::CachedContact;
use contacts_cache_core::sync::SyncState;

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(source_device, external_contact_id))]
#[diesel(table_name = crate::schema::synced_contacts_cache)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ContactRowDB {
    pub source_device: String,
    pub external_contact_id: String,
    pub display_name: String,
    pub phones_json: String,
    pub emails_json: String,
    pub avatar_etag: Option<String>,
    pub source_version: i64,
    pub source_last_modified_ms: i64,
    pub local_updated_ms: i64,
    pub deleted: i32,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(source_device))]
#[diesel(table_name = crate::schema::synced_contacts_sync_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncStateDB {
    pub source_device: String,
    pub last_full_sync_ms: i64,
    pub last_sync_token: Option<String>,
    pub last_source_sync_sequence: i64,
    pub cache_schema_version: i32,
}

/// Encodes a phone or email list into its TEXT column representation.
pub(crate) fn encode_string_list(values: &[String]) -> Result<String, serde_json::Error> {
    serde_json::to_string(values)
}

/// Stored JSON that fails to decode degrades to an empty list rather
/// than failing the read.
pub(crate) fn decode_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

impl From<ContactRowDB> for CachedContact {
    fn from(row: ContactRowDB) -> Self {
        CachedContact {
            source_device: row.source_device,
            external_contact_id: row.external_contact_id,
            display_name: row.display_name,
            phones: decode_string_list(&row.phones_json),
            emails: decode_string_list(&row.emails_json),
            avatar_etag: row.avatar_etag,
            source_version: row.source_version,
            source_last_modified_ms: row.source_last_modified_ms,
            local_updated_ms: row.local_updated_ms,
        }
    }
}

impl From<SyncStateDB> for SyncState {
    fn from(row: SyncStateDB) -> Self {
        SyncState {
            source_device: row.source_device,
            last_full_sync_ms: row.last_full_sync_ms,
            last_sync_token: row.last_sync_token,
            last_source_sync_sequence: row.last_source_sync_sequence,
            cache_schema_version: row.cache_schema_version,
        }
    }
}
