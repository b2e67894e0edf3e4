//! In-memory store backend with snapshot-and-rollback transactions.
//!
//! Reference implementation of the store contract, used by unit tests.
//! A transaction snapshots both maps up front; rollback swaps the
//! snapshot back in.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::contacts::{CachedContact, ContactPayload};
use crate::errors::{Error, Result};
use crate::store::{ContactsCacheStore, StoreTransaction, TxHandle};
use crate::sync::{SyncState, UpsertOutcome};

#[derive(Clone, PartialEq)]
struct ContactRow {
    external_contact_id: String,
    display_name: String,
    phones: Vec<String>,
    emails: Vec<String>,
    avatar_etag: Option<String>,
    source_version: i64,
    source_last_modified_ms: i64,
    local_updated_ms: i64,
    deleted: bool,
}

impl ContactRow {
    fn from_payload(payload: &ContactPayload, now_ms: i64) -> Self {
        Self {
            external_contact_id: payload.external_contact_id.clone(),
            display_name: payload.display_name.clone(),
            phones: payload.phones.clone(),
            emails: payload.emails.clone(),
            avatar_etag: payload.avatar_etag.clone(),
            source_version: payload.source_version,
            source_last_modified_ms: payload.source_last_modified_ms,
            local_updated_ms: now_ms,
            deleted: false,
        }
    }

    fn matches(&self, payload: &ContactPayload) -> bool {
        self.display_name == payload.display_name
            && self.phones == payload.phones
            && self.emails == payload.emails
            && self.avatar_etag == payload.avatar_etag
            && self.source_version == payload.source_version
            && self.source_last_modified_ms == payload.source_last_modified_ms
    }

    fn apply_payload(&mut self, payload: &ContactPayload, now_ms: i64) {
        self.display_name = payload.display_name.clone();
        self.phones = payload.phones.clone();
        self.emails = payload.emails.clone();
        self.avatar_etag = payload.avatar_etag.clone();
        self.source_version = payload.source_version;
        self.source_last_modified_ms = payload.source_last_modified_ms;
        self.local_updated_ms = now_ms;
        self.deleted = false;
    }

    fn to_cached(&self, source_device: &str) -> CachedContact {
        CachedContact {
            source_device: source_device.to_string(),
            external_contact_id: self.external_contact_id.clone(),
            display_name: self.display_name.clone(),
            phones: self.phones.clone(),
            emails: self.emails.clone(),
            avatar_etag: self.avatar_etag.clone(),
            source_version: self.source_version,
            source_last_modified_ms: self.source_last_modified_ms,
            local_updated_ms: self.local_updated_ms,
        }
    }
}

type ContactsByDevice = HashMap<String, HashMap<String, ContactRow>>;

#[derive(Default)]
struct Inner {
    contacts_by_device: ContactsByDevice,
    sync_state_by_device: HashMap<String, SyncState>,
    in_transaction: bool,
    tx_contacts_snapshot: Option<ContactsByDevice>,
    tx_sync_state_snapshot: Option<HashMap<String, SyncState>>,
}

impl Inner {
    fn require_active_transaction(&self) -> Result<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(Error::programming(
                "write operation requires an active transaction",
            ))
        }
    }
}

/// In-memory implementation of the store contract.
#[derive(Default)]
pub struct InMemoryContactsCacheStore {
    inner: Mutex<Inner>,
}

impl InMemoryContactsCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::store("in-memory store lock poisoned"))
    }

    fn commit_transaction(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Ok(());
        }
        inner.in_transaction = false;
        inner.tx_contacts_snapshot = None;
        inner.tx_sync_state_snapshot = None;
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Ok(());
        }
        if let Some(snapshot) = inner.tx_contacts_snapshot.take() {
            inner.contacts_by_device = snapshot;
        }
        if let Some(snapshot) = inner.tx_sync_state_snapshot.take() {
            inner.sync_state_by_device = snapshot;
        }
        inner.in_transaction = false;
        Ok(())
    }
}

struct MemoryTx<'a> {
    store: &'a InMemoryContactsCacheStore,
}

impl TxHandle for MemoryTx<'_> {
    fn commit(&mut self) -> Result<()> {
        self.store.commit_transaction()
    }

    fn rollback(&mut self) -> Result<()> {
        self.store.rollback_transaction()
    }
}

impl ContactsCacheStore for InMemoryContactsCacheStore {
    fn begin_transaction(&self) -> Result<StoreTransaction<'_>> {
        let mut inner = self.lock()?;
        if inner.in_transaction {
            return Err(Error::programming("nested transactions are not supported"));
        }
        inner.tx_contacts_snapshot = Some(inner.contacts_by_device.clone());
        inner.tx_sync_state_snapshot = Some(inner.sync_state_by_device.clone());
        inner.in_transaction = true;
        drop(inner);
        Ok(StoreTransaction::new(Box::new(MemoryTx { store: self })))
    }

    fn upsert_contact(
        &self,
        source_device: &str,
        payload: &ContactPayload,
        now_ms: i64,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.lock()?;
        inner.require_active_transaction()?;

        let device_contacts = inner
            .contacts_by_device
            .entry(source_device.to_string())
            .or_default();

        match device_contacts.get_mut(&payload.external_contact_id) {
            None => {
                device_contacts.insert(
                    payload.external_contact_id.clone(),
                    ContactRow::from_payload(payload, now_ms),
                );
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) => {
                if payload.source_version < existing.source_version {
                    return Ok(UpsertOutcome::StaleIgnored);
                }
                if payload.source_version == existing.source_version
                    && payload.source_last_modified_ms < existing.source_last_modified_ms
                {
                    return Ok(UpsertOutcome::StaleIgnored);
                }
                if !existing.deleted && existing.matches(payload) {
                    return Ok(UpsertOutcome::Unchanged);
                }
                existing.apply_payload(payload, now_ms);
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    fn mark_deleted(
        &self,
        source_device: &str,
        external_contact_ids: &[String],
        now_ms: i64,
    ) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.require_active_transaction()?;

        if external_contact_ids.is_empty() {
            return Ok(0);
        }
        let Some(device_contacts) = inner.contacts_by_device.get_mut(source_device) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for id in external_contact_ids {
            if let Some(contact) = device_contacts.get_mut(id) {
                if !contact.deleted {
                    contact.deleted = true;
                    contact.local_updated_ms = now_ms;
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    fn mark_missing_deleted(
        &self,
        source_device: &str,
        live_contact_ids: &HashSet<String>,
        now_ms: i64,
    ) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.require_active_transaction()?;

        let Some(device_contacts) = inner.contacts_by_device.get_mut(source_device) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for contact in device_contacts.values_mut() {
            if !contact.deleted && !live_contact_ids.contains(&contact.external_contact_id) {
                contact.deleted = true;
                contact.local_updated_ms = now_ms;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn purge_deleted_before(&self, cutoff_ms: i64) -> Result<usize> {
        let mut inner = self.lock()?;

        let mut purged = 0;
        for contacts in inner.contacts_by_device.values_mut() {
            let before = contacts.len();
            contacts.retain(|_, contact| !(contact.deleted && contact.local_updated_ms < cutoff_ms));
            purged += before - contacts.len();
        }
        Ok(purged)
    }

    fn list_active_contacts(
        &self,
        source_device: &str,
        name_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CachedContact>> {
        let inner = self.lock()?;

        let Some(device_contacts) = inner.contacts_by_device.get(source_device) else {
            return Ok(Vec::new());
        };

        let prefix_lower = name_prefix
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_lowercase);

        let mut result: Vec<CachedContact> = device_contacts
            .values()
            .filter(|contact| !contact.deleted)
            .filter(|contact| match &prefix_lower {
                Some(prefix) => contact.display_name.to_lowercase().starts_with(prefix),
                None => true,
            })
            .map(|contact| contact.to_cached(source_device))
            .collect();

        result.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.external_contact_id.cmp(&b.external_contact_id))
        });

        if limit > 0 {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        let inner = self.lock()?;
        Ok(inner.sync_state_by_device.get(source_device).cloned())
    }

    fn upsert_sync_state(
        &self,
        source_device: &str,
        last_full_sync_ms: i64,
        last_sync_token: Option<&str>,
        last_source_sync_sequence: i64,
        cache_schema_version: i32,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner.require_active_transaction()?;

        inner.sync_state_by_device.insert(
            source_device.to_string(),
            SyncState {
                source_device: source_device.to_string(),
                last_full_sync_ms,
                last_sync_token: last_sync_token.map(str::to_string),
                last_source_sync_sequence,
                cache_schema_version,
            },
        );
        Ok(())
    }

    fn count_active_contacts(&self, source_device: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner
            .contacts_by_device
            .get(source_device)
            .map(|contacts| contacts.values().filter(|c| !c.deleted).count())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str, name: &str, version: i64) -> ContactPayload {
        ContactPayload::new(id, name, vec![], vec![], None, version, version * 100)
    }

    #[test]
    fn write_outside_transaction_is_a_programming_error() {
        let store = InMemoryContactsCacheStore::new();
        let err = store
            .upsert_contact("device", &payload("c1", "Alex", 1), 1_000)
            .unwrap_err();
        assert!(matches!(err, Error::Programming(_)));
    }

    #[test]
    fn nested_transaction_is_rejected() {
        let store = InMemoryContactsCacheStore::new();
        let _tx = store.begin_transaction().unwrap();
        let err = store.begin_transaction().unwrap_err();
        assert!(matches!(err, Error::Programming(_)));
    }

    #[test]
    fn dropped_transaction_rolls_back_all_writes() {
        let store = InMemoryContactsCacheStore::new();
        {
            let _tx = store.begin_transaction().unwrap();
            store
                .upsert_contact("device", &payload("c1", "Alex", 1), 1_000)
                .unwrap();
            store
                .upsert_sync_state("device", 1_000, Some("token"), 1, 1)
                .unwrap();
        }
        assert_eq!(store.count_active_contacts("device").unwrap(), 0);
        assert!(store.get_sync_state("device").unwrap().is_none());
    }

    #[test]
    fn committed_transaction_keeps_writes() {
        let store = InMemoryContactsCacheStore::new();
        let tx = store.begin_transaction().unwrap();
        store
            .upsert_contact("device", &payload("c1", "Alex", 1), 1_000)
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_active_contacts("device").unwrap(), 1);
    }

    #[test]
    fn transaction_usable_again_after_rollback() {
        let store = InMemoryContactsCacheStore::new();
        {
            let _tx = store.begin_transaction().unwrap();
        }
        let tx = store.begin_transaction().unwrap();
        store
            .upsert_contact("device", &payload("c1", "Alex", 1), 1_000)
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_active_contacts("device").unwrap(), 1);
    }

    #[test]
    fn purge_removes_only_old_tombstones() {
        let store = InMemoryContactsCacheStore::new();
        let tx = store.begin_transaction().unwrap();
        store
            .upsert_contact("device", &payload("old", "Old", 1), 100)
            .unwrap();
        store
            .upsert_contact("device", &payload("new", "New", 1), 100)
            .unwrap();
        store
            .mark_deleted("device", &["old".to_string()], 500)
            .unwrap();
        store
            .mark_deleted("device", &["new".to_string()], 2_000)
            .unwrap();
        tx.commit().unwrap();

        let purged = store.purge_deleted_before(1_000).unwrap();
        assert_eq!(purged, 1);

        // The newer tombstone survives until its cutoff passes.
        let purged = store.purge_deleted_before(3_000).unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn listing_orders_case_insensitively_then_by_id() {
        let store = InMemoryContactsCacheStore::new();
        let tx = store.begin_transaction().unwrap();
        store
            .upsert_contact("device", &payload("c2", "bob", 1), 1_000)
            .unwrap();
        store
            .upsert_contact("device", &payload("c1", "Alice", 1), 1_000)
            .unwrap();
        store
            .upsert_contact("device", &payload("c3", "Bob", 1), 1_000)
            .unwrap();
        tx.commit().unwrap();

        let listed = store.list_active_contacts("device", None, 0).unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.display_name.as_str()).collect();
        let ids: Vec<&str> = listed
            .iter()
            .map(|c| c.external_contact_id.as_str())
            .collect();
        assert_eq!(names, vec!["Alice", "bob", "Bob"]);
        assert_eq!(ids, vec!["c1", "c2", "c3"]);

        let limited = store.list_active_contacts("device", None, 2).unwrap();
        assert_eq!(limited.len(), 2);

        let prefixed = store.list_active_contacts("device", Some("BO"), 0).unwrap();
        assert_eq!(prefixed.len(), 2);
    }
}
