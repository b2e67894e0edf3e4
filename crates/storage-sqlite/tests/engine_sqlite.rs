//! End-to-end sync engine scenarios over the SQLite backend.

use std::path::Path;
use std::sync::Arc;

use contacts_cache_core::clock::FixedClock;
use contacts_cache_core::contacts::ContactPayload;
use contacts_cache_core::errors::Error;
use contacts_cache_core::limits::CacheLimits;
use contacts_cache_core::store::ContactsCacheStore;
use contacts_cache_core::sync::{ContactSyncEngine, SyncMetadata, CACHE_SCHEMA_VERSION};
use contacts_cache_storage_sqlite::SqliteContactsCacheStore;

fn contact(id: &str, name: &str, phones: &[&str], emails: &[&str], version: i64, modified_ms: i64) -> ContactPayload {
    ContactPayload::new(
        id,
        name,
        phones.iter().map(|p| p.to_string()).collect(),
        emails.iter().map(|e| e.to_string()).collect(),
        None,
        version,
        modified_ms,
    )
}

fn open_engine(db_path: &Path, now_ms: i64) -> (Arc<SqliteContactsCacheStore>, ContactSyncEngine) {
    let store = Arc::new(SqliteContactsCacheStore::open(db_path).expect("open store"));
    let engine = ContactSyncEngine::new(
        store.clone(),
        CacheLimits::production_defaults(),
        Arc::new(FixedClock(now_ms)),
    );
    (store, engine)
}

#[test]
fn full_sync_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");

    {
        let (_store, engine) = open_engine(&db_path, 1_000);
        let summary = engine
            .apply_full_sync(
                "pixel8-bt",
                &[
                    contact("c1", "Alex", &["+1 555-0001"], &["ALEX@EXAMPLE.COM"], 1, 100),
                    contact("c2", "Priya", &["+1 555-0002"], &["priya@example.com"], 1, 100),
                ],
                Some(SyncMetadata::full(Some("token-1".to_string()), 10, true)),
            )
            .unwrap();
        assert_eq!(summary.inserted, 2);
    }

    // Cold start: a fresh store over the same file serves the committed
    // rows without any further sync.
    let (store, engine) = open_engine(&db_path, 2_000);
    assert_eq!(engine.count_active_contacts("pixel8-bt").unwrap(), 2);

    let listed = engine
        .list_active_contacts("pixel8-bt", None, 10)
        .unwrap();
    assert_eq!(listed[0].display_name, "Alex");
    assert_eq!(listed[0].phones, vec!["+15550001"]);
    assert_eq!(listed[0].emails, vec!["alex@example.com"]);
    assert_eq!(listed[1].display_name, "Priya");

    let state = store.get_sync_state("pixel8-bt").unwrap().unwrap();
    assert_eq!(state.last_full_sync_ms, 1_000);
    assert_eq!(state.last_sync_token.as_deref(), Some("token-1"));
    assert_eq!(state.last_source_sync_sequence, 10);
    assert_eq!(state.cache_schema_version, CACHE_SCHEMA_VERSION);
}

#[test]
fn complete_snapshot_tombstones_missing_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");
    let (store, engine) = open_engine(&db_path, 1_000);

    engine
        .apply_full_sync(
            "pixel8-bt",
            &[
                contact("c1", "Alex", &["+1-555-0001"], &[], 1, 100),
                contact("c2", "Priya", &["+1-555-0002"], &[], 1, 100),
            ],
            Some(SyncMetadata::full(Some("token-1".to_string()), 11, true)),
        )
        .unwrap();

    let summary = engine
        .apply_full_sync(
            "pixel8-bt",
            &[contact("c2", "Priya", &["+1-555-0002"], &[], 1, 100)],
            Some(SyncMetadata::full(Some("token-2".to_string()), 12, true)),
        )
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(store.count_active_contacts("pixel8-bt").unwrap(), 1);

    // The tombstone survives until purge, then the row is gone for good.
    assert_eq!(store.purge_deleted_before(500).unwrap(), 0);
    assert_eq!(store.purge_deleted_before(2_000).unwrap(), 1);
}

#[test]
fn delta_sync_applies_upserts_and_deletions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");
    let (store, engine) = open_engine(&db_path, 1_000);

    engine
        .apply_full_sync(
            "pixel8-bt",
            &[
                contact("c1", "Alex", &["+1-555-0001"], &[], 1, 100),
                contact("c2", "Priya", &["+1-555-0002"], &[], 1, 100),
            ],
            Some(SyncMetadata::full(None, 15, true)),
        )
        .unwrap();

    let summary = engine
        .apply_delta_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-7777"], &[], 2, 200)],
            &["c1".to_string(), "c2".to_string()],
            Some(SyncMetadata::delta(None, 16)),
        )
        .unwrap();

    // c1 appears in both sets: the upsert wins and only c2 is deleted.
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.deleted, 1);

    let active = engine.list_active_contacts("pixel8-bt", None, 10).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].external_contact_id, "c1");
    assert_eq!(active[0].phones, vec!["+15557777"]);
    assert_eq!(store.count_active_contacts("pixel8-bt").unwrap(), 1);
}

#[test]
fn stale_payload_leaves_stored_row_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");
    let (_store, engine) = open_engine(&db_path, 1_000);

    engine
        .apply_full_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-0001"], &[], 2, 200)],
            Some(SyncMetadata::full(None, 17, true)),
        )
        .unwrap();

    let summary = engine
        .apply_delta_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-9999"], &[], 1, 100)],
            &[],
            Some(SyncMetadata::delta(None, 18)),
        )
        .unwrap();

    assert_eq!(summary.stale_ignored, 1);
    let active = engine.list_active_contacts("pixel8-bt", None, 10).unwrap();
    assert_eq!(active[0].phones, vec!["+15550001"]);
}

#[test]
fn sequence_regression_aborts_without_visible_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");
    let (store, engine) = open_engine(&db_path, 1_000);

    engine
        .apply_full_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-0001"], &[], 1, 100)],
            Some(SyncMetadata::full(Some("token-1".to_string()), 20, true)),
        )
        .unwrap();

    let err = engine
        .apply_delta_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-0002"], &[], 2, 200)],
            &[],
            Some(SyncMetadata::delta(Some("token-2".to_string()), 19)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::SyncRejected(_)));

    let active = engine.list_active_contacts("pixel8-bt", None, 10).unwrap();
    assert_eq!(active[0].phones, vec!["+15550001"]);
    let state = store.get_sync_state("pixel8-bt").unwrap().unwrap();
    assert_eq!(state.last_source_sync_sequence, 20);
    assert_eq!(state.last_sync_token.as_deref(), Some("token-1"));

    // The engine remains usable for the next, well-formed batch.
    let summary = engine
        .apply_delta_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &["+1-555-0002"], &[], 2, 200)],
            &[],
            Some(SyncMetadata::delta(Some("token-3".to_string()), 21)),
        )
        .unwrap();
    assert_eq!(summary.updated, 1);
}

#[test]
fn reopening_reruns_migrations_idempotently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");

    let (_store, engine) = open_engine(&db_path, 1_000);
    engine
        .apply_full_sync(
            "pixel8-bt",
            &[contact("c1", "Alex", &[], &[], 1, 100)],
            Some(SyncMetadata::full(None, 1, true)),
        )
        .unwrap();
    drop(engine);

    // Opening twice more must neither fail nor lose data.
    let (_store, _engine) = open_engine(&db_path, 2_000);
    let (store, _engine) = open_engine(&db_path, 3_000);
    assert_eq!(store.count_active_contacts("pixel8-bt").unwrap(), 1);
}

#[test]
fn sources_stay_isolated_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("contacts_cache.db");
    let (store, engine) = open_engine(&db_path, 1_000);

    engine
        .apply_full_sync(
            "device-a",
            &[contact("c1", "Alex", &[], &[], 1, 100)],
            Some(SyncMetadata::full(None, 1, true)),
        )
        .unwrap();
    engine
        .apply_full_sync(
            "device-b",
            &[contact("c1", "Bianca", &[], &[], 1, 100)],
            Some(SyncMetadata::full(None, 1, true)),
        )
        .unwrap();

    // Emptying device-a with a complete snapshot leaves device-b alone.
    engine
        .apply_full_sync("device-a", &[], Some(SyncMetadata::full(None, 2, true)))
        .unwrap();

    assert_eq!(store.count_active_contacts("device-a").unwrap(), 0);
    assert_eq!(store.count_active_contacts("device-b").unwrap(), 1);
    let device_b = engine.list_active_contacts("device-b", None, 0).unwrap();
    assert_eq!(device_b[0].display_name, "Bianca");
}
