//! Contact synchronization engine.
//!
//! Validates batch metadata, normalizes and dedupes the incoming
//! contacts, then applies every operation inside one store transaction:
//! either the whole batch commits or none of it is visible.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::contacts::{normalizer, CachedContact, ContactPayload};
use crate::errors::{Error, Result};
use crate::limits::CacheLimits;
use crate::store::ContactsCacheStore;
use crate::sync::{SyncMetadata, SyncState, SyncSummary, UpsertOutcome};

/// Version stamped into each source's sync-state row.
pub const CACHE_SCHEMA_VERSION: i32 = 1;

/// Orchestrates full and delta syncs against a store backend. Holds no
/// mutable state between calls; limits and clock are fixed at
/// construction.
pub struct ContactSyncEngine {
    store: Arc<dyn ContactsCacheStore>,
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
}

impl ContactSyncEngine {
    pub fn new(
        store: Arc<dyn ContactsCacheStore>,
        limits: CacheLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            limits,
            clock,
        }
    }

    /// Engine with production limits and the system clock.
    pub fn with_defaults(store: Arc<dyn ContactsCacheStore>) -> Self {
        Self::new(
            store,
            CacheLimits::production_defaults(),
            Arc::new(SystemClock),
        )
    }

    /// Applies a batch asserting the current set of contacts from the
    /// source. When the metadata claims a complete snapshot, live rows
    /// absent from the batch are tombstoned; otherwise absence implies
    /// nothing and the summary reports a partial snapshot.
    pub fn apply_full_sync(
        &self,
        source_device: &str,
        contacts: &[ContactPayload],
        metadata: Option<SyncMetadata>,
    ) -> Result<SyncSummary> {
        let source = normalizer::normalize_source_device(source_device, &self.limits)?;
        let metadata = metadata.unwrap_or_else(|| SyncMetadata::full(None, 0, false));

        let batch = self.normalize_and_dedupe(contacts);
        self.ensure_device_capacity(batch.contacts.len())?;

        let now_ms = self.clock.now_ms();

        let tx = self.store.begin_transaction()?;
        self.ensure_sequence_monotonic(&source, &metadata)?;

        let mut tally = OutcomeTally::default();
        let mut live_ids: HashSet<String> = HashSet::with_capacity(batch.contacts.len());
        for payload in &batch.contacts {
            live_ids.insert(payload.external_contact_id.clone());
            tally.record(self.store.upsert_contact(&source, payload, now_ms)?);
        }

        let deleted = if metadata.complete_snapshot {
            self.store.mark_missing_deleted(&source, &live_ids, now_ms)?
        } else {
            0
        };

        self.store.upsert_sync_state(
            &source,
            now_ms,
            metadata.sync_token.as_deref(),
            metadata.source_sync_sequence,
            CACHE_SCHEMA_VERSION,
        )?;
        tx.commit()?;

        let summary = SyncSummary {
            inserted: tally.inserted,
            updated: tally.updated,
            unchanged: tally.unchanged,
            deleted,
            stale_ignored: tally.stale_ignored,
            invalid_dropped: batch.invalid_dropped,
            partial_snapshot: !metadata.complete_snapshot,
        };
        debug!("applied full sync for source={source}: {summary:?}");
        Ok(summary)
    }

    /// Applies a batch of explicit upserts and explicit deletion ids. An
    /// id appearing in both sets is treated as an upsert.
    pub fn apply_delta_sync(
        &self,
        source_device: &str,
        upserts: &[ContactPayload],
        deletions: &[String],
        metadata: Option<SyncMetadata>,
    ) -> Result<SyncSummary> {
        let source = normalizer::normalize_source_device(source_device, &self.limits)?;
        let metadata = metadata.unwrap_or_else(|| SyncMetadata::delta(None, 0));

        let batch = self.normalize_and_dedupe(upserts);
        let active = self.store.count_active_contacts(&source)?;
        self.ensure_device_capacity(batch.contacts.len() + active)?;

        let mut deletion_ids = self.normalize_deletion_ids(deletions);
        let upsert_ids: HashSet<&str> = batch
            .contacts
            .iter()
            .map(|payload| payload.external_contact_id.as_str())
            .collect();
        deletion_ids.retain(|id| !upsert_ids.contains(id.as_str()));

        let now_ms = self.clock.now_ms();

        let tx = self.store.begin_transaction()?;
        self.ensure_sequence_monotonic(&source, &metadata)?;

        let mut tally = OutcomeTally::default();
        for payload in &batch.contacts {
            tally.record(self.store.upsert_contact(&source, payload, now_ms)?);
        }

        let deleted = self.store.mark_deleted(&source, &deletion_ids, now_ms)?;

        self.store.upsert_sync_state(
            &source,
            now_ms,
            metadata.sync_token.as_deref(),
            metadata.source_sync_sequence,
            CACHE_SCHEMA_VERSION,
        )?;
        tx.commit()?;

        let summary = SyncSummary {
            inserted: tally.inserted,
            updated: tally.updated,
            unchanged: tally.unchanged,
            deleted,
            stale_ignored: tally.stale_ignored,
            invalid_dropped: batch.invalid_dropped,
            partial_snapshot: true,
        };
        debug!("applied delta sync for source={source}: {summary:?}");
        Ok(summary)
    }

    /// Lists live contacts for the source. Thin delegation to the store;
    /// the engine adds no caching layer.
    pub fn list_active_contacts(
        &self,
        source_device: &str,
        name_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CachedContact>> {
        let source = normalizer::normalize_source_device(source_device, &self.limits)?;
        self.store.list_active_contacts(&source, name_prefix, limit)
    }

    pub fn count_active_contacts(&self, source_device: &str) -> Result<usize> {
        let source = normalizer::normalize_source_device(source_device, &self.limits)?;
        self.store.count_active_contacts(&source)
    }

    pub fn get_sync_state(&self, source_device: &str) -> Result<Option<SyncState>> {
        let source = normalizer::normalize_source_device(source_device, &self.limits)?;
        self.store.get_sync_state(&source)
    }

    fn ensure_sequence_monotonic(
        &self,
        source_device: &str,
        metadata: &SyncMetadata,
    ) -> Result<()> {
        if metadata.source_sync_sequence <= 0 {
            return Ok(());
        }
        let Some(state) = self.store.get_sync_state(source_device)? else {
            return Ok(());
        };

        let incoming = metadata.source_sync_sequence;
        let previous = state.last_source_sync_sequence;
        if !metadata.allow_sequence_regression && incoming < previous {
            warn!(
                "rejecting sync for source={source_device}: sequence regression incoming={incoming} previous={previous}"
            );
            return Err(Error::sync_rejected(format!(
                "sequence regression, incoming={incoming} previous={previous}"
            )));
        }
        Ok(())
    }

    fn ensure_device_capacity(&self, requested_contact_count: usize) -> Result<()> {
        if requested_contact_count > self.limits.max_contacts_per_device {
            return Err(Error::sync_rejected(format!(
                "capacity exceeded, contact count {requested_contact_count} is over max_contacts_per_device={}",
                self.limits.max_contacts_per_device
            )));
        }
        Ok(())
    }

    /// Walks the input in order, dropping records the normalizer
    /// rejects and collapsing duplicate ids. A later duplicate replaces
    /// an earlier one only when it is preferred by the same rule the
    /// store's upsert uses, so dedupe yields the same end state as
    /// applying the batch sequentially.
    fn normalize_and_dedupe(&self, incoming: &[ContactPayload]) -> NormalizedBatch {
        let mut contacts: Vec<ContactPayload> = Vec::with_capacity(incoming.len());
        let mut index_by_id: HashMap<String, usize> = HashMap::with_capacity(incoming.len());
        let mut invalid_dropped = 0usize;

        for raw in incoming {
            let Some(normalized) = normalizer::normalize(raw, &self.limits) else {
                invalid_dropped += 1;
                continue;
            };

            match index_by_id.get(&normalized.external_contact_id) {
                None => {
                    index_by_id.insert(normalized.external_contact_id.clone(), contacts.len());
                    contacts.push(normalized);
                }
                Some(&index) => {
                    if is_preferred(&normalized, &contacts[index]) {
                        contacts[index] = normalized;
                    }
                }
            }
        }

        NormalizedBatch {
            contacts,
            invalid_dropped,
        }
    }

    fn normalize_deletion_ids(&self, deletions: &[String]) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for raw in deletions {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let id = normalizer::truncate_chars(trimmed, self.limits.max_external_id_chars);
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        ids
    }
}

/// A later duplicate wins over an earlier one iff it has a higher source
/// version, or the same version and an equal-or-newer modification time.
fn is_preferred(candidate: &ContactPayload, existing: &ContactPayload) -> bool {
    if candidate.source_version != existing.source_version {
        return candidate.source_version > existing.source_version;
    }
    candidate.source_last_modified_ms >= existing.source_last_modified_ms
}

#[derive(Default)]
struct OutcomeTally {
    inserted: usize,
    updated: usize,
    unchanged: usize,
    stale_ignored: usize,
}

impl OutcomeTally {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::StaleIgnored => self.stale_ignored += 1,
        }
    }
}

struct NormalizedBatch {
    contacts: Vec<ContactPayload>,
    invalid_dropped: usize,
}
