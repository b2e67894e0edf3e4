//! Models exchanged between source adapters, the engine, and the store.

use serde::{Deserialize, Serialize};

/// Outcome of a single contact upsert inside a sync transaction. Closed
/// enumeration: the engine tallies it exhaustively into the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    StaleIgnored,
}

/// Metadata accompanying a sync batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Opaque resume token minted by the source; stored, never parsed.
    pub sync_token: Option<String>,
    /// Monotonic sequence the source assigns to each sync; `0` disables
    /// the regression check.
    pub source_sync_sequence: i64,
    /// Full sync only: absent ids are tombstoned when `true`. Delta sync
    /// ignores this flag.
    pub complete_snapshot: bool,
    /// Explicit recovery override for the sequence regression check.
    pub allow_sequence_regression: bool,
}

impl SyncMetadata {
    /// Metadata for a full sync batch.
    pub fn full(sync_token: Option<String>, source_sync_sequence: i64, complete_snapshot: bool) -> Self {
        Self {
            sync_token,
            source_sync_sequence,
            complete_snapshot,
            allow_sequence_regression: false,
        }
    }

    /// Metadata for a delta sync batch.
    pub fn delta(sync_token: Option<String>, source_sync_sequence: i64) -> Self {
        Self {
            sync_token,
            source_sync_sequence,
            complete_snapshot: false,
            allow_sequence_regression: false,
        }
    }
}

/// Per-source sync bookkeeping, overwritten on every successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub source_device: String,
    /// Epoch-ms of the last successful sync of any kind, full or delta.
    pub last_full_sync_ms: i64,
    pub last_sync_token: Option<String>,
    pub last_source_sync_sequence: i64,
    pub cache_schema_version: i32,
}

/// Tally of what a sync applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub stale_ignored: usize,
    pub invalid_dropped: usize,
    /// When `true`, deletions must not be inferred from absence.
    pub partial_snapshot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_outcome_serializes_snake_case() {
        let actual = [
            UpsertOutcome::Inserted,
            UpsertOutcome::Updated,
            UpsertOutcome::Unchanged,
            UpsertOutcome::StaleIgnored,
        ]
        .iter()
        .map(|outcome| serde_json::to_string(outcome).expect("serialize outcome"))
        .collect::<Vec<_>>();

        assert_eq!(
            actual,
            vec![
                "\"inserted\"",
                "\"updated\"",
                "\"unchanged\"",
                "\"stale_ignored\"",
            ]
        );
    }

    #[test]
    fn delta_metadata_never_claims_complete_snapshot() {
        let metadata = SyncMetadata::delta(Some("token".to_string()), 5);
        assert!(!metadata.complete_snapshot);
        assert!(!metadata.allow_sequence_regression);
    }
}
