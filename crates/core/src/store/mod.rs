//! Engine state and the downstream apply seam.
//!
//! [`StateStore`] holds what the engine needs between runs: committed
//! cursors, the last known ID set per scope, fingerprints of applied
//! records and run reports. [`DeltaSink`] is the collaborator that applies
//! delta records to the canonical store.

pub mod memory;
pub mod sqlite;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::common::EntityType;
use crate::models::cursor::{CursorValue, SyncCursor, SyncScope};
use crate::models::delta::{ApplyOutcome, DeltaOperation, DeltaRecord};
use crate::models::sync::SyncRunReport;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_cursor(&self, scope: &SyncScope) -> Result<Option<SyncCursor>>;

    /// Persist a cursor. Moving a cursor backwards within the same kind is
    /// rejected with [`SyncError::CursorRegression`].
    async fn commit_cursor(&self, scope: &SyncScope, value: &CursorValue) -> Result<()>;

    async fn clear_cursor(&self, scope: &SyncScope) -> Result<()>;

    /// The ID set from the last deletion scan; `None` if never scanned.
    async fn load_known_ids(&self, scope: &SyncScope) -> Result<Option<HashSet<String>>>;

    async fn replace_known_ids(&self, scope: &SyncScope, ids: &HashSet<String>) -> Result<()>;

    /// Fingerprints of every record applied for `scope`, keyed by source ID.
    async fn load_hashes(&self, scope: &SyncScope) -> Result<HashMap<String, String>>;

    /// Upsert fingerprints; `None` forgets the source ID (after a delete).
    async fn put_hashes(&self, scope: &SyncScope, hashes: &[(String, Option<String>)]) -> Result<()>;

    async fn record_run(&self, report: &SyncRunReport) -> Result<()>;

    async fn latest_run(&self, tenant_id: &str, provider_id: &str)
        -> Result<Option<SyncRunReport>>;

    /// Number of recorded runs, used for the deletion scan cadence.
    async fn run_count(&self, tenant_id: &str, provider_id: &str) -> Result<u64>;

    /// Drop every cursor, ID set and fingerprint of a provider.
    async fn clear_provider(&self, tenant_id: &str, provider_id: &str) -> Result<()>;
}

/// Applies delta records downstream, one outcome per record in order.
#[async_trait]
pub trait DeltaSink: Send + Sync {
    async fn apply(&self, records: &[DeltaRecord]) -> Result<Vec<ApplyOutcome>>;
}

/// A row of the canonical store as left by the sinks below.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub entity_id: Uuid,
    pub tenant_id: String,
    pub source_system: String,
    pub entity_type: EntityType,
    pub source_id: String,
    pub data: serde_json::Value,
    pub hash: Option<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Upsert-by-source-id semantics shared by the sinks. Returns the outcome
/// and the row to write, if any. Re-applying a record yields `Skipped`.
pub(crate) fn apply_to(
    existing: Option<&CanonicalRecord>,
    record: &DeltaRecord,
) -> (ApplyOutcome, Option<CanonicalRecord>) {
    match record.operation {
        DeltaOperation::Create | DeltaOperation::Update => {
            if let Some(current) = existing {
                let same_hash = record.current_hash.is_some() && current.hash == record.current_hash;
                if current.active && (same_hash || current.data == record.source_data) {
                    return (ApplyOutcome::Skipped, None);
                }
            }
            let row = CanonicalRecord {
                entity_id: record.entity_id,
                tenant_id: record.tenant_id.clone(),
                source_system: record.source_system.clone(),
                entity_type: record.entity_type,
                source_id: record.source_id.clone(),
                data: record.source_data.clone(),
                hash: record.current_hash.clone(),
                active: true,
                updated_at: record.timestamp,
            };
            (ApplyOutcome::Applied, Some(row))
        }
        DeltaOperation::Delete => match existing {
            Some(current) if current.active => {
                let row = CanonicalRecord {
                    active: false,
                    updated_at: record.timestamp,
                    ..current.clone()
                };
                (ApplyOutcome::Applied, Some(row))
            }
            _ => (ApplyOutcome::Skipped, None),
        },
    }
}

/// Shared monotonic rule for [`StateStore::commit_cursor`].
pub(crate) fn check_monotonic(
    scope: &SyncScope,
    current: Option<&CursorValue>,
    attempted: &CursorValue,
) -> Result<()> {
    match current {
        Some(current) if !attempted.is_at_or_after(current) => Err(SyncError::CursorRegression {
            scope: scope.to_string(),
            current: current.encode(),
            attempted: attempted.encode(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_rule() {
        let scope = SyncScope::new("t1", "p1", EntityType::User);
        let five = CursorValue::ChangeVersion(5);
        assert!(check_monotonic(&scope, None, &five).is_ok());
        assert!(check_monotonic(&scope, Some(&five), &five).is_ok());
        assert!(check_monotonic(&scope, Some(&five), &CursorValue::ChangeVersion(9)).is_ok());
        let err = check_monotonic(&scope, Some(&five), &CursorValue::ChangeVersion(3)).unwrap_err();
        assert!(matches!(err, SyncError::CursorRegression { .. }));
        assert!(err.to_string().contains("t1/p1/user"));
    }
}
