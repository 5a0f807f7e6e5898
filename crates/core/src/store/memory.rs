use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{apply_to, check_monotonic, CanonicalRecord, DeltaSink, StateStore};
use crate::error::Result;
use crate::models::common::EntityType;
use crate::models::cursor::{CursorValue, SyncCursor, SyncScope};
use crate::models::delta::{ApplyOutcome, DeltaRecord};
use crate::models::sync::SyncRunReport;

/// (tenant, source system, entity type, source id)
type RecordKey = (String, String, EntityType, String);

#[derive(Default)]
struct Inner {
    cursors: HashMap<SyncScope, SyncCursor>,
    known_ids: HashMap<SyncScope, HashSet<String>>,
    hashes: HashMap<SyncScope, HashMap<String, String>>,
    runs: Vec<SyncRunReport>,
    records: BTreeMap<RecordKey, CanonicalRecord>,
}

/// In-process state store and sink. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        tenant_id: &str,
        source_system: &str,
        entity_type: EntityType,
        source_id: &str,
    ) -> Option<CanonicalRecord> {
        let key = (
            tenant_id.to_string(),
            source_system.to_string(),
            entity_type,
            source_id.to_string(),
        );
        self.inner.read().await.records.get(&key).cloned()
    }

    /// Every canonical row, ordered by key.
    pub async fn records(&self) -> Vec<CanonicalRecord> {
        self.inner.read().await.records.values().cloned().collect()
    }

    pub async fn active_count(&self, entity_type: EntityType) -> usize {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.entity_type == entity_type && r.active)
            .count()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_cursor(&self, scope: &SyncScope) -> Result<Option<SyncCursor>> {
        Ok(self.inner.read().await.cursors.get(scope).cloned())
    }

    async fn commit_cursor(&self, scope: &SyncScope, value: &CursorValue) -> Result<()> {
        let mut inner = self.inner.write().await;
        check_monotonic(scope, inner.cursors.get(scope).map(|c| &c.value), value)?;
        inner.cursors.insert(
            scope.clone(),
            SyncCursor {
                scope: scope.clone(),
                value: value.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn clear_cursor(&self, scope: &SyncScope) -> Result<()> {
        self.inner.write().await.cursors.remove(scope);
        Ok(())
    }

    async fn load_known_ids(&self, scope: &SyncScope) -> Result<Option<HashSet<String>>> {
        Ok(self.inner.read().await.known_ids.get(scope).cloned())
    }

    async fn replace_known_ids(&self, scope: &SyncScope, ids: &HashSet<String>) -> Result<()> {
        self.inner
            .write()
            .await
            .known_ids
            .insert(scope.clone(), ids.clone());
        Ok(())
    }

    async fn load_hashes(&self, scope: &SyncScope) -> Result<HashMap<String, String>> {
        Ok(self
            .inner
            .read()
            .await
            .hashes
            .get(scope)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_hashes(&self, scope: &SyncScope, hashes: &[(String, Option<String>)]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.hashes.entry(scope.clone()).or_default();
        for (source_id, hash) in hashes {
            match hash {
                Some(h) => {
                    entry.insert(source_id.clone(), h.clone());
                }
                None => {
                    entry.remove(source_id);
                }
            }
        }
        Ok(())
    }

    async fn record_run(&self, report: &SyncRunReport) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.runs.iter_mut().find(|r| r.run_id == report.run_id) {
            Some(existing) => *existing = report.clone(),
            None => inner.runs.push(report.clone()),
        }
        Ok(())
    }

    async fn latest_run(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<Option<SyncRunReport>> {
        Ok(self
            .inner
            .read()
            .await
            .runs
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.provider_id == provider_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn run_count(&self, tenant_id: &str, provider_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .await
            .runs
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.provider_id == provider_id)
            .count() as u64)
    }

    async fn clear_provider(&self, tenant_id: &str, provider_id: &str) -> Result<()> {
        let owned = |s: &SyncScope| s.tenant_id == tenant_id && s.provider_id == provider_id;
        let mut inner = self.inner.write().await;
        inner.cursors.retain(|s, _| !owned(s));
        inner.known_ids.retain(|s, _| !owned(s));
        inner.hashes.retain(|s, _| !owned(s));
        Ok(())
    }
}

#[async_trait]
impl DeltaSink for MemoryStore {
    async fn apply(&self, records: &[DeltaRecord]) -> Result<Vec<ApplyOutcome>> {
        let mut inner = self.inner.write().await;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let key = (
                record.tenant_id.clone(),
                record.source_system.clone(),
                record.entity_type,
                record.source_id.clone(),
            );
            let (outcome, row) = apply_to(inner.records.get(&key), record);
            if let Some(row) = row {
                inner.records.insert(key, row);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::delta::{entity_id, DeltaMetadata, DeltaOperation, DeltaStrategy};
    use serde_json::json;
    use uuid::Uuid;

    fn record(source_id: &str, operation: DeltaOperation, name: &str) -> DeltaRecord {
        DeltaRecord {
            entity_type: EntityType::School,
            entity_id: entity_id("t1", "p1", EntityType::School, source_id),
            operation,
            source_data: json!({"name": name}),
            current_hash: Some(format!("hash-{name}")),
            source_system: "p1".into(),
            source_id: source_id.into(),
            tenant_id: "t1".into(),
            timestamp: Utc::now(),
            metadata: DeltaMetadata {
                change_version: None,
                strategy: DeltaStrategy::HashDiff,
                run_id: Uuid::nil(),
            },
        }
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![
            record("s1", DeltaOperation::Create, "North"),
            record("s2", DeltaOperation::Update, "South"),
            record("s1", DeltaOperation::Update, "North High"),
            record("s2", DeltaOperation::Delete, "South"),
        ];

        let first = store.apply(&batch).await.unwrap();
        assert!(first.iter().all(|o| *o == ApplyOutcome::Applied));
        let snapshot = store.records().await;

        store.apply(&batch).await.unwrap();
        let replayed = store.records().await;

        let view = |rows: &[CanonicalRecord]| -> Vec<(String, bool, serde_json::Value)> {
            rows.iter()
                .map(|r| (r.source_id.clone(), r.active, r.data.clone()))
                .collect()
        };
        assert_eq!(view(&snapshot), view(&replayed));
        assert_eq!(store.active_count(EntityType::School).await, 1);

        let again = store.apply(&batch[2..]).await.unwrap();
        assert_eq!(again, vec![ApplyOutcome::Skipped, ApplyOutcome::Skipped]);
    }

    #[tokio::test]
    async fn delete_of_unknown_record_is_skipped() {
        let store = MemoryStore::new();
        let outcomes = store
            .apply(&[record("ghost", DeltaOperation::Delete, "x")])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![ApplyOutcome::Skipped]);
        assert!(store
            .record("t1", "p1", EntityType::School, "ghost")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn update_reactivates_deleted_record() {
        let store = MemoryStore::new();
        store
            .apply(&[
                record("s1", DeltaOperation::Create, "North"),
                record("s1", DeltaOperation::Delete, "North"),
            ])
            .await
            .unwrap();
        let outcomes = store
            .apply(&[record("s1", DeltaOperation::Update, "North")])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![ApplyOutcome::Applied]);
        let row = store
            .record("t1", "p1", EntityType::School, "s1")
            .await
            .unwrap();
        assert!(row.active);
    }

    #[tokio::test]
    async fn cursor_commit_is_monotonic() {
        let store = MemoryStore::new();
        let scope = SyncScope::new("t1", "p1", EntityType::User);
        store
            .commit_cursor(&scope, &CursorValue::ChangeVersion(10))
            .await
            .unwrap();
        let err = store
            .commit_cursor(&scope, &CursorValue::ChangeVersion(7))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CursorRegression { .. }));
        let cursor = store.load_cursor(&scope).await.unwrap().unwrap();
        assert_eq!(cursor.change_version(), Some(10));
    }

    #[tokio::test]
    async fn clear_provider_keeps_other_providers() {
        let store = MemoryStore::new();
        let mine = SyncScope::new("t1", "p1", EntityType::User);
        let other = SyncScope::new("t1", "p2", EntityType::User);
        for scope in [&mine, &other] {
            store
                .commit_cursor(scope, &CursorValue::ChangeVersion(1))
                .await
                .unwrap();
            store
                .put_hashes(scope, &[("u1".into(), Some("h".into()))])
                .await
                .unwrap();
        }
        store.clear_provider("t1", "p1").await.unwrap();
        assert!(store.load_cursor(&mine).await.unwrap().is_none());
        assert!(store.load_hashes(&mine).await.unwrap().is_empty());
        assert!(store.load_cursor(&other).await.unwrap().is_some());
    }
}
