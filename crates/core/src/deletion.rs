//! Deletion detection by ID set comparison.
//!
//! Providers without delete events still let us enumerate every current
//! source ID. Anything present in the last scan and absent now is emitted as
//! a `delete` record.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::common::EntityType;
use crate::models::cursor::SyncScope;
use crate::models::delta::{DeltaMetadata, DeltaRecord, DeltaStrategy};
use crate::orchestrator::{DeltaOrchestrator, EntityOutcome};
use crate::providers::ProviderAdapter;

/// IDs in `known` but not in `current`, sorted.
pub fn diff_removed(known: &HashSet<String>, current: &HashSet<String>) -> Vec<String> {
    let mut removed: Vec<String> = known.difference(current).cloned().collect();
    removed.sort();
    removed
}

pub struct DeletionDetector {
    orchestrator: Arc<DeltaOrchestrator>,
}

impl DeletionDetector {
    pub fn new(orchestrator: Arc<DeltaOrchestrator>) -> Self {
        Self { orchestrator }
    }

    #[instrument(skip(self, adapter), fields(tenant = adapter.tenant_id(), provider = adapter.provider_id()))]
    pub async fn scan(
        &self,
        adapter: &dyn ProviderAdapter,
        entity_type: EntityType,
        run_id: Uuid,
    ) -> Result<EntityOutcome> {
        if !adapter.capabilities().supports_deletion_detection {
            return Err(SyncError::CapabilityUnsupported(format!(
                "{} cannot enumerate source ids",
                adapter.kind()
            )));
        }

        let scope = SyncScope::new(adapter.tenant_id(), adapter.provider_id(), entity_type);
        let store = self.orchestrator.store();
        let current: HashSet<String> = adapter
            .get_all_source_ids(entity_type)
            .await?
            .into_iter()
            .collect();

        let Some(known) = store.load_known_ids(&scope).await? else {
            info!(entity_type = %entity_type, count = current.len(), "Seeding known id set");
            store.replace_known_ids(&scope, &current).await?;
            return Ok(EntityOutcome::default());
        };

        if current.is_empty() && !known.is_empty() {
            warn!(
                entity_type = %entity_type,
                known = known.len(),
                "Provider returned no ids, skipping deletion scan"
            );
            return Ok(EntityOutcome::default());
        }

        let removed = diff_removed(&known, &current);
        let records: Vec<DeltaRecord> = removed
            .iter()
            .map(|source_id| {
                DeltaRecord::deletion(
                    &scope.tenant_id,
                    &scope.provider_id,
                    entity_type,
                    source_id,
                    DeltaMetadata {
                        change_version: None,
                        strategy: DeltaStrategy::DeletionScan,
                        run_id,
                    },
                )
            })
            .collect();

        let mut outcome = EntityOutcome::default();
        let refused = self
            .orchestrator
            .apply(&scope, &records, &HashSet::new(), &mut outcome)
            .await?;
        let failed = refused.len();

        // Deletes the sink refused stay known so the next scan retries them.
        let mut next_known = current;
        next_known.extend(refused);
        store.replace_known_ids(&scope, &next_known).await?;

        info!(
            entity_type = %entity_type,
            count = removed.len(),
            failed,
            "Deletion scan complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StateStore};
    use crate::test_support::{school, FailingSink, MockAdapter};

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn detector(store: &Arc<MemoryStore>) -> DeletionDetector {
        DeletionDetector::new(Arc::new(DeltaOrchestrator::new(store.clone(), store.clone())))
    }

    #[test]
    fn diff_finds_removed_ids() {
        assert_eq!(
            diff_removed(&ids(&["A", "B", "C"]), &ids(&["A", "C"])),
            vec!["B".to_string()]
        );
        assert!(diff_removed(&ids(&["A"]), &ids(&["A", "D"])).is_empty());
    }

    #[tokio::test]
    async fn removed_id_becomes_one_delete() {
        let store = Arc::new(MemoryStore::new());
        let orch = Arc::new(DeltaOrchestrator::new(store.clone(), store.clone()));
        let detector = DeletionDetector::new(orch.clone());
        let adapter = MockAdapter::hash_only();
        adapter.set_records(
            EntityType::School,
            vec![school("A", "a"), school("B", "b"), school("C", "c")],
        );

        orch.sync_entity(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();
        let seeded = detector
            .scan(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();
        assert_eq!(seeded.stats.deactivated, 0);

        adapter.set_records(EntityType::School, vec![school("A", "a"), school("C", "c")]);
        let outcome = detector
            .scan(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();
        assert_eq!(outcome.stats.deactivated, 1);
        let b = store
            .record("t1", "p1", EntityType::School, "B")
            .await
            .unwrap();
        assert!(!b.active);
        assert_eq!(store.active_count(EntityType::School).await, 2);

        let scope = SyncScope::new("t1", "p1", EntityType::School);
        assert_eq!(store.load_known_ids(&scope).await.unwrap(), Some(ids(&["A", "C"])));
    }

    #[tokio::test]
    async fn empty_enumeration_is_not_a_mass_delete() {
        let store = Arc::new(MemoryStore::new());
        let detector = detector(&store);
        let adapter = MockAdapter::hash_only();
        adapter.set_records(EntityType::School, vec![school("A", "a")]);
        detector
            .scan(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();

        adapter.set_records(EntityType::School, vec![]);
        let outcome = detector
            .scan(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();
        assert_eq!(outcome, EntityOutcome::default());
        let scope = SyncScope::new("t1", "p1", EntityType::School);
        assert_eq!(store.load_known_ids(&scope).await.unwrap(), Some(ids(&["A"])));
    }

    #[tokio::test]
    async fn refused_deletes_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let scope = SyncScope::new("t1", "p1", EntityType::School);
        store.replace_known_ids(&scope, &ids(&["A", "B"])).await.unwrap();
        let detector = DeletionDetector::new(Arc::new(DeltaOrchestrator::new(
            store.clone(),
            Arc::new(FailingSink),
        )));
        let adapter = MockAdapter::hash_only();
        adapter.set_records(EntityType::School, vec![school("A", "a")]);

        let outcome = detector
            .scan(&adapter, EntityType::School, Uuid::nil())
            .await
            .unwrap();
        assert_eq!(outcome.stats.errors, 1);
        assert_eq!(store.load_known_ids(&scope).await.unwrap(), Some(ids(&["A", "B"])));
    }

    #[tokio::test]
    async fn unsupported_provider_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let adapter = MockAdapter::new(Default::default());
        let err = detector(&store)
            .scan(&adapter, EntityType::User, Uuid::nil())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CapabilityUnsupported(_)));
    }
}
