//! Per entity type delta production.
//!
//! For one (tenant, provider, entity type) the orchestrator picks the native
//! change path when the adapter has a change feed, and otherwise falls back
//! to a full (or modified-since) fetch diffed by fingerprint. Records go to
//! the [`DeltaSink`] in provider order, in batches, and the cursor moves only
//! once the sink has accepted every record of the window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::hash_detector;
use crate::hashing::entity_hash;
use crate::models::common::EntityType;
use crate::models::cursor::{CursorValue, SyncScope};
use crate::models::delta::{ApplyOutcome, DeltaMetadata, DeltaOperation, DeltaRecord, DeltaStrategy};
use crate::models::sync::EntityStats;
use crate::providers::{ChangeType, FetchQuery, ProviderAdapter, RejectedRecord};
use crate::store::{DeltaSink, StateStore};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Counters and record-level error messages for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityOutcome {
    pub stats: EntityStats,
    pub errors: Vec<String>,
}

impl EntityOutcome {
    fn reject(&mut self, entity_type: EntityType, rejected: &[RejectedRecord]) {
        for r in rejected {
            self.stats.errors += 1;
            self.errors.push(format!(
                "{entity_type} {}: {}",
                r.source_id.as_deref().unwrap_or("<unknown>"),
                r.reason
            ));
        }
    }
}

pub struct DeltaOrchestrator {
    store: Arc<dyn StateStore>,
    sink: Arc<dyn DeltaSink>,
    batch_size: usize,
    /// Scopes whose change query is unavailable; never retried.
    downgraded: RwLock<HashSet<SyncScope>>,
}

impl DeltaOrchestrator {
    pub fn new(store: Arc<dyn StateStore>, sink: Arc<dyn DeltaSink>) -> Self {
        Self {
            store,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
            downgraded: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn is_downgraded(&self, scope: &SyncScope) -> bool {
        self.downgraded.read().await.contains(scope)
    }

    /// Produce and apply the deltas of one entity type.
    ///
    /// Record-level failures land in the returned outcome. An `Err` means the
    /// entity type as a whole could not be processed.
    #[instrument(skip(self, adapter), fields(tenant = adapter.tenant_id(), provider = adapter.provider_id()))]
    pub async fn sync_entity(
        &self,
        adapter: &dyn ProviderAdapter,
        entity_type: EntityType,
        run_id: Uuid,
    ) -> Result<EntityOutcome> {
        let scope = SyncScope::new(adapter.tenant_id(), adapter.provider_id(), entity_type);

        if adapter.capabilities().supports_delta && !self.is_downgraded(&scope).await {
            match self.sync_native(adapter, &scope, run_id).await {
                Err(SyncError::CapabilityUnsupported(reason)) => {
                    if self.downgraded.write().await.insert(scope.clone()) {
                        warn!(
                            entity_type = %entity_type,
                            reason = %reason,
                            "Change query unavailable, falling back to hash diff for this provider"
                        );
                    }
                }
                other => return other,
            }
        }

        self.sync_fallback(adapter, &scope, run_id).await
    }

    async fn sync_native(
        &self,
        adapter: &dyn ProviderAdapter,
        scope: &SyncScope,
        run_id: Uuid,
    ) -> Result<EntityOutcome> {
        let entity_type = scope.entity_type;
        let cursor = self.store.load_cursor(scope).await?;
        let min_version = cursor.as_ref().and_then(|c| c.change_version()).unwrap_or(0);

        let batch = adapter.fetch_delta(entity_type, min_version).await?;
        let mut outcome = EntityOutcome::default();
        outcome.stats.fetched = batch.changes.len() as u64;
        outcome.reject(entity_type, &batch.rejected);

        let mut max_version = batch.max_change_version.unwrap_or(min_version);
        let mut records = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            max_version = max_version.max(change.change_version);
            let metadata = DeltaMetadata {
                change_version: Some(change.change_version),
                strategy: DeltaStrategy::Native,
                run_id,
            };
            let record = match (change.change_type, &change.target) {
                (ChangeType::Delete, _) => DeltaRecord::deletion(
                    &scope.tenant_id,
                    &scope.provider_id,
                    entity_type,
                    &change.source_id,
                    metadata,
                ),
                (change_type, Some(entity)) => {
                    let operation = if change_type == ChangeType::Add {
                        DeltaOperation::Create
                    } else {
                        DeltaOperation::Update
                    };
                    DeltaRecord::upsert(
                        entity,
                        operation,
                        &scope.provider_id,
                        entity_hash(entity)?,
                        metadata,
                    )?
                }
                (_, None) => {
                    outcome.reject(
                        entity_type,
                        &[RejectedRecord::new(
                            Some(change.source_id.clone()),
                            "change carries no entity",
                        )],
                    );
                    continue;
                }
            };
            records.push(record);
        }

        let refused = self
            .apply(scope, &records, &HashSet::new(), &mut outcome)
            .await?;

        if !refused.is_empty() {
            warn!(
                entity_type = %entity_type,
                errors = outcome.stats.errors,
                "Sink rejected records, cursor not advanced"
            );
        } else if max_version > min_version {
            self.store
                .commit_cursor(scope, &CursorValue::ChangeVersion(max_version))
                .await?;
            debug!(entity_type = %entity_type, cursor = max_version, "Cursor committed");
        }

        info!(
            entity_type = %entity_type,
            count = records.len(),
            min_version,
            max_version,
            "Native delta sync complete"
        );
        Ok(outcome)
    }

    async fn sync_fallback(
        &self,
        adapter: &dyn ProviderAdapter,
        scope: &SyncScope,
        run_id: Uuid,
    ) -> Result<EntityOutcome> {
        let entity_type = scope.entity_type;
        let window_start = Utc::now();
        let modified_since = adapter.capabilities().supports_modified_since;

        let query = if modified_since {
            match self.store.load_cursor(scope).await?.and_then(|c| c.timestamp()) {
                Some(since) => FetchQuery::modified_since(since),
                None => FetchQuery::all(),
            }
        } else {
            FetchQuery::all()
        };

        let result = adapter.fetch_canonical(entity_type, &query).await?;
        let mut outcome = EntityOutcome::default();
        outcome.stats.fetched = result.records.len() as u64;
        outcome.reject(entity_type, &result.rejected);

        let known = self.store.load_hashes(scope).await?;
        let detection = hash_detector::detect(result.records, &known)?;
        outcome.stats.unchanged = detection.unchanged;

        let mut first_seen = HashSet::new();
        let mut records = Vec::with_capacity(detection.changed.len());
        for changed in detection.changed {
            if changed.first_seen {
                first_seen.insert(changed.entity.source_id().to_string());
            }
            records.push(DeltaRecord::upsert(
                &changed.entity,
                DeltaOperation::Update,
                &scope.provider_id,
                changed.hash,
                DeltaMetadata {
                    change_version: None,
                    strategy: DeltaStrategy::HashDiff,
                    run_id,
                },
            )?);
        }

        let refused = self.apply(scope, &records, &first_seen, &mut outcome).await?;

        if modified_since && refused.is_empty() {
            self.store
                .commit_cursor(scope, &CursorValue::Timestamp(window_start))
                .await?;
        }

        info!(
            entity_type = %entity_type,
            count = records.len(),
            unchanged = outcome.stats.unchanged,
            "Hash diff sync complete"
        );
        Ok(outcome)
    }

    /// Apply `records` in batches, tally the outcomes and record the
    /// fingerprints of accepted records. Returns the source IDs the sink
    /// refused.
    ///
    /// `first_seen` marks updates that count as creations.
    pub(crate) async fn apply(
        &self,
        scope: &SyncScope,
        records: &[DeltaRecord],
        first_seen: &HashSet<String>,
        outcome: &mut EntityOutcome,
    ) -> Result<Vec<String>> {
        let mut refused = Vec::new();

        for chunk in records.chunks(self.batch_size) {
            let outcomes = match self.sink.apply(chunk).await {
                Ok(o) if o.len() == chunk.len() => o,
                Ok(o) => vec![
                    ApplyOutcome::Error(format!(
                        "sink returned {} outcomes for {} records",
                        o.len(),
                        chunk.len()
                    ));
                    chunk.len()
                ],
                Err(e) => vec![ApplyOutcome::Error(e.to_string()); chunk.len()],
            };

            let mut hashes = Vec::with_capacity(chunk.len());
            for (record, result) in chunk.iter().zip(outcomes) {
                match result {
                    ApplyOutcome::Applied => match record.operation {
                        DeltaOperation::Create => outcome.stats.created += 1,
                        DeltaOperation::Update if first_seen.contains(&record.source_id) => {
                            outcome.stats.created += 1
                        }
                        DeltaOperation::Update => outcome.stats.updated += 1,
                        DeltaOperation::Delete => outcome.stats.deactivated += 1,
                    },
                    ApplyOutcome::Skipped => outcome.stats.unchanged += 1,
                    ApplyOutcome::Error(message) => {
                        refused.push(record.source_id.clone());
                        outcome.stats.errors += 1;
                        outcome.errors.push(format!(
                            "{} {}: {}",
                            record.entity_type,
                            record.source_id,
                            SyncError::Apply(message)
                        ));
                        continue;
                    }
                }
                hashes.push((record.source_id.clone(), record.current_hash.clone()));
            }
            self.store.put_hashes(scope, &hashes).await?;
        }

        Ok(refused)
    }
}
