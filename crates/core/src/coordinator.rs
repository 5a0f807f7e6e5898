//! Sync run lifecycle for (tenant, provider) pairs.
//!
//! A run initializes the adapter, then walks the entity types in dependency
//! order. An entity type that fails is recorded and its siblings continue;
//! only a provider-level failure (bad credentials, missing configuration)
//! or the run deadline fails the whole run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::deletion::DeletionDetector;
use crate::error::SyncError;
use crate::models::common::EntityType;
use crate::models::sync::{SyncRunReport, SyncRunStatus, SyncStats};
use crate::orchestrator::{DeltaOrchestrator, EntityOutcome};
use crate::providers::{Credentials, ProviderAdapter};
use crate::store::{DeltaSink, StateStore};

/// One unit of work for [`SyncRunCoordinator::run_many`].
#[derive(Clone)]
pub struct SyncJob {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub credentials: Credentials,
}

pub struct SyncRunCoordinator {
    orchestrator: Arc<DeltaOrchestrator>,
    deletion: DeletionDetector,
    deadline: Option<Duration>,
    deletion_scan_every: u32,
    max_concurrent_runs: usize,
}

impl SyncRunCoordinator {
    pub fn new(store: Arc<dyn StateStore>, sink: Arc<dyn DeltaSink>) -> Self {
        let orchestrator = Arc::new(DeltaOrchestrator::new(store, sink));
        Self::with_orchestrator(orchestrator)
    }

    pub fn with_orchestrator(orchestrator: Arc<DeltaOrchestrator>) -> Self {
        Self {
            deletion: DeletionDetector::new(orchestrator.clone()),
            orchestrator,
            deadline: None,
            deletion_scan_every: 1,
            max_concurrent_runs: 4,
        }
    }

    /// Coordinator wired with the `[engine]` settings of `config`.
    pub fn from_config(
        config: &EngineConfig,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn DeltaSink>,
    ) -> Self {
        let orchestrator = DeltaOrchestrator::new(store, sink).with_batch_size(config.engine.batch_size);
        let mut coordinator = Self::with_orchestrator(Arc::new(orchestrator))
            .with_deletion_scan_every(config.engine.deletion_scan_every)
            .with_max_concurrent_runs(config.engine.max_concurrent_runs);
        coordinator.deadline = config.run_deadline();
        coordinator
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_deletion_scan_every(mut self, every: u32) -> Self {
        self.deletion_scan_every = every.max(1);
        self
    }

    pub fn with_max_concurrent_runs(mut self, n: usize) -> Self {
        self.max_concurrent_runs = n.max(1);
        self
    }

    pub fn orchestrator(&self) -> &Arc<DeltaOrchestrator> {
        &self.orchestrator
    }

    /// Execute one run to a terminal status and persist its report.
    #[instrument(skip_all, fields(tenant = adapter.tenant_id(), provider = adapter.provider_id()))]
    pub async fn run(
        &self,
        adapter: &dyn ProviderAdapter,
        credentials: &Credentials,
    ) -> SyncRunReport {
        let mut report = SyncRunReport {
            run_id: Uuid::new_v4(),
            tenant_id: adapter.tenant_id().to_string(),
            provider_id: adapter.provider_id().to_string(),
            status: SyncRunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            stats: SyncStats::default(),
            error_messages: Vec::new(),
        };

        let deletion_due = self.deletion_due(&report).await;
        info!(run_id = %report.run_id, deletion_due, "Starting sync run");

        report.status = SyncRunStatus::Running;
        self.persist(&report).await;

        match self.deadline {
            Some(deadline) => {
                let work = self.execute(adapter, credentials, deletion_due, &mut report);
                if tokio::time::timeout(deadline, work).await.is_err() {
                    error!(run_id = %report.run_id, ?deadline, "Sync run exceeded its deadline");
                    report.status = SyncRunStatus::Failed;
                    report
                        .error_messages
                        .push(SyncError::Deadline(deadline).to_string());
                }
            }
            None => self.execute(adapter, credentials, deletion_due, &mut report).await,
        }

        report.completed_at = Some(Utc::now());
        self.persist(&report).await;

        let totals = report.stats.totals();
        info!(
            run_id = %report.run_id,
            status = report.status.as_str(),
            created = totals.created,
            updated = totals.updated,
            unchanged = totals.unchanged,
            deactivated = totals.deactivated,
            errors = totals.errors,
            "Sync run finished"
        );
        report
    }

    /// Run every job, at most `max_concurrent_runs` at a time. Reports come
    /// back in job order.
    pub async fn run_many(&self, jobs: Vec<SyncJob>) -> Vec<SyncRunReport> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_runs));
        let runs = jobs.into_iter().map(|job| {
            let permits = permits.clone();
            async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                self.run(job.adapter.as_ref(), &job.credentials).await
            }
        });
        join_all(runs).await
    }

    async fn execute(
        &self,
        adapter: &dyn ProviderAdapter,
        credentials: &Credentials,
        deletion_due: bool,
        report: &mut SyncRunReport,
    ) {
        if let Err(e) = adapter.initialize(credentials).await {
            error!(error = %e, "Provider initialization failed");
            report.status = SyncRunStatus::Failed;
            report.error_messages.push(format!("initialize: {e}"));
            return;
        }

        let scan_deletions = deletion_due && adapter.capabilities().supports_deletion_detection;

        for entity_type in EntityType::SYNC_ORDER {
            match self
                .orchestrator
                .sync_entity(adapter, entity_type, report.run_id)
                .await
            {
                Ok(outcome) => absorb(report, entity_type, outcome),
                Err(e) if e.is_fatal() => {
                    error!(entity_type = %entity_type, error = %e, "Aborting sync run");
                    report.status = SyncRunStatus::Failed;
                    report.error_messages.push(format!("{entity_type}: {e}"));
                    return;
                }
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "Entity type failed, continuing");
                    report.stats.entry(entity_type).errors += 1;
                    report.error_messages.push(format!("{entity_type}: {e}"));
                    continue;
                }
            }

            if !scan_deletions {
                continue;
            }
            match self.deletion.scan(adapter, entity_type, report.run_id).await {
                Ok(outcome) => absorb(report, entity_type, outcome),
                Err(SyncError::CapabilityUnsupported(reason)) => {
                    debug!(entity_type = %entity_type, reason = %reason, "Deletion scan not available");
                }
                Err(e) if e.is_fatal() => {
                    error!(entity_type = %entity_type, error = %e, "Aborting sync run");
                    report.status = SyncRunStatus::Failed;
                    report
                        .error_messages
                        .push(format!("{entity_type} deletion scan: {e}"));
                    return;
                }
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "Deletion scan failed, continuing");
                    report.stats.entry(entity_type).errors += 1;
                    report
                        .error_messages
                        .push(format!("{entity_type} deletion scan: {e}"));
                }
            }
        }

        report.status = if report.error_messages.is_empty() && report.stats.total_errors() == 0 {
            SyncRunStatus::Completed
        } else {
            SyncRunStatus::CompletedWithErrors
        };
    }

    async fn deletion_due(&self, report: &SyncRunReport) -> bool {
        let store = self.orchestrator.store();
        match store.run_count(&report.tenant_id, &report.provider_id).await {
            Ok(n) => n % u64::from(self.deletion_scan_every) == 0,
            Err(e) => {
                warn!(error = %e, "Could not read run history, scanning for deletions");
                true
            }
        }
    }

    async fn persist(&self, report: &SyncRunReport) {
        if let Err(e) = self.orchestrator.store().record_run(report).await {
            warn!(run_id = %report.run_id, error = %e, "Failed to persist run report");
        }
    }
}

fn absorb(report: &mut SyncRunReport, entity_type: EntityType, outcome: EntityOutcome) {
    report.stats.record(entity_type, &outcome.stats);
    report.error_messages.extend(outcome.errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cursor::SyncScope;
    use crate::store::MemoryStore;
    use crate::test_support::{school, user, MockAdapter};

    fn coordinator(store: &Arc<MemoryStore>) -> SyncRunCoordinator {
        SyncRunCoordinator::new(store.clone(), store.clone())
    }

    fn roster() -> MockAdapter {
        let adapter = MockAdapter::hash_only();
        adapter.set_records(EntityType::School, vec![school("s1", "North")]);
        adapter.set_records(
            EntityType::User,
            vec![user("u1", "Ada"), user("u2", "Grace")],
        );
        adapter
    }

    #[tokio::test]
    async fn clean_run_completes_and_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let adapter = roster();
        let report = coordinator(&store).run(&adapter, &Credentials::default()).await;

        assert_eq!(report.status, SyncRunStatus::Completed);
        assert_eq!(report.stats.get(EntityType::School).created, 1);
        assert_eq!(report.stats.get(EntityType::User).created, 2);
        assert!(report.completed_at.is_some());

        let latest = store.latest_run("t1", "p1").await.unwrap().unwrap();
        assert_eq!(latest.run_id, report.run_id);
        assert_eq!(latest.status, SyncRunStatus::Completed);

        let order: Vec<EntityType> = adapter
            .fetch_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(order, EntityType::SYNC_ORDER.to_vec());
    }

    #[tokio::test]
    async fn failing_entity_type_does_not_stop_siblings() {
        let store = Arc::new(MemoryStore::new());
        let adapter = roster();
        adapter.fail(EntityType::School);

        let report = coordinator(&store).run(&adapter, &Credentials::default()).await;
        assert_eq!(report.status, SyncRunStatus::CompletedWithErrors);
        assert_eq!(report.stats.get(EntityType::School).errors, 1);
        assert_eq!(report.stats.get(EntityType::User).created, 2);
        assert!(report.error_messages[0].starts_with("school:"));
    }

    #[tokio::test]
    async fn initialize_failure_fails_the_run() {
        let store = Arc::new(MemoryStore::new());
        let adapter = roster();
        *adapter.init_error.lock().unwrap() = Some(SyncError::Authentication("401".into()));

        let report = coordinator(&store).run(&adapter, &Credentials::default()).await;
        assert_eq!(report.status, SyncRunStatus::Failed);
        assert!(adapter.fetch_calls.lock().unwrap().is_empty());
        assert!(report.error_messages[0].contains("authentication"));
    }

    #[tokio::test]
    async fn deadline_fails_run_and_keeps_cursors() {
        let store = Arc::new(MemoryStore::new());
        let mut adapter = roster();
        adapter.fetch_delay = Some(Duration::from_millis(500));

        let report = coordinator(&store)
            .with_deadline(Duration::from_millis(50))
            .run(&adapter, &Credentials::default())
            .await;
        assert_eq!(report.status, SyncRunStatus::Failed);
        assert!(report.error_messages[0].contains("deadline exceeded"));
        let scope = SyncScope::new("t1", "p1", EntityType::School);
        assert!(store.load_cursor(&scope).await.unwrap().is_none());
        assert_eq!(store.active_count(EntityType::School).await, 0);
    }

    #[tokio::test]
    async fn deletion_scans_follow_cadence() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(&store).with_deletion_scan_every(2);
        let adapter = roster();

        // Run 0 seeds the known set.
        coordinator.run(&adapter, &Credentials::default()).await;
        adapter.set_records(EntityType::User, vec![user("u1", "Ada")]);

        // Run 1 is off-cadence: u2 stays active.
        let report = coordinator.run(&adapter, &Credentials::default()).await;
        assert_eq!(report.stats.get(EntityType::User).deactivated, 0);
        assert_eq!(store.active_count(EntityType::User).await, 2);

        // Run 2 scans again.
        let report = coordinator.run(&adapter, &Credentials::default()).await;
        assert_eq!(report.stats.get(EntityType::User).deactivated, 1);
        assert_eq!(store.active_count(EntityType::User).await, 1);
        assert_eq!(store.run_count("t1", "p1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn run_many_returns_a_report_per_job() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(&store).with_max_concurrent_runs(1);
        let healthy: Arc<dyn ProviderAdapter> = Arc::new(roster());
        let broken = roster();
        *broken.init_error.lock().unwrap() = Some(SyncError::Config("missing client_id".into()));
        let broken: Arc<dyn ProviderAdapter> = Arc::new(broken);

        let reports = coordinator
            .run_many(vec![
                SyncJob {
                    adapter: healthy,
                    credentials: Credentials::default(),
                },
                SyncJob {
                    adapter: broken,
                    credentials: Credentials::default(),
                },
            ])
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status, SyncRunStatus::Completed);
        assert_eq!(reports[1].status, SyncRunStatus::Failed);
        assert_eq!(store.run_count("t1", "p1").await.unwrap(), 2);
    }
}
