use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::EntityType;

/// Status of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl SyncRunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Pending => "pending",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::CompletedWithErrors => "completed_with_errors",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncRunStatus::Completed | SyncRunStatus::CompletedWithErrors | SyncRunStatus::Failed
        )
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncRunStatus::Pending),
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "completed_with_errors" => Ok(SyncRunStatus::CompletedWithErrors),
            "failed" => Ok(SyncRunStatus::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// Counters for one entity type within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deactivated: u64,
    pub errors: u64,
}

impl EntityStats {
    pub fn merge(&mut self, other: &EntityStats) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deactivated += other.deactivated;
        self.errors += other.errors;
    }
}

/// Counters accumulated across a run, surfaced only on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub entities: BTreeMap<EntityType, EntityStats>,
}

impl SyncStats {
    pub fn entry(&mut self, entity_type: EntityType) -> &mut EntityStats {
        self.entities.entry(entity_type).or_default()
    }

    pub fn get(&self, entity_type: EntityType) -> EntityStats {
        self.entities.get(&entity_type).copied().unwrap_or_default()
    }

    pub fn record(&mut self, entity_type: EntityType, stats: &EntityStats) {
        self.entry(entity_type).merge(stats);
    }

    pub fn totals(&self) -> EntityStats {
        let mut total = EntityStats::default();
        for stats in self.entities.values() {
            total.merge(stats);
        }
        total
    }

    pub fn total_errors(&self) -> u64 {
        self.entities.values().map(|s| s.errors).sum()
    }
}

/// Terminal report of one (tenant, provider) sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunReport {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub provider_id: String,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SyncStats,
    #[serde(default)]
    pub error_messages: Vec<String>,
}
