use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::EntityType;
use super::CanonicalEntity;
use crate::error::Result;

/// Operation a [`DeltaRecord`] asks the downstream store to perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    Create,
    Update,
    Delete,
}

impl DeltaOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOperation::Create => "create",
            DeltaOperation::Update => "update",
            DeltaOperation::Delete => "delete",
        }
    }
}

/// Which detection path produced a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStrategy {
    Native,
    HashDiff,
    DeletionScan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMetadata {
    /// Provider change version; only present on the native change path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_version: Option<i64>,
    pub strategy: DeltaStrategy,
    pub run_id: Uuid,
}

/// One idempotently-appliable change to the canonical store.
///
/// Downstream applies records by upsert on (tenant, source system, entity
/// type, source id); a `delete` is a soft deactivation. Applying the same
/// record twice leaves the store as it was after the first application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRecord {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub operation: DeltaOperation,
    pub source_data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    pub source_system: String,
    pub source_id: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: DeltaMetadata,
}

impl DeltaRecord {
    /// A create or update carrying the normalized entity.
    pub fn upsert(
        entity: &CanonicalEntity,
        operation: DeltaOperation,
        source_system: &str,
        hash: String,
        metadata: DeltaMetadata,
    ) -> Result<Self> {
        let entity_type = entity.entity_type();
        Ok(Self {
            entity_type,
            entity_id: entity_id(entity.tenant_id(), source_system, entity_type, entity.source_id()),
            operation,
            source_data: entity.to_value()?,
            current_hash: Some(hash),
            source_system: source_system.to_string(),
            source_id: entity.source_id().to_string(),
            tenant_id: entity.tenant_id().to_string(),
            timestamp: Utc::now(),
            metadata,
        })
    }

    /// A soft delete addressed by source ID alone.
    pub fn deletion(
        tenant_id: &str,
        source_system: &str,
        entity_type: EntityType,
        source_id: &str,
        metadata: DeltaMetadata,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id(tenant_id, source_system, entity_type, source_id),
            operation: DeltaOperation::Delete,
            source_data: serde_json::json!({ "sourceId": source_id }),
            current_hash: None,
            source_system: source_system.to_string(),
            source_id: source_id.to_string(),
            tenant_id: tenant_id.to_string(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Per-record result reported by the downstream apply collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped,
    Error(String),
}

impl ApplyOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ApplyOutcome::Error(_))
    }
}

/// Deterministic downstream identifier for a source record.
///
/// The same (tenant, provider, entity type, source id) always yields the same
/// UUID, so replays and re-syncs address the same canonical row.
pub fn entity_id(
    tenant_id: &str,
    source_system: &str,
    entity_type: EntityType,
    source_id: &str,
) -> Uuid {
    let name = format!("{tenant_id}|{source_system}|{entity_type}|{source_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}
