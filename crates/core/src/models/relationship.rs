use serde::{Deserialize, Serialize};

use super::common::EntityStatus;

/// Canonical guardian/parent-to-student relationship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source_id: String,
    pub tenant_id: String,
    /// The guardian or parent side.
    pub from_user_source_id: String,
    /// The student side.
    pub to_user_source_id: String,
    pub relationship_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary_contact: Option<bool>,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}
