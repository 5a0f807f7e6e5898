use serde::{Deserialize, Serialize};

use super::common::{EntityStatus, OrgType};

/// Canonical school (or other organization) record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub source_id: String,
    pub tenant_id: String,
    pub name: String,
    pub org_type: OrgType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_source_id: Option<String>,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}
