use serde::{Deserialize, Serialize};

use super::common::EntityStatus;

/// Canonical class (section) record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub source_id: String,
    pub tenant_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_code: Option<String>,
    pub school_source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(default)]
    pub term_source_ids: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub grades: Vec<String>,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}
