use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::common::{EnrollmentRole, EntityStatus};

/// Canonical enrollment of a user in a class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub source_id: String,
    pub tenant_id: String,
    pub user_source_id: String,
    pub class_source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_source_id: Option<String>,
    pub role: EnrollmentRole,
    #[serde(default)]
    pub primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}
