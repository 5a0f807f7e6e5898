use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::common::{EntityStatus, TermType};

/// Canonical academic term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub source_id: String,
    pub tenant_id: String,
    pub title: String,
    pub term_type: TermType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_source_id: Option<String>,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}
