use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::EntityType;

/// The (tenant, provider, entity type) triple that owns a cursor and an ID set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncScope {
    pub tenant_id: String,
    pub provider_id: String,
    pub entity_type: EntityType,
}

impl SyncScope {
    pub fn new(tenant_id: &str, provider_id: &str, entity_type: EntityType) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            provider_id: provider_id.to_string(),
            entity_type,
        }
    }
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id, self.provider_id, self.entity_type
        )
    }
}

/// Provider-defined resume position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    /// Highest native change version consumed.
    ChangeVersion(i64),
    /// Start of the last successful modified-since window.
    Timestamp(DateTime<Utc>),
}

impl CursorValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CursorValue::ChangeVersion(_) => "change_version",
            CursorValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn encode(&self) -> String {
        match self {
            CursorValue::ChangeVersion(v) => v.to_string(),
            CursorValue::Timestamp(ts) => ts.to_rfc3339(),
        }
    }

    pub fn decode(kind: &str, value: &str) -> Option<Self> {
        match kind {
            "change_version" => value.parse().ok().map(CursorValue::ChangeVersion),
            "timestamp" => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| CursorValue::Timestamp(dt.with_timezone(&Utc))),
            _ => None,
        }
    }

    /// True when `self` is not behind `other`. Cursors of different kinds
    /// are never comparable, so switching strategies always resets.
    pub fn is_at_or_after(&self, other: &CursorValue) -> bool {
        match (self, other) {
            (CursorValue::ChangeVersion(a), CursorValue::ChangeVersion(b)) => a >= b,
            (CursorValue::Timestamp(a), CursorValue::Timestamp(b)) => a >= b,
            _ => true,
        }
    }
}

/// A committed resume position for one [`SyncScope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub scope: SyncScope,
    pub value: CursorValue,
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn change_version(&self) -> Option<i64> {
        match self.value {
            CursorValue::ChangeVersion(v) => Some(v),
            CursorValue::Timestamp(_) => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.value {
            CursorValue::Timestamp(ts) => Some(ts),
            CursorValue::ChangeVersion(_) => None,
        }
    }
}
