use serde::{Deserialize, Serialize};

use super::common::{EntityStatus, UserRole};

/// Canonical user record (students, staff, and contacts alike).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub source_id: String,
    pub tenant_id: String,
    pub role: UserRole,
    pub given_name: String,
    pub family_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub grades: Vec<String>,
    #[serde(default)]
    pub school_source_ids: Vec<String>,
    pub enabled: bool,
    pub status: EntityStatus,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_optional_fields_omitted() {
        let user = User {
            source_id: "studentUniqueId=604822".into(),
            tenant_id: "t1".into(),
            role: UserRole::Student,
            given_name: "Lisa".into(),
            family_name: "Woods".into(),
            middle_name: None,
            email: None,
            username: None,
            identifier: None,
            grades: vec![],
            school_source_ids: vec![],
            enabled: true,
            status: EntityStatus::Active,
            raw_data: serde_json::Value::Null,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("\"email\""));
        assert!(!json.contains("\"middleName\""));
        assert!(json.contains("\"givenName\":\"Lisa\""));
    }
}
