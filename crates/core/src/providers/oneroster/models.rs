//! OneRoster 1.1 REST wire types.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

/// OneRoster status for any entity.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    #[serde(rename = "tobedeleted")]
    ToBeDeleted,
    Inactive,
}

/// A reference to another entity by sourcedId.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GuidRef {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(rename = "type", default)]
    pub ref_type: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Org {
    pub sourced_id: String,
    #[serde(default)]
    pub status: Status,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub parent: Option<GuidRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSession {
    pub sourced_id: String,
    #[serde(default)]
    pub status: Status,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub parent: Option<GuidRef>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub school_year: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub sourced_id: String,
    #[serde(default)]
    pub status: Status,
    pub title: String,
    #[serde(default)]
    pub class_code: Option<String>,
    #[serde(default)]
    pub course: Option<GuidRef>,
    pub school: GuidRef,
    #[serde(default)]
    pub terms: Vec<GuidRef>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub grades: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub sourced_id: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub enabled_user: bool,
    pub given_name: String,
    pub family_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub role: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub orgs: Vec<GuidRef>,
    #[serde(default)]
    pub agents: Vec<GuidRef>,
    #[serde(default)]
    pub grades: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub sourced_id: String,
    #[serde(default)]
    pub status: Status,
    pub user: GuidRef,
    pub class: GuidRef,
    #[serde(default)]
    pub school: Option<GuidRef>,
    pub role: String,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub primary: bool,
    #[serde(default)]
    pub begin_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_true() -> bool {
    true
}

/// OneRoster booleans arrive as `true` or as `"true"`/`"false"` strings.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }
    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Bool(b) => b,
        Flexible::Text(s) => s.trim().eq_ignore_ascii_case("true"),
    })
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_accepts_string_booleans() {
        let json = r#"{
            "sourcedId": "u1",
            "status": "active",
            "enabledUser": "false",
            "givenName": "Ada",
            "familyName": "Lovelace",
            "role": "student"
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert!(!user.enabled_user);
        assert!(user.agents.is_empty());
    }

    #[test]
    fn user_enabled_defaults_true() {
        let json = r#"{"sourcedId":"u1","givenName":"A","familyName":"B","role":"teacher"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert!(user.enabled_user);
        assert_eq!(user.status, Status::Active);
    }

    #[test]
    fn session_school_year_as_number_or_string() {
        let numeric = r#"{"sourcedId":"s","title":"Fall","startDate":"2024-08-01","endDate":"2024-12-20","type":"semester","schoolYear":2025}"#;
        let text = r#"{"sourcedId":"s","title":"Fall","startDate":"2024-08-01","endDate":"2024-12-20","type":"semester","schoolYear":"2025"}"#;
        let a: AcademicSession = serde_json::from_str(numeric).unwrap();
        let b: AcademicSession = serde_json::from_str(text).unwrap();
        assert_eq!(a.school_year.as_deref(), Some("2025"));
        assert_eq!(b.school_year.as_deref(), Some("2025"));
    }

    #[test]
    fn tobedeleted_status() {
        let json = r#"{"sourcedId":"o","status":"tobedeleted","name":"X","type":"school"}"#;
        let org: Org = serde_json::from_str(json).unwrap();
        assert_eq!(org.status, Status::ToBeDeleted);
    }
}
