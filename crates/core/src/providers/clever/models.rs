//! Clever API v3.0 payloads (the inner `data` object of each envelope).

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CleverSchool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub school_number: Option<String>,
    #[serde(default)]
    pub sis_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleverTerm {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleverSection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub section_number: Option<String>,
    pub school: String,
    #[serde(default)]
    pub term_id: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub teachers: Vec<String>,
    /// Primary teacher.
    #[serde(default)]
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleverUser {
    pub id: String,
    #[serde(default)]
    pub name: CleverName,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: CleverRoles,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleverName {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub middle: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleverRoles {
    #[serde(default)]
    pub student: Option<StudentRole>,
    #[serde(default)]
    pub teacher: Option<StaffRole>,
    #[serde(default)]
    pub staff: Option<StaffRole>,
    #[serde(default)]
    pub district_admin: Option<StaffRole>,
    #[serde(default)]
    pub contact: Option<ContactRole>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleCredentials {
    #[serde(default)]
    pub district_username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentRole {
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub schools: Vec<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub sis_id: Option<String>,
    #[serde(default)]
    pub student_number: Option<String>,
    #[serde(default)]
    pub credentials: Option<RoleCredentials>,
}

/// Shared shape of the teacher, staff and district_admin role blocks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaffRole {
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub schools: Vec<String>,
    #[serde(default)]
    pub sis_id: Option<String>,
    #[serde(default)]
    pub credentials: Option<RoleCredentials>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRole {
    #[serde(default)]
    pub sis_id: Option<String>,
    #[serde(default)]
    pub student_relationships: Vec<StudentRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRelationship {
    pub student: String,
    #[serde(default)]
    pub relationship: Option<String>,
    /// `primary` marks the primary contact.
    #[serde(rename = "type", default)]
    pub relationship_kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_with_multiple_roles() {
        let json = r#"{
            "id": "u1",
            "name": {"first": "Ada", "last": "Lovelace"},
            "roles": {
                "teacher": {"school": "s1", "schools": ["s1", "s2"], "sis_id": "T-9"},
                "contact": {"student_relationships": [{"student": "st1", "relationship": "Parent", "type": "primary"}]}
            }
        }"#;
        let user: CleverUser = serde_json::from_str(json).unwrap();
        assert!(user.roles.student.is_none());
        assert_eq!(user.roles.teacher.unwrap().schools, vec!["s1", "s2"]);
        let contact = user.roles.contact.unwrap();
        assert_eq!(
            contact.student_relationships[0].relationship_kind.as_deref(),
            Some("primary")
        );
    }

    #[test]
    fn section_lists_default_empty() {
        let section: CleverSection =
            serde_json::from_str(r#"{"id": "sec1", "school": "s1"}"#).unwrap();
        assert!(section.students.is_empty());
        assert!(section.teacher.is_none());
    }
}
