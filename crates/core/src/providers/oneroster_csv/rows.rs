//! Row structs for the OneRoster 1.1 CSV binding.
//!
//! Columns are read as strings and converted per row, so a bad value rejects
//! only the row it sits in.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::{EntityStatus, OrgType, TermType, UserRole};
use crate::models::enrollment::Enrollment;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;
use crate::providers::oneroster::mapper::{enrollment_role, AgentLink};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn csv_to_vec(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        Vec::new()
    } else {
        s.split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

fn csv_to_bool(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

fn csv_to_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SyncError::MalformedRecord(format!("invalid date '{s}': {e}")))
}

fn csv_to_opt_date(s: &str) -> Result<Option<NaiveDate>> {
    if s.trim().is_empty() {
        Ok(None)
    } else {
        csv_to_date(s).map(Some)
    }
}

fn csv_to_status(s: &str) -> Result<EntityStatus> {
    match s.trim().to_lowercase().as_str() {
        "" | "active" => Ok(EntityStatus::Active),
        "tobedeleted" | "inactive" => Ok(EntityStatus::Inactive),
        other => Err(SyncError::MalformedRecord(format!("invalid status '{other}'"))),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn required(value: &str, column: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| SyncError::MalformedRecord(format!("missing {column}")))
}

fn raw<T: Serialize>(row: &T) -> serde_json::Value {
    serde_json::to_value(row).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// orgs.csv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgCsvRow {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "dateLastModified", default)]
    pub date_last_modified: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub org_type: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(rename = "parentSourcedId", default)]
    pub parent_sourced_id: String,
}

impl OrgCsvRow {
    pub fn to_school(&self, tenant_id: &str) -> Result<School> {
        Ok(School {
            source_id: required(&self.sourced_id, "sourcedId")?,
            tenant_id: tenant_id.to_string(),
            name: required(&self.name, "name")?,
            org_type: match self.org_type.trim().to_lowercase().as_str() {
                "district" | "local" | "state" | "national" => OrgType::District,
                "school" => OrgType::School,
                "department" => OrgType::Department,
                _ => OrgType::Other,
            },
            identifier: non_empty(&self.identifier),
            parent_source_id: non_empty(&self.parent_sourced_id),
            status: csv_to_status(&self.status)?,
            raw_data: raw(self),
        })
    }
}

// ---------------------------------------------------------------------------
// academicSessions.csv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicSessionCsvRow {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "dateLastModified", default)]
    pub date_last_modified: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub session_type: String,
    #[serde(rename = "startDate", default)]
    pub start_date: String,
    #[serde(rename = "endDate", default)]
    pub end_date: String,
    #[serde(rename = "parentSourcedId", default)]
    pub parent_sourced_id: String,
    #[serde(rename = "schoolYear", default)]
    pub school_year: String,
}

impl AcademicSessionCsvRow {
    pub fn to_term(&self, tenant_id: &str) -> Result<Term> {
        Ok(Term {
            source_id: required(&self.sourced_id, "sourcedId")?,
            tenant_id: tenant_id.to_string(),
            title: required(&self.title, "title")?,
            term_type: TermType::from_label(&self.session_type),
            start_date: csv_to_date(&self.start_date)?,
            end_date: csv_to_date(&self.end_date)?,
            school_year: non_empty(&self.school_year),
            parent_source_id: non_empty(&self.parent_sourced_id),
            status: csv_to_status(&self.status)?,
            raw_data: raw(self),
        })
    }
}

// ---------------------------------------------------------------------------
// classes.csv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCsvRow {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "dateLastModified", default)]
    pub date_last_modified: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub grades: String,
    #[serde(rename = "courseSourcedId", default)]
    pub course_sourced_id: String,
    #[serde(rename = "classCode", default)]
    pub class_code: String,
    #[serde(rename = "classType", default)]
    pub class_type: String,
    #[serde(rename = "schoolSourcedId", default)]
    pub school_sourced_id: String,
    #[serde(rename = "termSourcedIds", default)]
    pub term_sourced_ids: String,
    #[serde(default)]
    pub subjects: String,
}

impl ClassCsvRow {
    pub fn to_class(&self, tenant_id: &str) -> Result<Class> {
        Ok(Class {
            source_id: required(&self.sourced_id, "sourcedId")?,
            tenant_id: tenant_id.to_string(),
            title: required(&self.title, "title")?,
            class_code: non_empty(&self.class_code),
            school_source_id: required(&self.school_sourced_id, "schoolSourcedId")?,
            course_code: non_empty(&self.course_sourced_id),
            term_source_ids: csv_to_vec(&self.term_sourced_ids),
            subjects: csv_to_vec(&self.subjects),
            grades: csv_to_vec(&self.grades),
            status: csv_to_status(&self.status)?,
            raw_data: raw(self),
        })
    }
}

// ---------------------------------------------------------------------------
// users.csv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCsvRow {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "dateLastModified", default)]
    pub date_last_modified: String,
    #[serde(rename = "enabledUser", default)]
    pub enabled_user: String,
    #[serde(rename = "orgSourcedIds", alias = "orgs", default)]
    pub org_sourced_ids: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "givenName", default)]
    pub given_name: String,
    #[serde(rename = "familyName", default)]
    pub family_name: String,
    #[serde(rename = "middleName", default)]
    pub middle_name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "agentSourcedIds", alias = "agents", default)]
    pub agent_sourced_ids: String,
    #[serde(default)]
    pub grades: String,
}

impl UserCsvRow {
    pub fn to_user(&self, tenant_id: &str) -> Result<User> {
        Ok(User {
            source_id: required(&self.sourced_id, "sourcedId")?,
            tenant_id: tenant_id.to_string(),
            role: UserRole::from_label(&required(&self.role, "role")?),
            given_name: required(&self.given_name, "givenName")?,
            family_name: required(&self.family_name, "familyName")?,
            middle_name: non_empty(&self.middle_name),
            email: non_empty(&self.email),
            username: non_empty(&self.username),
            identifier: non_empty(&self.identifier),
            grades: csv_to_vec(&self.grades),
            school_source_ids: csv_to_vec(&self.org_sourced_ids),
            // An empty enabledUser column means enabled.
            enabled: self.enabled_user.trim().is_empty() || csv_to_bool(&self.enabled_user),
            status: csv_to_status(&self.status)?,
            raw_data: raw(self),
        })
    }

    pub fn agent_link(&self) -> AgentLink {
        AgentLink {
            user_source_id: self.sourced_id.trim().to_string(),
            role: UserRole::from_label(&self.role),
            agent_source_ids: csv_to_vec(&self.agent_sourced_ids),
        }
    }
}

// ---------------------------------------------------------------------------
// enrollments.csv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentCsvRow {
    #[serde(rename = "sourcedId")]
    pub sourced_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "dateLastModified", default)]
    pub date_last_modified: String,
    #[serde(rename = "classSourcedId", default)]
    pub class_sourced_id: String,
    #[serde(rename = "schoolSourcedId", default)]
    pub school_sourced_id: String,
    #[serde(rename = "userSourcedId", default)]
    pub user_sourced_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub primary: String,
    #[serde(rename = "beginDate", default)]
    pub begin_date: String,
    #[serde(rename = "endDate", default)]
    pub end_date: String,
}

impl EnrollmentCsvRow {
    pub fn to_enrollment(&self, tenant_id: &str) -> Result<Enrollment> {
        Ok(Enrollment {
            source_id: required(&self.sourced_id, "sourcedId")?,
            tenant_id: tenant_id.to_string(),
            user_source_id: required(&self.user_sourced_id, "userSourcedId")?,
            class_source_id: required(&self.class_sourced_id, "classSourcedId")?,
            school_source_id: non_empty(&self.school_sourced_id),
            role: enrollment_role(&self.role),
            primary: csv_to_bool(&self.primary),
            begin_date: csv_to_opt_date(&self.begin_date)?,
            end_date: csv_to_opt_date(&self.end_date)?,
            status: csv_to_status(&self.status)?,
            raw_data: raw(self),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::EnrollmentRole;

    fn user_row() -> UserCsvRow {
        UserCsvRow {
            sourced_id: " u-1 ".into(),
            status: "active".into(),
            date_last_modified: String::new(),
            enabled_user: String::new(),
            org_sourced_ids: "org-1, org-2".into(),
            role: "student".into(),
            username: "jdoe".into(),
            given_name: "Jane".into(),
            family_name: "Doe".into(),
            middle_name: String::new(),
            identifier: String::new(),
            email: String::new(),
            agent_sourced_ids: "p-1".into(),
            grades: "09".into(),
        }
    }

    #[test]
    fn csv_to_vec_trims_and_drops_empty() {
        assert!(csv_to_vec("").is_empty());
        assert_eq!(csv_to_vec(" a , b,,c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(csv_to_status("").unwrap(), EntityStatus::Active);
        assert_eq!(csv_to_status("tobedeleted").unwrap(), EntityStatus::Inactive);
        assert!(matches!(
            csv_to_status("archived"),
            Err(SyncError::MalformedRecord(_))
        ));
    }

    #[test]
    fn user_row_maps_lists_and_defaults() {
        let user = user_row().to_user("t1").unwrap();
        assert_eq!(user.source_id, "u-1");
        assert_eq!(user.school_source_ids, vec!["org-1", "org-2"]);
        assert!(user.enabled);
        assert!(user.middle_name.is_none());
        assert_eq!(user.raw_data["username"], "jdoe");

        let link = user_row().agent_link();
        assert_eq!(link.user_source_id, "u-1");
        assert_eq!(link.agent_source_ids, vec!["p-1"]);
    }

    #[test]
    fn user_row_without_name_is_rejected() {
        let mut row = user_row();
        row.family_name = "  ".into();
        let err = row.to_user("t1").unwrap_err();
        assert!(err.to_string().contains("familyName"));
    }

    #[test]
    fn enrollment_row_with_bad_date_is_rejected() {
        let row = EnrollmentCsvRow {
            sourced_id: "e-1".into(),
            status: String::new(),
            date_last_modified: String::new(),
            class_sourced_id: "c-1".into(),
            school_sourced_id: String::new(),
            user_sourced_id: "u-1".into(),
            role: "teacher".into(),
            primary: "TRUE".into(),
            begin_date: "2024-13-01".into(),
            end_date: String::new(),
        };
        assert!(matches!(
            row.to_enrollment("t1"),
            Err(SyncError::MalformedRecord(_))
        ));

        let fixed = EnrollmentCsvRow {
            begin_date: "2024-08-15".into(),
            ..row
        };
        let enrollment = fixed.to_enrollment("t1").unwrap();
        assert_eq!(enrollment.role, EnrollmentRole::Teacher);
        assert!(enrollment.primary);
        assert_eq!(
            enrollment.begin_date,
            Some(NaiveDate::from_ymd_opt(2024, 8, 15).unwrap())
        );
    }
}
