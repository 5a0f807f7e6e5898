use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::models::{CleverSchool, CleverSection, CleverTerm, CleverUser, RoleCredentials};
use crate::canonical_id;
use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::{EnrollmentRole, EntityStatus, OrgType, TermType, UserRole};
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;

/// Maps Clever records into the canonical model.
///
/// Clever has no enrollment or relationship resources: enrollments come from
/// section rosters and relationships from contacts' `student_relationships`.
pub struct CleverMapper;

impl CleverMapper {
    pub fn map_school(tenant_id: &str, value: Value) -> Result<School> {
        let school: CleverSchool = parse("schools", &value)?;
        Ok(School {
            source_id: school.id,
            tenant_id: tenant_id.to_string(),
            name: school.name.trim().to_string(),
            org_type: OrgType::School,
            identifier: clean(school.school_number.or(school.sis_id)),
            parent_source_id: school.district,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_term(tenant_id: &str, value: Value) -> Result<Term> {
        let term: CleverTerm = parse("terms", &value)?;
        let title = clean(term.name).unwrap_or_else(|| term.id.clone());
        Ok(Term {
            source_id: term.id,
            tenant_id: tenant_id.to_string(),
            term_type: TermType::from_label(&title),
            title,
            start_date: term.start_date,
            end_date: term.end_date,
            school_year: None,
            parent_source_id: None,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_section(tenant_id: &str, value: Value) -> Result<Class> {
        let section: CleverSection = parse("sections", &value)?;
        let title = clean(section.name.clone())
            .or_else(|| clean(section.section_number.clone()))
            .ok_or_else(|| SyncError::MalformedRecord(format!("section {} has no name", section.id)))?;
        Ok(Class {
            source_id: section.id,
            tenant_id: tenant_id.to_string(),
            title,
            class_code: clean(section.section_number),
            school_source_id: section.school,
            course_code: section.course,
            term_source_ids: section.term_id.into_iter().collect(),
            subjects: clean(section.subject).into_iter().collect(),
            grades: clean(section.grade).into_iter().collect(),
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    /// One enrollment per student and teacher on a section roster.
    pub fn section_enrollments(tenant_id: &str, value: &Value) -> Result<Vec<Enrollment>> {
        let section: CleverSection = parse("sections", value)?;
        let teachers = section.teachers.iter().map(|id| (id, EnrollmentRole::Teacher));
        let students = section.students.iter().map(|id| (id, EnrollmentRole::Student));

        Ok(teachers
            .chain(students)
            .filter_map(|(user_id, role)| {
                let source_id =
                    canonical_id::from_fields(&[("section", &section.id), ("user", user_id)])?;
                let primary = role == EnrollmentRole::Teacher
                    && section.teacher.as_deref() == Some(user_id.as_str());
                Some(Enrollment {
                    source_id,
                    tenant_id: tenant_id.to_string(),
                    user_source_id: user_id.clone(),
                    class_source_id: section.id.clone(),
                    school_source_id: Some(section.school.clone()),
                    raw_data: json!({"section": section.id, "user": user_id, "role": role}),
                    role,
                    primary,
                    begin_date: None,
                    end_date: None,
                    status: EntityStatus::Active,
                })
            })
            .collect())
    }

    /// Clever users can hold several role blocks; the canonical role takes
    /// the first of student, teacher, district_admin, staff, contact.
    pub fn map_user(tenant_id: &str, value: Value) -> Result<User> {
        let user: CleverUser = parse("users", &value)?;
        let roles = &user.roles;

        let (role, schools, grades, identifier, credentials) = if let Some(ref r) = roles.student {
            (
                UserRole::Student,
                role_schools(r.school.as_ref(), &r.schools),
                clean(r.grade.clone()).into_iter().collect(),
                clean(r.student_number.clone().or_else(|| r.sis_id.clone())),
                r.credentials.as_ref(),
            )
        } else if let Some((role, r)) = roles
            .teacher
            .as_ref()
            .map(|r| (UserRole::Teacher, r))
            .or_else(|| roles.district_admin.as_ref().map(|r| (UserRole::Administrator, r)))
            .or_else(|| roles.staff.as_ref().map(|r| (UserRole::Teacher, r)))
        {
            (
                role,
                role_schools(r.school.as_ref(), &r.schools),
                Vec::new(),
                clean(r.sis_id.clone()),
                r.credentials.as_ref(),
            )
        } else if let Some(ref r) = roles.contact {
            (UserRole::Parent, Vec::new(), Vec::new(), clean(r.sis_id.clone()), None)
        } else {
            return Err(SyncError::MalformedRecord(format!(
                "user {} has no recognized role",
                user.id
            )));
        };

        let given_name = clean(user.name.first.clone())
            .ok_or_else(|| SyncError::MalformedRecord(format!("user {} missing first name", user.id)))?;
        let family_name = clean(user.name.last.clone())
            .ok_or_else(|| SyncError::MalformedRecord(format!("user {} missing last name", user.id)))?;

        Ok(User {
            username: credentials.and_then(|c: &RoleCredentials| clean(c.district_username.clone())),
            source_id: user.id.clone(),
            tenant_id: tenant_id.to_string(),
            role,
            given_name,
            family_name,
            middle_name: clean(user.name.middle.clone()),
            email: clean(user.email.clone()),
            identifier,
            grades,
            school_source_ids: schools,
            enabled: true,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    /// Relationships listed on a contact's role block.
    pub fn contact_relationships(tenant_id: &str, value: &Value) -> Result<Vec<Relationship>> {
        let user: CleverUser = parse("users", value)?;
        let Some(contact) = user.roles.contact else {
            return Ok(Vec::new());
        };
        Ok(contact
            .student_relationships
            .into_iter()
            .filter_map(|rel| {
                let source_id =
                    canonical_id::from_fields(&[("guardian", &user.id), ("student", &rel.student)])?;
                let relationship_type = clean(rel.relationship.clone())
                    .map(|r| r.to_lowercase())
                    .unwrap_or_else(|| "guardian".to_string());
                Some(Relationship {
                    source_id,
                    tenant_id: tenant_id.to_string(),
                    from_user_source_id: user.id.clone(),
                    raw_data: json!({
                        "contact": user.id,
                        "student": rel.student,
                        "relationship": rel.relationship,
                        "type": rel.relationship_kind,
                    }),
                    is_primary_contact: rel
                        .relationship_kind
                        .as_deref()
                        .map(|k| k.eq_ignore_ascii_case("primary")),
                    to_user_source_id: rel.student,
                    relationship_type,
                    status: EntityStatus::Active,
                })
            })
            .collect())
    }
}

fn role_schools(school: Option<&String>, schools: &[String]) -> Vec<String> {
    let mut out: Vec<String> = schools.to_vec();
    if let Some(primary) = school {
        if !out.contains(primary) {
            out.insert(0, primary.clone());
        }
    }
    out
}

fn parse<T: DeserializeOwned>(resource: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::MalformedRecord(format!("{resource}: {e}")))
}

fn clean(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_roster_becomes_enrollments() {
        let section = json!({
            "id": "sec1",
            "name": "Biology",
            "school": "s1",
            "teacher": "t1",
            "teachers": ["t1", "t2"],
            "students": ["st1"]
        });
        let enrollments = CleverMapper::section_enrollments("tenant", &section).unwrap();
        assert_eq!(enrollments.len(), 3);
        assert_eq!(enrollments[0].source_id, "section=sec1|user=t1");
        assert!(enrollments[0].primary);
        assert!(!enrollments[1].primary);
        assert_eq!(enrollments[2].role, EnrollmentRole::Student);
    }

    #[test]
    fn section_without_name_uses_section_number() {
        let class = CleverMapper::map_section(
            "tenant",
            json!({"id": "sec1", "section_number": " 3 ", "school": "s1", "term_id": "term1"}),
        )
        .unwrap();
        assert_eq!(class.title, "3");
        assert_eq!(class.term_source_ids, vec!["term1"]);
    }

    #[test]
    fn student_role_wins_and_username_comes_from_credentials() {
        let user = CleverMapper::map_user(
            "tenant",
            json!({
                "id": "u1",
                "name": {"first": "Sam", "last": "Lee"},
                "roles": {
                    "student": {
                        "school": "s1",
                        "grade": "5",
                        "student_number": "1001",
                        "credentials": {"district_username": "slee"}
                    }
                }
            }),
        )
        .unwrap();
        assert_eq!(user.role, UserRole::Student);
        assert_eq!(user.school_source_ids, vec!["s1"]);
        assert_eq!(user.username.as_deref(), Some("slee"));
        assert_eq!(user.identifier.as_deref(), Some("1001"));
    }

    #[test]
    fn user_without_roles_is_malformed() {
        let err = CleverMapper::map_user(
            "tenant",
            json!({"id": "u1", "name": {"first": "A", "last": "B"}, "roles": {}}),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRecord(_)));
    }

    #[test]
    fn contact_relationships_flag_primary() {
        let rels = CleverMapper::contact_relationships(
            "tenant",
            &json!({
                "id": "c1",
                "name": {"first": "Pat", "last": "Lee"},
                "roles": {"contact": {"student_relationships": [
                    {"student": "st1", "relationship": "Parent", "type": "primary"},
                    {"student": "st2", "relationship": null}
                ]}}
            }),
        )
        .unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].relationship_type, "parent");
        assert_eq!(rels[0].is_primary_contact, Some(true));
        assert_eq!(rels[1].relationship_type, "guardian");
        assert_eq!(rels[1].is_primary_contact, None);
    }
}
