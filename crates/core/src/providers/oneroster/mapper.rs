use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::models;
use crate::canonical_id;
use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::{EnrollmentRole, EntityStatus, OrgType, TermType, UserRole};
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;

/// Normalizes OneRoster 1.1 records into the canonical model.
///
/// OneRoster already speaks in sourcedIds, so most of the work is trimming
/// whitespace and folding the vocabulary into the canonical enums.
pub struct OneRosterMapper;

impl OneRosterMapper {
    pub fn map_org(tenant_id: &str, value: Value) -> Result<School> {
        let org: models::Org = parse("orgs", &value)?;
        Ok(School {
            source_id: clean(&org.sourced_id),
            tenant_id: tenant_id.to_string(),
            name: clean(&org.name),
            org_type: match org.org_type.trim().to_lowercase().as_str() {
                "district" | "local" | "state" | "national" => OrgType::District,
                "school" => OrgType::School,
                "department" => OrgType::Department,
                _ => OrgType::Other,
            },
            identifier: clean_opt(org.identifier.as_deref()),
            parent_source_id: org.parent.map(|p| clean(&p.sourced_id)),
            status: status(org.status),
            raw_data: value,
        })
    }

    pub fn map_academic_session(tenant_id: &str, value: Value) -> Result<Term> {
        let session: models::AcademicSession = parse("academicSessions", &value)?;
        Ok(Term {
            source_id: clean(&session.sourced_id),
            tenant_id: tenant_id.to_string(),
            title: clean(&session.title),
            term_type: TermType::from_label(&session.session_type),
            start_date: session.start_date,
            end_date: session.end_date,
            school_year: clean_opt(session.school_year.as_deref()),
            parent_source_id: session.parent.map(|p| clean(&p.sourced_id)),
            status: status(session.status),
            raw_data: value,
        })
    }

    pub fn map_class(tenant_id: &str, value: Value) -> Result<Class> {
        let class: models::Class = parse("classes", &value)?;
        Ok(Class {
            source_id: clean(&class.sourced_id),
            tenant_id: tenant_id.to_string(),
            title: clean(&class.title),
            class_code: clean_opt(class.class_code.as_deref()),
            school_source_id: clean(&class.school.sourced_id),
            course_code: class.course.map(|c| clean(&c.sourced_id)),
            term_source_ids: class.terms.iter().map(|t| clean(&t.sourced_id)).collect(),
            subjects: class.subjects.iter().map(|s| clean(s)).collect(),
            grades: class.grades.iter().map(|g| clean(g)).collect(),
            status: status(class.status),
            raw_data: value,
        })
    }

    /// Map a user and return the agent links used to derive relationships.
    pub fn map_user(tenant_id: &str, value: Value) -> Result<(User, AgentLink)> {
        let user: models::User = parse("users", &value)?;
        let role = UserRole::from_label(&user.role);
        let source_id = clean(&user.sourced_id);
        let link = AgentLink {
            user_source_id: source_id.clone(),
            role: role.clone(),
            agent_source_ids: user.agents.iter().map(|a| clean(&a.sourced_id)).collect(),
        };
        let mapped = User {
            source_id,
            tenant_id: tenant_id.to_string(),
            role,
            given_name: clean(&user.given_name),
            family_name: clean(&user.family_name),
            middle_name: clean_opt(user.middle_name.as_deref()),
            email: clean_opt(user.email.as_deref()),
            username: clean_opt(user.username.as_deref()),
            identifier: clean_opt(user.identifier.as_deref()),
            grades: user.grades.iter().map(|g| clean(g)).collect(),
            school_source_ids: user.orgs.iter().map(|o| clean(&o.sourced_id)).collect(),
            enabled: user.enabled_user,
            status: status(user.status),
            raw_data: value,
        };
        Ok((mapped, link))
    }

    pub fn map_enrollment(tenant_id: &str, value: Value) -> Result<Enrollment> {
        let enrollment: models::Enrollment = parse("enrollments", &value)?;
        Ok(Enrollment {
            source_id: clean(&enrollment.sourced_id),
            tenant_id: tenant_id.to_string(),
            user_source_id: clean(&enrollment.user.sourced_id),
            class_source_id: clean(&enrollment.class.sourced_id),
            school_source_id: enrollment.school.map(|s| clean(&s.sourced_id)),
            role: enrollment_role(&enrollment.role),
            primary: enrollment.primary,
            begin_date: enrollment.begin_date,
            end_date: enrollment.end_date,
            status: status(enrollment.status),
            raw_data: value,
        })
    }
}

/// A user's `agents` list, kept to derive guardian relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLink {
    pub user_source_id: String,
    pub role: UserRole,
    pub agent_source_ids: Vec<String>,
}

/// Derive guardian -> student relationships from both sides of the agent
/// links. The same pair seen from both sides yields one relationship.
pub fn derive_relationships(tenant_id: &str, links: &[AgentLink]) -> Vec<Relationship> {
    let roles: HashMap<&str, &UserRole> = links
        .iter()
        .map(|l| (l.user_source_id.as_str(), &l.role))
        .collect();

    let mut pairs: BTreeMap<(String, String), ()> = BTreeMap::new();
    for link in links {
        for agent in &link.agent_source_ids {
            if agent.is_empty() {
                continue;
            }
            match link.role {
                UserRole::Student => {
                    pairs.insert((agent.clone(), link.user_source_id.clone()), ());
                }
                UserRole::Parent | UserRole::Guardian | UserRole::Other => {
                    pairs.insert((link.user_source_id.clone(), agent.clone()), ());
                }
                _ => {}
            }
        }
    }

    pairs
        .into_keys()
        .filter_map(|(guardian, student)| {
            let source_id =
                canonical_id::from_fields(&[("guardian", &guardian), ("student", &student)])?;
            let relationship_type = match roles.get(guardian.as_str()) {
                Some(UserRole::Parent) => "parent",
                _ => "guardian",
            };
            Some(Relationship {
                source_id,
                tenant_id: tenant_id.to_string(),
                raw_data: serde_json::json!({"guardian": guardian, "student": student}),
                from_user_source_id: guardian,
                to_user_source_id: student,
                relationship_type: relationship_type.to_string(),
                is_primary_contact: None,
                status: EntityStatus::Active,
            })
        })
        .collect()
}

pub fn enrollment_role(label: &str) -> EnrollmentRole {
    match label.trim().to_lowercase().as_str() {
        "teacher" => EnrollmentRole::Teacher,
        "aide" | "proctor" => EnrollmentRole::Aide,
        "administrator" => EnrollmentRole::Administrator,
        _ => EnrollmentRole::Student,
    }
}

fn status(status: models::Status) -> EntityStatus {
    match status {
        models::Status::Active => EntityStatus::Active,
        models::Status::ToBeDeleted | models::Status::Inactive => EntityStatus::Inactive,
    }
}

fn parse<T: DeserializeOwned>(endpoint: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::MalformedRecord(format!("{endpoint}: {e}")))
}

fn clean(s: &str) -> String {
    s.trim().to_string()
}

fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_org_trims_whitespace() {
        let org = OneRosterMapper::map_org(
            "t1",
            json!({
                "sourcedId": "  org-001  ",
                "status": "active",
                "name": "  Test District  ",
                "type": "district",
                "parent": {"sourcedId": "  state-1 ", "type": "org"}
            }),
        )
        .unwrap();
        assert_eq!(org.source_id, "org-001");
        assert_eq!(org.name, "Test District");
        assert_eq!(org.org_type, OrgType::District);
        assert_eq!(org.parent_source_id.as_deref(), Some("state-1"));
    }

    #[test]
    fn map_class_collects_references() {
        let class = OneRosterMapper::map_class(
            "t1",
            json!({
                "sourcedId": "class-1",
                "title": "Algebra I",
                "classCode": " ALG1 ",
                "course": {"sourcedId": "course-1"},
                "school": {"sourcedId": "school-1"},
                "terms": [{"sourcedId": "term-1"}, {"sourcedId": "term-2"}],
                "grades": ["09"]
            }),
        )
        .unwrap();
        assert_eq!(class.class_code.as_deref(), Some("ALG1"));
        assert_eq!(class.school_source_id, "school-1");
        assert_eq!(class.term_source_ids, vec!["term-1", "term-2"]);
    }

    #[test]
    fn tobedeleted_maps_to_inactive() {
        let enrollment = OneRosterMapper::map_enrollment(
            "t1",
            json!({
                "sourcedId": "e1",
                "status": "tobedeleted",
                "user": {"sourcedId": "u1"},
                "class": {"sourcedId": "c1"},
                "role": "teacher",
                "primary": "true"
            }),
        )
        .unwrap();
        assert_eq!(enrollment.status, EntityStatus::Inactive);
        assert_eq!(enrollment.role, EnrollmentRole::Teacher);
        assert!(enrollment.primary);
    }

    #[test]
    fn user_without_required_name_is_malformed() {
        let err = OneRosterMapper::map_user("t1", json!({"sourcedId": "u1", "role": "student"}))
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRecord(_)));
    }

    #[test]
    fn relationships_dedupe_across_both_sides() {
        let links = vec![
            AgentLink {
                user_source_id: "s1".into(),
                role: UserRole::Student,
                agent_source_ids: vec!["p1".into()],
            },
            AgentLink {
                user_source_id: "p1".into(),
                role: UserRole::Parent,
                agent_source_ids: vec!["s1".into(), "s2".into()],
            },
            AgentLink {
                user_source_id: "t1".into(),
                role: UserRole::Teacher,
                agent_source_ids: vec!["s1".into()],
            },
        ];
        let rels = derive_relationships("tenant", &links);
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].source_id, "guardian=p1|student=s1");
        assert_eq!(rels[0].relationship_type, "parent");
        assert_eq!(rels[1].to_user_source_id, "s2");
    }

    #[test]
    fn proctor_enrollment_is_aide() {
        assert_eq!(enrollment_role("proctor"), EnrollmentRole::Aide);
        assert_eq!(enrollment_role("student"), EnrollmentRole::Student);
    }
}
