//! Ed-Fi resource payloads to canonical entities and natural-key source IDs.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::models::{
    DeletedResource, EdFiParent, EdFiSchool, EdFiSection, EdFiSession, EdFiStaff,
    EdFiStaffSectionAssociation, EdFiStudent, EdFiStudentParentAssociation,
    EdFiStudentSectionAssociation, ElectronicMail, SectionReference,
};
use super::Resource;
use crate::canonical_id;
use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::{EnrollmentRole, EntityStatus, OrgType, TermType, UserRole};
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;
use crate::models::CanonicalEntity;

/// Maps Ed-Fi resources into canonical entities.
///
/// Every source ID is the resource's natural key rendered through
/// [`canonical_id::from_fields`], so keys built from a full record and keys
/// built from a `/deletes` entry's `keyValues` agree.
pub struct EdFiMapper;

impl EdFiMapper {
    pub fn map(resource: Resource, tenant_id: &str, value: Value) -> Result<CanonicalEntity> {
        Ok(match resource {
            Resource::Schools => Self::map_school(tenant_id, value)?.into(),
            Resource::Sessions => Self::map_session(tenant_id, value)?.into(),
            Resource::Sections => Self::map_section(tenant_id, value)?.into(),
            Resource::Students | Resource::Staffs | Resource::Parents => {
                Self::map_user(resource, tenant_id, value)?.into()
            }
            Resource::StudentSectionAssociations | Resource::StaffSectionAssociations => {
                Self::map_enrollment(resource, tenant_id, value)?.into()
            }
            Resource::StudentParentAssociations => {
                Self::map_relationship(tenant_id, value)?.into()
            }
        })
    }

    /// Natural-key source ID of a full resource record.
    pub fn source_id(resource: Resource, value: &Value) -> Result<String> {
        match resource {
            Resource::Schools => {
                let school: EdFiSchool = parse(resource, value)?;
                school_key(school.school_id)
            }
            Resource::Sessions => {
                let session: EdFiSession = parse(resource, value)?;
                session_key(&session)
            }
            Resource::Sections => {
                let section: EdFiSection = parse(resource, value)?;
                section_key(&section)
            }
            Resource::Students => {
                let student: EdFiStudent = parse(resource, value)?;
                key(resource, &[("studentUniqueId", student.student_unique_id)])
            }
            Resource::Staffs => {
                let staff: EdFiStaff = parse(resource, value)?;
                key(resource, &[("staffUniqueId", staff.staff_unique_id)])
            }
            Resource::Parents => {
                let parent: EdFiParent = parse(resource, value)?;
                key(resource, &[("parentUniqueId", parent.parent_unique_id)])
            }
            Resource::StudentSectionAssociations => {
                let ssa: EdFiStudentSectionAssociation = parse(resource, value)?;
                student_section_key(&ssa)
            }
            Resource::StaffSectionAssociations => {
                let ssa: EdFiStaffSectionAssociation = parse(resource, value)?;
                staff_section_key(&ssa)
            }
            Resource::StudentParentAssociations => {
                let spa: EdFiStudentParentAssociation = parse(resource, value)?;
                student_parent_key(&spa)
            }
        }
    }

    /// Source ID of a deleted resource, from its `keyValues`.
    pub fn delete_source_id(resource: Resource, deleted: &DeletedResource) -> Result<String> {
        let key_values = deleted.key_values.as_ref().ok_or_else(|| {
            SyncError::MalformedRecord(format!(
                "{}: delete {} has no keyValues",
                resource.path(),
                deleted.id.as_deref().unwrap_or("<unknown>")
            ))
        })?;
        canonical_id::from_key_values(&normalize_dates(key_values)).ok_or_else(|| {
            SyncError::MalformedRecord(format!("{}: delete with empty keyValues", resource.path()))
        })
    }

    pub fn map_school(tenant_id: &str, value: Value) -> Result<School> {
        let school: EdFiSchool = parse(Resource::Schools, &value)?;
        Ok(School {
            source_id: school_key(school.school_id)?,
            tenant_id: tenant_id.to_string(),
            name: clean(&school.name_of_institution),
            org_type: OrgType::School,
            identifier: Some(school.school_id.to_string()),
            parent_source_id: school
                .local_education_agency_reference
                .map(|lea| format!("localEducationAgencyId={}", lea.local_education_agency_id)),
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_session(tenant_id: &str, value: Value) -> Result<Term> {
        let session: EdFiSession = parse(Resource::Sessions, &value)?;
        let term_type = session
            .term_descriptor
            .as_deref()
            .map(term_type_from_descriptor)
            .unwrap_or(TermType::Term);
        Ok(Term {
            source_id: session_key(&session)?,
            tenant_id: tenant_id.to_string(),
            title: clean(&session.session_name),
            term_type,
            start_date: session.begin_date,
            end_date: session.end_date,
            school_year: Some(session.school_year_type_reference.school_year.to_string()),
            parent_source_id: None,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_section(tenant_id: &str, value: Value) -> Result<Class> {
        let section: EdFiSection = parse(Resource::Sections, &value)?;
        let offering = &section.course_offering_reference;
        let title = section
            .section_name
            .as_deref()
            .map(clean)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                format!("{} {}", clean(&offering.local_course_code), clean(&section.section_identifier))
            });
        Ok(Class {
            source_id: section_key(&section)?,
            tenant_id: tenant_id.to_string(),
            title,
            class_code: Some(clean(&section.section_identifier)),
            school_source_id: school_key(offering.school_id)?,
            course_code: Some(clean(&offering.local_course_code)),
            term_source_ids: vec![key(
                Resource::Sessions,
                &[
                    ("schoolId", offering.school_id.to_string()),
                    ("schoolYear", offering.school_year.to_string()),
                    ("sessionName", offering.session_name.clone()),
                ],
            )?],
            subjects: Vec::new(),
            grades: Vec::new(),
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_user(resource: Resource, tenant_id: &str, value: Value) -> Result<User> {
        let (source_id, role, identifier, first, middle, last, username, mails) = match resource {
            Resource::Students => {
                let s: EdFiStudent = parse(resource, &value)?;
                (
                    key(resource, &[("studentUniqueId", s.student_unique_id.clone())])?,
                    UserRole::Student,
                    s.student_unique_id,
                    s.first_name,
                    s.middle_name,
                    s.last_surname,
                    None,
                    s.electronic_mails,
                )
            }
            Resource::Staffs => {
                let s: EdFiStaff = parse(resource, &value)?;
                (
                    key(resource, &[("staffUniqueId", s.staff_unique_id.clone())])?,
                    UserRole::Teacher,
                    s.staff_unique_id,
                    s.first_name,
                    s.middle_name,
                    s.last_surname,
                    s.login_id,
                    s.electronic_mails,
                )
            }
            Resource::Parents => {
                let p: EdFiParent = parse(resource, &value)?;
                (
                    key(resource, &[("parentUniqueId", p.parent_unique_id.clone())])?,
                    UserRole::Parent,
                    p.parent_unique_id,
                    p.first_name,
                    p.middle_name,
                    p.last_surname,
                    None,
                    p.electronic_mails,
                )
            }
            other => {
                return Err(SyncError::MalformedRecord(format!(
                    "{} is not a user resource",
                    other.path()
                )))
            }
        };

        Ok(User {
            source_id,
            tenant_id: tenant_id.to_string(),
            role,
            given_name: clean(&first),
            family_name: clean(&last),
            middle_name: middle.as_deref().map(clean).filter(|s| !s.is_empty()),
            email: primary_email(&mails),
            username: username.as_deref().map(clean).filter(|s| !s.is_empty()),
            identifier: Some(clean(&identifier)),
            grades: Vec::new(),
            school_source_ids: Vec::new(),
            enabled: true,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }

    pub fn map_enrollment(resource: Resource, tenant_id: &str, value: Value) -> Result<Enrollment> {
        match resource {
            Resource::StudentSectionAssociations => {
                let ssa: EdFiStudentSectionAssociation = parse(resource, &value)?;
                Ok(Enrollment {
                    source_id: student_section_key(&ssa)?,
                    tenant_id: tenant_id.to_string(),
                    user_source_id: key(
                        resource,
                        &[("studentUniqueId", ssa.student_reference.student_unique_id.clone())],
                    )?,
                    class_source_id: section_reference_key(&ssa.section_reference)?,
                    school_source_id: Some(school_key(ssa.section_reference.school_id)?),
                    role: EnrollmentRole::Student,
                    primary: ssa.homeroom_indicator.unwrap_or(false),
                    begin_date: Some(ssa.begin_date),
                    end_date: ssa.end_date,
                    status: EntityStatus::Active,
                    raw_data: value,
                })
            }
            Resource::StaffSectionAssociations => {
                let ssa: EdFiStaffSectionAssociation = parse(resource, &value)?;
                let position = descriptor_value(&ssa.classroom_position_descriptor).to_lowercase();
                let (role, primary) = if position.contains("teacher of record") {
                    (EnrollmentRole::Teacher, true)
                } else if position.contains("assistant") || position.contains("support") {
                    (EnrollmentRole::Aide, false)
                } else {
                    (EnrollmentRole::Teacher, false)
                };
                Ok(Enrollment {
                    source_id: staff_section_key(&ssa)?,
                    tenant_id: tenant_id.to_string(),
                    user_source_id: key(
                        resource,
                        &[("staffUniqueId", ssa.staff_reference.staff_unique_id.clone())],
                    )?,
                    class_source_id: section_reference_key(&ssa.section_reference)?,
                    school_source_id: Some(school_key(ssa.section_reference.school_id)?),
                    role,
                    primary,
                    begin_date: ssa.begin_date,
                    end_date: ssa.end_date,
                    status: EntityStatus::Active,
                    raw_data: value,
                })
            }
            other => Err(SyncError::MalformedRecord(format!(
                "{} is not an enrollment resource",
                other.path()
            ))),
        }
    }

    pub fn map_relationship(tenant_id: &str, value: Value) -> Result<Relationship> {
        let spa: EdFiStudentParentAssociation =
            parse(Resource::StudentParentAssociations, &value)?;
        Ok(Relationship {
            source_id: student_parent_key(&spa)?,
            tenant_id: tenant_id.to_string(),
            from_user_source_id: key(
                Resource::Parents,
                &[("parentUniqueId", spa.parent_reference.parent_unique_id.clone())],
            )?,
            to_user_source_id: key(
                Resource::Students,
                &[("studentUniqueId", spa.student_reference.student_unique_id.clone())],
            )?,
            relationship_type: spa
                .relation_descriptor
                .as_deref()
                .map(|d| descriptor_value(d).trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "guardian".to_string()),
            is_primary_contact: spa.primary_contact_status,
            status: EntityStatus::Active,
            raw_data: value,
        })
    }
}

fn parse<T: DeserializeOwned>(resource: Resource, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::MalformedRecord(format!("{}: {e}", resource.path())))
}

fn key(resource: Resource, fields: &[(&str, String)]) -> Result<String> {
    canonical_id::from_fields(fields).ok_or_else(|| {
        SyncError::MalformedRecord(format!("{}: empty natural key", resource.path()))
    })
}

fn school_key(school_id: i64) -> Result<String> {
    key(Resource::Schools, &[("schoolId", school_id.to_string())])
}

fn session_key(session: &EdFiSession) -> Result<String> {
    key(
        Resource::Sessions,
        &[
            ("schoolId", session.school_reference.school_id.to_string()),
            ("schoolYear", session.school_year_type_reference.school_year.to_string()),
            ("sessionName", session.session_name.clone()),
        ],
    )
}

fn section_fields(r: &SectionReference) -> Vec<(&'static str, String)> {
    vec![
        ("localCourseCode", r.local_course_code.clone()),
        ("schoolId", r.school_id.to_string()),
        ("schoolYear", r.school_year.to_string()),
        ("sectionIdentifier", r.section_identifier.clone()),
        ("sessionName", r.session_name.clone()),
    ]
}

fn section_reference_key(r: &SectionReference) -> Result<String> {
    key(Resource::Sections, &section_fields(r))
}

fn section_key(section: &EdFiSection) -> Result<String> {
    let offering = &section.course_offering_reference;
    section_reference_key(&SectionReference {
        local_course_code: offering.local_course_code.clone(),
        school_id: offering.school_id,
        school_year: offering.school_year,
        section_identifier: section.section_identifier.clone(),
        session_name: offering.session_name.clone(),
    })
}

fn student_section_key(ssa: &EdFiStudentSectionAssociation) -> Result<String> {
    let mut fields = section_fields(&ssa.section_reference);
    fields.push(("beginDate", ssa.begin_date.to_string()));
    fields.push(("studentUniqueId", ssa.student_reference.student_unique_id.clone()));
    key(Resource::StudentSectionAssociations, &fields)
}

fn staff_section_key(ssa: &EdFiStaffSectionAssociation) -> Result<String> {
    let mut fields = section_fields(&ssa.section_reference);
    fields.push(("staffUniqueId", ssa.staff_reference.staff_unique_id.clone()));
    key(Resource::StaffSectionAssociations, &fields)
}

fn student_parent_key(spa: &EdFiStudentParentAssociation) -> Result<String> {
    key(
        Resource::StudentParentAssociations,
        &[
            ("parentUniqueId", spa.parent_reference.parent_unique_id.clone()),
            ("studentUniqueId", spa.student_reference.student_unique_id.clone()),
        ],
    )
}

/// `uri://ed-fi.org/TermDescriptor#Fall Semester` -> `Fall Semester`.
pub fn descriptor_value(descriptor: &str) -> &str {
    descriptor
        .rsplit_once('#')
        .map_or(descriptor, |(_, value)| value)
}

fn term_type_from_descriptor(descriptor: &str) -> TermType {
    let value = descriptor_value(descriptor).to_lowercase();
    if value.contains("semester") {
        TermType::Semester
    } else if value.contains("year") {
        TermType::SchoolYear
    } else if value.contains("grading") {
        TermType::GradingPeriod
    } else {
        TermType::Term
    }
}

fn primary_email(mails: &[ElectronicMail]) -> Option<String> {
    mails
        .iter()
        .find(|m| {
            m.electronic_mail_type_descriptor
                .as_deref()
                .is_some_and(|d| descriptor_value(d).eq_ignore_ascii_case("Work"))
        })
        .or_else(|| mails.first())
        .map(|m| m.electronic_mail_address.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean(s: &str) -> String {
    s.trim().to_string()
}

/// Delete `keyValues` may carry dates as `2024-08-20T00:00:00`; resource
/// bodies use plain dates.
fn normalize_dates(key_values: &Value) -> Value {
    match key_values {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_dates(v)))
                .collect(),
        ),
        Value::String(s) => {
            let trimmed = s
                .strip_suffix("T00:00:00Z")
                .or_else(|| s.strip_suffix("T00:00:00"))
                .unwrap_or(s);
            Value::String(trimmed.to_string())
        }
        other => other.clone(),
    }
}
