//! Ed-Fi ODS/API v5 (Data Standard 3.x/4.x) resource shapes.
//!
//! Only the fields the mapper reads are modelled; the full payload is kept
//! as `raw_data` on the canonical entity.

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolReference {
    pub school_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEducationAgencyReference {
    pub local_education_agency_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolYearTypeReference {
    pub school_year: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOfferingReference {
    pub local_course_code: String,
    pub school_id: i64,
    pub school_year: i32,
    pub session_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionReference {
    pub local_course_code: String,
    pub school_id: i64,
    pub school_year: i32,
    pub section_identifier: String,
    pub session_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReference {
    pub student_unique_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffReference {
    pub staff_unique_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub parent_unique_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectronicMail {
    pub electronic_mail_address: String,
    #[serde(default)]
    pub electronic_mail_type_descriptor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiSchool {
    pub school_id: i64,
    pub name_of_institution: String,
    #[serde(default)]
    pub local_education_agency_reference: Option<LocalEducationAgencyReference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiSession {
    pub session_name: String,
    pub school_reference: SchoolReference,
    pub school_year_type_reference: SchoolYearTypeReference,
    pub begin_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub term_descriptor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiSection {
    pub section_identifier: String,
    pub course_offering_reference: CourseOfferingReference,
    #[serde(default)]
    pub section_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiStudent {
    pub student_unique_id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_surname: String,
    #[serde(default)]
    pub electronic_mails: Vec<ElectronicMail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiStaff {
    pub staff_unique_id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_surname: String,
    #[serde(default)]
    pub login_id: Option<String>,
    #[serde(default)]
    pub electronic_mails: Vec<ElectronicMail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiParent {
    pub parent_unique_id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_surname: String,
    #[serde(default)]
    pub electronic_mails: Vec<ElectronicMail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiStudentSectionAssociation {
    pub begin_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub section_reference: SectionReference,
    pub student_reference: StudentReference,
    #[serde(default)]
    pub homeroom_indicator: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiStaffSectionAssociation {
    #[serde(default)]
    pub begin_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub section_reference: SectionReference,
    pub staff_reference: StaffReference,
    pub classroom_position_descriptor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdFiStudentParentAssociation {
    pub parent_reference: ParentReference,
    pub student_reference: StudentReference,
    #[serde(default)]
    pub relation_descriptor: Option<String>,
    #[serde(default)]
    pub primary_contact_status: Option<bool>,
}

/// `/changeQueries/v1/availableChangeVersions` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableChangeVersions {
    #[serde(alias = "OldestChangeVersion")]
    pub oldest_change_version: i64,
    #[serde(alias = "NewestChangeVersion")]
    pub newest_change_version: i64,
}

/// Entry of a `/{resource}/deletes` change query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub change_version: Option<i64>,
    #[serde(default)]
    pub key_values: Option<serde_json::Value>,
}
