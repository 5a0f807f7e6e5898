use serde::{Deserialize, Serialize};

/// Canonical entity types, declared in sync dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    School,
    Term,
    Class,
    User,
    Enrollment,
    Relationship,
}

impl EntityType {
    /// Order in which a run processes entity types. Parents are persisted
    /// before the children that reference them.
    pub const SYNC_ORDER: [EntityType; 6] = [
        EntityType::School,
        EntityType::Term,
        EntityType::Class,
        EntityType::User,
        EntityType::Enrollment,
        EntityType::Relationship,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::School => "school",
            EntityType::Term => "term",
            EntityType::Class => "class",
            EntityType::User => "user",
            EntityType::Enrollment => "enrollment",
            EntityType::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "school" => Ok(EntityType::School),
            "term" => Ok(EntityType::Term),
            "class" => Ok(EntityType::Class),
            "user" => Ok(EntityType::User),
            "enrollment" => Ok(EntityType::Enrollment),
            "relationship" => Ok(EntityType::Relationship),
            _ => Err(format!("Unknown entity type: {s}")),
        }
    }
}

/// Whether the source still considers a record live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Active,
    Inactive,
}

/// Organization type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrgType {
    District,
    School,
    Department,
    Other,
}

/// Canonical user role, the union of the roles providers report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Teacher,
    Administrator,
    Aide,
    Guardian,
    Parent,
    Other,
}

impl UserRole {
    /// Map a provider role label onto the canonical role set.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "student" => UserRole::Student,
            "teacher" | "staff" => UserRole::Teacher,
            "administrator" | "district_admin" | "school_admin" => UserRole::Administrator,
            "aide" => UserRole::Aide,
            "guardian" | "relative" => UserRole::Guardian,
            "parent" | "contact" => UserRole::Parent,
            _ => UserRole::Other,
        }
    }
}

/// Role of a user within a class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentRole {
    Student,
    Teacher,
    Aide,
    Administrator,
}

/// Academic term type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TermType {
    SchoolYear,
    Semester,
    Term,
    GradingPeriod,
}

impl TermType {
    /// Map a provider session type label onto the canonical term types.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '_'], "").as_str() {
            "schoolyear" | "year" => TermType::SchoolYear,
            "semester" => TermType::Semester,
            "gradingperiod" => TermType::GradingPeriod,
            _ => TermType::Term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_order_puts_parents_first() {
        let order = EntityType::SYNC_ORDER;
        let pos = |t: EntityType| order.iter().position(|x| *x == t).unwrap();
        assert!(pos(EntityType::School) < pos(EntityType::Class));
        assert!(pos(EntityType::Class) < pos(EntityType::User));
        assert!(pos(EntityType::User) < pos(EntityType::Enrollment));
        assert!(pos(EntityType::Enrollment) < pos(EntityType::Relationship));
    }

    #[test]
    fn entity_type_parses_its_own_display() {
        for t in EntityType::SYNC_ORDER {
            let parsed: EntityType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("course".parse::<EntityType>().is_err());
    }

    #[test]
    fn user_role_labels() {
        assert_eq!(UserRole::from_label("Student"), UserRole::Student);
        assert_eq!(UserRole::from_label("staff"), UserRole::Teacher);
        assert_eq!(UserRole::from_label("district_admin"), UserRole::Administrator);
        assert_eq!(UserRole::from_label("contact"), UserRole::Parent);
        assert_eq!(UserRole::from_label("proctor"), UserRole::Other);
    }

    #[test]
    fn term_type_labels() {
        assert_eq!(TermType::from_label("schoolYear"), TermType::SchoolYear);
        assert_eq!(TermType::from_label("Grading Period"), TermType::GradingPeriod);
        assert_eq!(TermType::from_label("Fall Semester"), TermType::Term);
        assert_eq!(TermType::from_label("semester"), TermType::Semester);
    }

    #[test]
    fn term_type_serialization() {
        assert_eq!(
            serde_json::to_string(&TermType::GradingPeriod).unwrap(),
            "\"gradingPeriod\""
        );
    }
}
