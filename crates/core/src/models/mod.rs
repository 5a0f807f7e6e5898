//! Canonical roster model shared by every provider adapter.

pub mod class;
pub mod common;
pub mod cursor;
pub mod delta;
pub mod enrollment;
pub mod relationship;
pub mod school;
pub mod sync;
pub mod term;
pub mod user;

use serde::{Deserialize, Serialize};

use self::class::Class;
use self::common::EntityType;
use self::enrollment::Enrollment;
use self::relationship::Relationship;
use self::school::School;
use self::term::Term;
use self::user::User;

/// Any canonical entity, tagged by its type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entityType", content = "entity", rename_all = "snake_case")]
pub enum CanonicalEntity {
    School(School),
    Term(Term),
    Class(Class),
    User(User),
    Enrollment(Enrollment),
    Relationship(Relationship),
}

impl CanonicalEntity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            CanonicalEntity::School(_) => EntityType::School,
            CanonicalEntity::Term(_) => EntityType::Term,
            CanonicalEntity::Class(_) => EntityType::Class,
            CanonicalEntity::User(_) => EntityType::User,
            CanonicalEntity::Enrollment(_) => EntityType::Enrollment,
            CanonicalEntity::Relationship(_) => EntityType::Relationship,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            CanonicalEntity::School(e) => &e.source_id,
            CanonicalEntity::Term(e) => &e.source_id,
            CanonicalEntity::Class(e) => &e.source_id,
            CanonicalEntity::User(e) => &e.source_id,
            CanonicalEntity::Enrollment(e) => &e.source_id,
            CanonicalEntity::Relationship(e) => &e.source_id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            CanonicalEntity::School(e) => &e.tenant_id,
            CanonicalEntity::Term(e) => &e.tenant_id,
            CanonicalEntity::Class(e) => &e.tenant_id,
            CanonicalEntity::User(e) => &e.tenant_id,
            CanonicalEntity::Enrollment(e) => &e.tenant_id,
            CanonicalEntity::Relationship(e) => &e.tenant_id,
        }
    }

    /// Serialize the inner entity (without the type tag).
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            CanonicalEntity::School(e) => serde_json::to_value(e),
            CanonicalEntity::Term(e) => serde_json::to_value(e),
            CanonicalEntity::Class(e) => serde_json::to_value(e),
            CanonicalEntity::User(e) => serde_json::to_value(e),
            CanonicalEntity::Enrollment(e) => serde_json::to_value(e),
            CanonicalEntity::Relationship(e) => serde_json::to_value(e),
        }
    }
}

macro_rules! impl_from_entity {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for CanonicalEntity {
                fn from(e: $variant) -> Self {
                    CanonicalEntity::$variant(e)
                }
            }
        )*
    };
}

impl_from_entity!(School, Term, Class, User, Enrollment, Relationship);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{EntityStatus, OrgType};

    fn school() -> School {
        School {
            source_id: "schoolId=1".into(),
            tenant_id: "t1".into(),
            name: "North".into(),
            org_type: OrgType::School,
            identifier: None,
            parent_source_id: None,
            status: EntityStatus::Active,
            raw_data: serde_json::json!({"schoolId": 1}),
        }
    }

    #[test]
    fn accessors_delegate_to_inner_entity() {
        let entity = CanonicalEntity::from(school());
        assert_eq!(entity.entity_type(), EntityType::School);
        assert_eq!(entity.source_id(), "schoolId=1");
        assert_eq!(entity.tenant_id(), "t1");
    }

    #[test]
    fn to_value_omits_tag() {
        let entity = CanonicalEntity::from(school());
        let v = entity.to_value().unwrap();
        assert!(v.get("entityType").is_none());
        assert_eq!(v["name"], "North");
    }

    #[test]
    fn tagged_serialization() {
        let entity = CanonicalEntity::from(school());
        let v = serde_json::to_value(&entity).unwrap();
        assert_eq!(v["entityType"], "school");
        assert_eq!(v["entity"]["sourceId"], "schoolId=1");
    }
}
