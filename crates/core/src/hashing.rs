//! Deterministic fingerprints of canonical entities.
//!
//! `hash(entity) = sha256(canonical_json(entity))`. Object keys are sorted
//! recursively so two payloads that differ only in field order hash the same.
//! The opaque `rawData` payload is excluded: it mirrors the source wire format
//! and must not turn a no-op into an update.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::CanonicalEntity;

/// Field excluded from fingerprints.
const RAW_DATA_FIELD: &str = "rawData";

/// Render a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 hex digest of the canonical JSON of any serializable value.
pub fn hash_value<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(digest(&canonical_json(&json)))
}

/// Fingerprint of a canonical entity, ignoring its raw payload.
pub fn entity_hash(entity: &CanonicalEntity) -> Result<String> {
    let mut json = entity.to_value()?;
    if let Value::Object(ref mut map) = json {
        map.remove(RAW_DATA_FIELD);
    }
    Ok(digest(&canonical_json(&json)))
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{EntityStatus, UserRole};
    use crate::models::user::User;
    use serde_json::json;

    fn user(raw: Value) -> CanonicalEntity {
        CanonicalEntity::User(User {
            source_id: "u1".into(),
            tenant_id: "t1".into(),
            role: UserRole::Student,
            given_name: "Ana".into(),
            family_name: "Diaz".into(),
            middle_name: None,
            email: Some("ana@example.org".into()),
            username: None,
            identifier: None,
            grades: vec!["05".into()],
            school_source_ids: vec!["s1".into()],
            enabled: true,
            status: EntityStatus::Active,
            raw_data: raw,
        })
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":[{"d":1,"c":2}]}}"#).unwrap();
        assert_eq!(
            canonical_json(&a),
            r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn field_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"name":"North","id":7,"tags":["x","y"]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"tags":["x","y"],"id":7,"name":"North"}"#).unwrap();
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"tags": ["x", "y"]});
        let b = json!({"tags": ["y", "x"]});
        assert_ne!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn entity_hash_is_deterministic() {
        let e = user(json!({"a": 1}));
        assert_eq!(entity_hash(&e).unwrap(), entity_hash(&e).unwrap());
        assert_eq!(entity_hash(&e).unwrap().len(), 64);
    }

    #[test]
    fn entity_hash_ignores_raw_payload() {
        let a = user(json!({"studentUniqueId": "1", "_etag": "111"}));
        let b = user(json!({"_etag": "222", "studentUniqueId": "1"}));
        assert_eq!(entity_hash(&a).unwrap(), entity_hash(&b).unwrap());
    }

    #[test]
    fn entity_hash_tracks_normalized_fields() {
        let a = user(Value::Null);
        let mut b = a.clone();
        if let CanonicalEntity::User(ref mut u) = b {
            u.family_name = "Diaz-Lopez".into();
        }
        assert_ne!(entity_hash(&a).unwrap(), entity_hash(&b).unwrap());
    }

    #[test]
    fn unicode_keys_are_escaped_consistently() {
        let a = json!({"nombre\"": "Ñ", "a": 1});
        let rendered = canonical_json(&a);
        assert!(rendered.starts_with(r#"{"a":1,"#));
        assert!(rendered.contains(r#""nombre\"":"Ñ""#));
    }
}
