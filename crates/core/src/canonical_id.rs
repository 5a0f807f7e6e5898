//! Source ID synthesis for records that lack a single native identifier.
//!
//! Rule: render each reference field as `name=value`, sort by name, and join
//! with `|`. When no reference fields are available the payload itself is
//! fingerprinted and the ID is `h:<sha256>`. Ed-Fi natural keys, CSV-derived
//! relationships and roster associations all go through this one rule so an
//! association synthesized from a full fetch matches the one synthesized from
//! a change-query delete event.

use serde_json::Value;

use crate::error::Result;
use crate::hashing::hash_value;

/// Build a source ID from named reference fields.
///
/// Empty values are dropped; returns `None` when nothing is left.
pub fn from_fields<K, V>(fields: &[(K, V)]) -> Option<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut parts: Vec<(String, String)> = fields
        .iter()
        .map(|(k, v)| (k.as_ref().trim().to_string(), v.as_ref().trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    parts.sort();
    Some(
        parts
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|"),
    )
}

/// Build a source ID from a JSON object of key values (e.g. an Ed-Fi
/// `keyValues` block). Nested reference objects are flattened one level.
pub fn from_key_values(key_values: &Value) -> Option<String> {
    let map = key_values.as_object()?;
    let mut fields: Vec<(String, String)> = Vec::new();
    for (key, value) in map {
        match value {
            Value::Object(inner) => {
                for (inner_key, inner_value) in inner {
                    if let Some(rendered) = scalar_to_string(inner_value) {
                        fields.push((inner_key.clone(), rendered));
                    }
                }
            }
            other => {
                if let Some(rendered) = scalar_to_string(other) {
                    fields.push((key.clone(), rendered));
                }
            }
        }
    }
    from_fields(&fields)
}

/// Synthesize from reference fields, else fall back to the payload hash.
pub fn synthesize<K, V>(fields: &[(K, V)], payload: &Value) -> Result<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    match from_fields(fields) {
        Some(id) => Ok(id),
        None => Ok(format!("h:{}", hash_value(payload)?)),
    }
}

/// Render a JSON scalar the way it appears in a synthesized ID.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_are_sorted_by_name() {
        let id = from_fields(&[("studentUniqueId", "604822"), ("parentUniqueId", "777")]).unwrap();
        assert_eq!(id, "parentUniqueId=777|studentUniqueId=604822");
    }

    #[test]
    fn single_field_natural_key() {
        assert_eq!(
            from_fields(&[("schoolId", "255901")]).unwrap(),
            "schoolId=255901"
        );
    }

    #[test]
    fn empty_values_are_dropped() {
        assert_eq!(from_fields(&[("a", " "), ("b", "")]), None);
        assert_eq!(from_fields(&[("a", "1"), ("b", "")]).unwrap(), "a=1");
    }

    #[test]
    fn key_values_match_field_rendering() {
        let kv = json!({
            "sectionIdentifier": "ALG-1",
            "schoolId": 255901,
            "schoolYear": 2025,
            "localCourseCode": "ALG-1",
            "sessionName": "2024-2025 Fall Semester"
        });
        let from_kv = from_key_values(&kv).unwrap();
        let from_refs = from_fields(&[
            ("localCourseCode", "ALG-1".to_string()),
            ("schoolId", "255901".to_string()),
            ("schoolYear", "2025".to_string()),
            ("sectionIdentifier", "ALG-1".to_string()),
            ("sessionName", "2024-2025 Fall Semester".to_string()),
        ])
        .unwrap();
        assert_eq!(from_kv, from_refs);
    }

    #[test]
    fn key_values_flatten_nested_references() {
        let kv = json!({"studentReference": {"studentUniqueId": "1"}, "beginDate": "2024-08-20"});
        assert_eq!(
            from_key_values(&kv).unwrap(),
            "beginDate=2024-08-20|studentUniqueId=1"
        );
    }

    #[test]
    fn synthesize_falls_back_to_payload_hash() {
        let none: [(&str, &str); 0] = [];
        let a = synthesize(&none, &json!({"b": 2, "a": 1})).unwrap();
        let b = synthesize(&none, &json!({"a": 1, "b": 2})).unwrap();
        assert!(a.starts_with("h:"));
        assert_eq!(a, b);
    }
}
