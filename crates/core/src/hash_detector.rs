//! Client-side change detection for providers without a change feed.
//!
//! Each fetched entity is fingerprinted with [`entity_hash`] and compared
//! against the fingerprint recorded when it was last applied. Only entities
//! whose fingerprint differs (or that were never seen) come out as changes.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::Result;
use crate::hashing::entity_hash;
use crate::models::CanonicalEntity;

/// An entity whose fingerprint differs from the recorded one.
#[derive(Debug, Clone)]
pub struct ChangedEntity {
    pub entity: CanonicalEntity,
    pub hash: String,
    /// No fingerprint was recorded for this source ID.
    pub first_seen: bool,
}

#[derive(Debug, Default)]
pub struct Detection {
    pub changed: Vec<ChangedEntity>,
    pub unchanged: u64,
}

/// Diff `entities` against `known` fingerprints keyed by source ID.
///
/// A source ID repeated within one fetch is only considered once.
pub fn detect(entities: Vec<CanonicalEntity>, known: &HashMap<String, String>) -> Result<Detection> {
    let mut detection = Detection::default();
    let mut seen = HashSet::with_capacity(entities.len());

    for entity in entities {
        if !seen.insert(entity.source_id().to_string()) {
            warn!(
                source_id = entity.source_id(),
                entity_type = %entity.entity_type(),
                "Duplicate source id in fetch, keeping the first"
            );
            continue;
        }
        let hash = entity_hash(&entity)?;
        match known.get(entity.source_id()) {
            Some(previous) if *previous == hash => detection.unchanged += 1,
            previous => detection.changed.push(ChangedEntity {
                first_seen: previous.is_none(),
                entity,
                hash,
            }),
        }
    }
    Ok(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::school;

    #[test]
    fn unseen_entities_are_changes() {
        let detection = detect(vec![school("s1", "North")], &HashMap::new()).unwrap();
        assert_eq!(detection.changed.len(), 1);
        assert!(detection.changed[0].first_seen);
        assert_eq!(detection.unchanged, 0);
    }

    #[test]
    fn matching_hash_is_unchanged() {
        let north = school("s1", "North");
        let known = HashMap::from([("s1".to_string(), entity_hash(&north).unwrap())]);
        let detection = detect(vec![north, school("s2", "South")], &known).unwrap();
        assert_eq!(detection.unchanged, 1);
        assert_eq!(detection.changed.len(), 1);
        assert_eq!(detection.changed[0].entity.source_id(), "s2");
    }

    #[test]
    fn edited_entity_is_a_change() {
        let known = HashMap::from([(
            "s1".to_string(),
            entity_hash(&school("s1", "North")).unwrap(),
        )]);
        let detection = detect(vec![school("s1", "North High")], &known).unwrap();
        assert_eq!(detection.changed.len(), 1);
        assert!(!detection.changed[0].first_seen);
    }

    #[test]
    fn duplicates_are_dropped() {
        let detection = detect(
            vec![school("s1", "North"), school("s1", "Other")],
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(detection.changed.len(), 1);
    }
}
