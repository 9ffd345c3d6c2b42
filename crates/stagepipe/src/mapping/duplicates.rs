//! Duplicate detection over an active mapping set.
//!
//! Two grouping rules, unioned: mappings sharing the full source triple
//! `(source_table, source_field, target_table)`, and mappings sharing the
//! target pair `(target_table, target_column)`. Flags are recomputed on
//! every read so a deletion immediately un-flags the surviving singleton.

use std::collections::{BTreeSet, HashMap};

use super::FieldMapping;

/// Returns the ids of all mappings that conflict with at least one other
/// mapping in the given set.
pub fn duplicate_ids(mappings: &[FieldMapping]) -> BTreeSet<i64> {
    let mut by_source: HashMap<(&str, &str, &str), Vec<i64>> = HashMap::new();
    let mut by_target: HashMap<(&str, &str), Vec<i64>> = HashMap::new();

    for m in mappings {
        by_source
            .entry((&m.source_table, &m.source_field, &m.target_table))
            .or_default()
            .push(m.mapping_id);
        by_target
            .entry((&m.target_table, &m.target_column))
            .or_default()
            .push(m.mapping_id);
    }

    let mut flagged = BTreeSet::new();
    for group in by_source.values().chain(by_target.values()) {
        if group.len() > 1 {
            flagged.extend(group);
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingMethod;

    fn mapping(id: i64, field: &str, column: &str) -> FieldMapping {
        FieldMapping {
            mapping_id: id,
            source_table: "RAW_DATA_TABLE".to_string(),
            source_field: field.to_string(),
            target_table: "DENTAL_CLAIMS".to_string(),
            target_column: column.to_string(),
            tpa: "provider_a".to_string(),
            method: MappingMethod::Manual,
            confidence: None,
            approved: false,
            transformation_logic: None,
            duplicate: false,
        }
    }

    #[test]
    fn test_no_duplicates() {
        let set = vec![mapping(1, "memid", "MEMBER_ID"), mapping(2, "dos", "DATE_OF_SERVICE")];
        assert!(duplicate_ids(&set).is_empty());
    }

    #[test]
    fn test_same_target_column_flags_both() {
        // Two different source fields claiming the same target column.
        let set = vec![mapping(1, "memid", "MEMBER_ID"), mapping(2, "mem_id", "MEMBER_ID")];
        let flagged = duplicate_ids(&set);
        assert_eq!(flagged, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_same_source_field_flags_both() {
        // One source field mapped to two different target columns.
        let set = vec![mapping(1, "memid", "MEMBER_ID"), mapping(2, "memid", "SUBSCRIBER_ID")];
        let flagged = duplicate_ids(&set);
        assert_eq!(flagged, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_removal_unflags_survivor() {
        let mut set = vec![mapping(1, "memid", "MEMBER_ID"), mapping(2, "mem_id", "MEMBER_ID")];
        assert_eq!(duplicate_ids(&set).len(), 2);

        set.remove(1);
        assert!(duplicate_ids(&set).is_empty());
    }

    #[test]
    fn test_union_of_both_rules() {
        // 1 and 2 share a target column; 2 and 3 share a source field.
        let set = vec![
            mapping(1, "memid", "MEMBER_ID"),
            mapping(2, "mem_id", "MEMBER_ID"),
            mapping(3, "mem_id", "SUBSCRIBER_ID"),
            mapping(4, "dos", "DATE_OF_SERVICE"),
        ];
        let flagged = duplicate_ids(&set);
        assert_eq!(flagged, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn test_different_target_tables_do_not_conflict_on_column() {
        let mut other = mapping(2, "paid", "MEMBER_ID");
        other.target_table = "MEDICAL_CLAIMS".to_string();
        let set = vec![mapping(1, "memid", "MEMBER_ID"), other];
        assert!(duplicate_ids(&set).is_empty());
    }
}
