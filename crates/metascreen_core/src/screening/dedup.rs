//! Title-based citation deduplication.
//!
//! # Invariants
//! - The first record per `dedup_key` wins; output keeps input order.
//! - `duplicate_count == input.len() - output.len()`.
//! - Idempotent: deduplicating an already deduplicated set changes nothing.

use crate::model::record::{dedup_key, Record};
use std::collections::HashSet;

/// Deduplicated record sequence with the number of dropped records.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub records: Vec<Record>,
    pub duplicate_count: usize,
}

/// Collapses records whose titles share a dedup key.
///
/// Keys are recomputed from `title` rather than trusted from the input.
pub fn deduplicate(records: Vec<Record>) -> DedupOutcome {
    let input_len = records.len();
    let mut seen = HashSet::with_capacity(input_len);
    let kept: Vec<Record> = records
        .into_iter()
        .filter_map(|mut record| {
            record.dedup_key = dedup_key(&record.title);
            seen.insert(record.dedup_key.clone()).then_some(record)
        })
        .collect();

    DedupOutcome {
        duplicate_count: input_len - kept.len(),
        records: kept,
    }
}

#[cfg(test)]
mod tests {
    use super::deduplicate;
    use crate::model::record::{Record, RecordDraft};

    fn record(title: &str, ordinal: i64) -> Record {
        Record::from_draft(RecordDraft::new(title, format!("abstract {ordinal}")), ordinal)
    }

    fn titles(records: &[Record]) -> Vec<&str> {
        records.iter().map(|record| record.title.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let outcome = deduplicate(Vec::new());
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.duplicate_count, 0);
    }

    #[test]
    fn keeps_first_record_per_key_in_original_order() {
        let input = vec![
            record("  Foo Bar  ", 0),
            record("Other", 1),
            record("foo bar", 2),
            record("OTHER ", 3),
            record("Third", 4),
        ];
        let outcome = deduplicate(input);
        assert_eq!(titles(&outcome.records), vec!["  Foo Bar  ", "Other", "Third"]);
        assert_eq!(outcome.records[0].ordinal, 0);
        assert_eq!(outcome.duplicate_count, 2);
    }

    #[test]
    fn duplicate_count_matches_size_difference() {
        let input: Vec<Record> = (0..12).map(|i| record(&format!("t{}", i % 5), i)).collect();
        let input_len = input.len();
        let outcome = deduplicate(input);
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.duplicate_count, input_len - outcome.records.len());
    }

    #[test]
    fn is_idempotent() {
        let input = vec![
            record("A", 0),
            record("a", 1),
            record("B", 2),
            record(" b", 3),
            record("C", 4),
        ];
        let once = deduplicate(input);
        let twice = deduplicate(once.records.clone());
        assert_eq!(twice.records, once.records);
        assert_eq!(twice.duplicate_count, 0);
    }

    #[test]
    fn recomputes_stale_keys_from_title() {
        let mut first = record("Same Title", 0);
        first.dedup_key = "stale".to_string();
        let outcome = deduplicate(vec![first, record("same title", 1)]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].dedup_key, "same title");
    }
}
