//! Multi-reviewer conflict detection.
//!
//! Conflicts are derived from decision history on every call and never stored.
//! A dedup key is in conflict when its history holds more than one distinct
//! decision. Detection only reports; it never picks a winner.

use crate::model::record::{Decision, DecisionEvent, RecordId};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// One reviewer action under a conflicting key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub record_id: RecordId,
    pub reviewer_id: String,
    pub decision: Decision,
    pub reason: Option<String>,
    pub decided_at: i64,
}

/// Disagreeing decisions recorded for one dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub dedup_key: String,
    /// History rows in write order.
    pub entries: Vec<ConflictEntry>,
}

impl Conflict {
    /// Distinct decisions involved, in enum order.
    pub fn decisions(&self) -> BTreeSet<Decision> {
        self.entries.iter().map(|entry| entry.decision).collect()
    }
}

/// Groups `history` by dedup key and keeps keys with disagreeing decisions.
///
/// Output keys follow their first appearance in `history`.
pub fn detect_conflicts(history: &[DecisionEvent]) -> Vec<Conflict> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&DecisionEvent>> = HashMap::new();
    for event in history {
        let key = event.dedup_key.as_str();
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(event);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let events = groups.remove(key)?;
            let distinct: BTreeSet<Decision> = events.iter().map(|event| event.decision).collect();
            if distinct.len() < 2 {
                return None;
            }
            Some(Conflict {
                dedup_key: key.to_string(),
                entries: events
                    .into_iter()
                    .map(|event| ConflictEntry {
                        record_id: event.record_id,
                        reviewer_id: event.reviewer_id.clone(),
                        decision: event.decision,
                        reason: event.reason.clone(),
                        decided_at: event.decided_at,
                    })
                    .collect(),
            })
        })
        .collect()
}
