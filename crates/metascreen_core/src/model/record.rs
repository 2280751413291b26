//! Citation record domain model.
//!
//! # Responsibility
//! - Define the canonical citation record owned by a screening project.
//! - Provide the dedup-key derivation and decision-state helpers.
//!
//! # Invariants
//! - `dedup_key` is a pure function of `title` (trimmed, case-folded).
//! - `reason` is set only when `decision == Decision::Excluded`.
//! - `reviewer_id` and `decided_at` are set exactly when the record is decided.
//! - `relevance_score` is a ranking view value and is never persisted.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one citation record.
pub type RecordId = Uuid;

/// Screening decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Not yet decided. Canonical sentinel for "no decision".
    Unscreened,
    /// Reviewer kept the citation for full-text review.
    Included,
    /// Reviewer rejected the citation.
    Excluded,
}

impl Decision {
    /// Stable storage/export value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unscreened => "unscreened",
            Self::Included => "included",
            Self::Excluded => "excluded",
        }
    }

    /// Parses a stable storage value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unscreened" => Some(Self::Unscreened),
            "included" => Some(Self::Included),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }

    /// Returns whether no further transition is allowed from this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unscreened)
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the duplicate-detection key from a citation title.
///
/// Two records whose keys are equal are duplicates.
pub fn dedup_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Normalized ingestion output before identity/order assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordDraft {
    pub title: String,
    pub abstract_text: String,
    pub year: String,
    pub journal: String,
    pub article_type: String,
}

impl RecordDraft {
    /// Creates a draft with the two required fields.
    pub fn new(title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            abstract_text: abstract_text.into(),
            ..Self::default()
        }
    }
}

/// Canonical citation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable record id.
    pub uuid: RecordId,
    /// Position inside the project; defines original presentation order.
    pub ordinal: i64,
    pub title: String,
    /// Serialized as `abstract` to match the exported column name.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: String,
    pub journal: String,
    pub article_type: String,
    /// Derived from `title`; see [`dedup_key`].
    pub dedup_key: String,
    pub decision: Decision,
    /// Exclusion reason. Meaningful only when `decision == Excluded`.
    pub reason: Option<String>,
    /// Email of the reviewer who decided this record.
    pub reviewer_id: Option<String>,
    /// Unix epoch milliseconds of the decision.
    pub decided_at: Option<i64>,
    /// Ranker output for the current view.
    #[serde(skip)]
    pub relevance_score: Option<f64>,
}

impl Record {
    /// Creates an unscreened record from an ingestion draft.
    pub fn from_draft(draft: RecordDraft, ordinal: i64) -> Self {
        Self::with_id(Uuid::new_v4(), draft, ordinal)
    }

    /// Creates an unscreened record with a caller-provided id.
    pub fn with_id(uuid: RecordId, draft: RecordDraft, ordinal: i64) -> Self {
        let key = dedup_key(&draft.title);
        Self {
            uuid,
            ordinal,
            title: draft.title,
            abstract_text: draft.abstract_text,
            year: draft.year,
            journal: draft.journal,
            article_type: draft.article_type,
            dedup_key: key,
            decision: Decision::Unscreened,
            reason: None,
            reviewer_id: None,
            decided_at: None,
            relevance_score: None,
        }
    }

    /// Returns whether a reviewer has already decided this record.
    pub fn is_decided(&self) -> bool {
        self.decision.is_terminal()
    }

    /// Text submitted to relevance scoring: title and abstract joined by one space.
    pub fn classification_text(&self) -> String {
        format!("{} {}", self.title, self.abstract_text)
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.title.trim().is_empty() {
            return Err(RecordValidationError::BlankTitle);
        }
        if self.dedup_key != dedup_key(&self.title) {
            return Err(RecordValidationError::StaleDedupKey);
        }
        if self.reason.is_some() && self.decision != Decision::Excluded {
            return Err(RecordValidationError::ReasonWithoutExclusion);
        }
        let decided = self.decision.is_terminal();
        if decided != self.reviewer_id.is_some() || decided != self.decided_at.is_some() {
            return Err(RecordValidationError::DecisionMetadataMismatch);
        }
        Ok(())
    }
}

/// Record invariant violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordValidationError {
    BlankTitle,
    StaleDedupKey,
    ReasonWithoutExclusion,
    DecisionMetadataMismatch,
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "record title must not be blank"),
            Self::StaleDedupKey => write!(f, "record dedup_key does not match its title"),
            Self::ReasonWithoutExclusion => {
                write!(f, "record reason is only allowed for excluded records")
            }
            Self::DecisionMetadataMismatch => write!(
                f,
                "record reviewer_id/decided_at must be set exactly when decided"
            ),
        }
    }
}

impl Error for RecordValidationError {}

/// One reviewer decision as recorded in append-only history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    pub record_id: RecordId,
    pub dedup_key: String,
    pub reviewer_id: String,
    pub decision: Decision,
    pub reason: Option<String>,
    /// Unix epoch milliseconds.
    pub decided_at: i64,
}
