//! Screening progress and PRISMA accounting.
//!
//! Counts are always derived from the live record set; only ingestion
//! counters come from the project row.

use crate::model::project::Project;
use crate::model::record::{Decision, Record};
use serde::Serialize;

/// Decision counts for one record set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreeningProgress {
    pub total: u64,
    pub included: u64,
    pub excluded: u64,
    pub unscreened: u64,
    /// `(included + excluded) / total * 100`, or 0 for an empty set.
    pub percent_complete: f64,
}

impl ScreeningProgress {
    pub fn decided(&self) -> u64 {
        self.included + self.excluded
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.unscreened == 0
    }
}

/// Computes progress for `records`.
pub fn compute_progress(records: &[Record]) -> ScreeningProgress {
    let mut included = 0_u64;
    let mut excluded = 0_u64;
    for record in records {
        match record.decision {
            Decision::Included => included += 1,
            Decision::Excluded => excluded += 1,
            Decision::Unscreened => {}
        }
    }
    let total = records.len() as u64;
    let percent_complete = if total == 0 {
        0.0
    } else {
        (included + excluded) as f64 / total as f64 * 100.0
    };

    ScreeningProgress {
        total,
        included,
        excluded,
        unscreened: total - included - excluded,
        percent_complete,
    }
}

/// PRISMA flow-diagram figures for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrismaCounts {
    pub identified: u64,
    pub duplicates_removed: u64,
    pub malformed_skipped: u64,
    pub screened: u64,
    pub included: u64,
    pub excluded: u64,
    pub unscreened: u64,
}

impl PrismaCounts {
    pub fn from_parts(project: &Project, progress: &ScreeningProgress) -> Self {
        Self {
            identified: project.identified_count,
            duplicates_removed: project.duplicates_removed,
            malformed_skipped: project.malformed_skipped,
            screened: progress.total,
            included: progress.included,
            excluded: progress.excluded,
            unscreened: progress.unscreened,
        }
    }
}
