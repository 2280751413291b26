//! Screening project model.
//!
//! A project is the unit the screening engine operates on: an ordered set of
//! records plus a shared-access token for collaborators.

use uuid::Uuid;

/// Stable identifier for one screening project.
pub type ProjectId = Uuid;

/// Project metadata and ingestion counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub uuid: ProjectId,
    pub name: String,
    /// Opaque token collaborators use to open the project.
    pub share_token: String,
    pub owner_email: String,
    /// Well-formed records received across all ingestion batches.
    pub identified_count: u64,
    /// Records dropped by deduplication during ingestion.
    pub duplicates_removed: u64,
    /// Raw records skipped as malformed during ingestion.
    pub malformed_skipped: u64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

/// Counters produced by one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    pub identified: u64,
    pub duplicates: u64,
    pub malformed: u64,
}
