//! Screening workflow components.
//!
//! # Responsibility
//! - Pure, storage-agnostic logic over record sets: deduplication, ranking,
//!   conflict detection, progress accounting and keyword highlighting.
//!
//! # Invariants
//! - Nothing in this module mutates a record set it is given; results are new
//!   values or views.

pub mod conflict;
pub mod dedup;
pub mod highlight;
pub mod keyword_classifier;
pub mod progress;
pub mod ranker;
