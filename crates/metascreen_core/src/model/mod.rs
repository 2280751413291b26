//! Domain model for citation screening.
//!
//! # Responsibility
//! - Define canonical data structures used by screening business logic.
//! - Keep decision-state rules next to the types they constrain.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId`.
//! - `Decision::Unscreened` is the only non-terminal decision state.
//! - Users are identified by normalized email.

pub mod project;
pub mod record;
pub mod user;
