//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and screening logic into caller-facing APIs.
//! - Enforce role checks against the [`RequestContext`](crate::context::RequestContext).
//!
//! # Invariants
//! - Services never read global session state; actor and time come from the
//!   request context.

pub mod auth_tokens;
pub mod record_store;
pub mod user_directory;

/// Hex-encodes `byte_len` bytes from the OS random source.
pub(crate) fn random_hex(byte_len: usize) -> Result<String, getrandom::Error> {
    let mut bytes = vec![0_u8; byte_len];
    getrandom::getrandom(&mut bytes)?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}
