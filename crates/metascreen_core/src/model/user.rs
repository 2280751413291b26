//! Account and password-reset models.
//!
//! # Invariants
//! - `User::email` is always stored in normalized form (see [`normalize_email`]).
//! - At most one reset token exists per user; only its digest is persisted.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Manages projects and collaborator roles.
    Admin,
    /// Screens records.
    Reviewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Reviewer => "reviewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "reviewer" => Some(Self::Reviewer),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account known to the screening engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub role: Role,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

/// Persisted reset-token row.
///
/// `token_hash` is the hex SHA-256 digest of the opaque token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    pub user_email: String,
    pub token_hash: String,
    /// Unix epoch milliseconds.
    pub issued_at: i64,
    /// Unix epoch milliseconds. The token is live while `now < expires_at`.
    pub expires_at: i64,
}

impl ResetToken {
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}

/// Normalizes an email identity: trimmed and lowercased.
///
/// Returns `None` for blank input or values without an `@`.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return None;
    }
    Some(trimmed.to_lowercase())
}
