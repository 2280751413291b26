//! Request-scoped caller context.
//!
//! # Responsibility
//! - Carry the acting user, role and request time into every operation.
//!
//! # Invariants
//! - Core operations never read "current user" or "current time" from global
//!   state; they read it from the context they are given.

use crate::model::user::{normalize_email, Role, User};
use std::time::{SystemTime, UNIX_EPOCH};

/// Explicit per-request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Normalized email of the acting user. Used as `reviewer_id`.
    pub actor_email: String,
    pub role: Role,
    /// Request time in Unix epoch milliseconds.
    pub now_ms: i64,
}

impl RequestContext {
    /// Creates a context stamped with the current wall-clock time.
    ///
    /// `actor_email` is normalized so one reviewer always maps to one
    /// `reviewer_id`; a value that is not an email is kept trimmed.
    pub fn new(actor_email: impl Into<String>, role: Role) -> Self {
        let actor_email = actor_email.into();
        Self {
            actor_email: normalize_email(&actor_email)
                .unwrap_or_else(|| actor_email.trim().to_string()),
            role,
            now_ms: now_epoch_ms(),
        }
    }

    /// Creates a context for an authenticated user.
    pub fn for_user(user: &User) -> Self {
        Self::new(user.email.clone(), user.role)
    }

    /// Returns the same context with an explicit request time.
    pub fn at(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::RequestContext;
    use crate::model::user::Role;

    #[test]
    fn actor_email_is_normalized() {
        let ctx = RequestContext::new("  Ada@Example.ORG ", Role::Reviewer).at(5);
        assert_eq!(ctx.actor_email, "ada@example.org");
        assert_eq!(ctx.now_ms, 5);
        assert!(!ctx.is_admin());
    }
}
