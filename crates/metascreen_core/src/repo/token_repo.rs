//! Password-reset token repository.
//!
//! # Invariants
//! - One row per user (`user_email` is the primary key); upsert replaces any
//!   prior token, so only the latest issued token can match.
//! - Only token digests are stored.
//! - Consuming a token and the caller's password hook share one transaction.

use crate::model::user::ResetToken;
use crate::repo::{ensure_connection_ready, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

/// Outcome of presenting a token digest for consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Token was live; the hook succeeded and the token is gone.
    Consumed { user_email: String },
    /// Token matched but had expired; it has been deleted.
    Expired,
    /// No stored token matches.
    Unknown,
}

/// Repository interface for reset tokens.
pub trait ResetTokenRepository {
    /// Stores `token` as the only token of its user.
    fn upsert_token(&self, token: &ResetToken) -> RepoResult<()>;
    fn get_token_for_user(&self, user_email: &str) -> RepoResult<Option<ResetToken>>;
    /// Deletes `token` only if it is still the stored token of its user and
    /// has expired at `now_ms`. A token issued since the read is kept.
    /// Returns whether a row was removed.
    fn delete_expired_token(&self, token: &ResetToken, now_ms: i64) -> RepoResult<bool>;
    /// Atomically validates and consumes a token.
    ///
    /// `on_valid` runs inside the transaction with the owning email. When it
    /// fails, the token is kept and its error is returned in the inner result.
    fn consume_token<E>(
        &self,
        token_hash: &str,
        now_ms: i64,
        on_valid: impl FnOnce(&str) -> Result<(), E>,
    ) -> RepoResult<Result<ConsumeOutcome, E>>;
}

/// SQLite-backed reset token repository.
pub struct SqliteResetTokenRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResetTokenRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ResetTokenRepository for SqliteResetTokenRepository<'_> {
    fn upsert_token(&self, token: &ResetToken) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO reset_tokens (user_email, token_hash, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_email) DO UPDATE SET
                token_hash = excluded.token_hash,
                issued_at = excluded.issued_at,
                expires_at = excluded.expires_at;",
            params![
                token.user_email.as_str(),
                token.token_hash.as_str(),
                token.issued_at,
                token.expires_at,
            ],
        )?;
        Ok(())
    }

    fn get_token_for_user(&self, user_email: &str) -> RepoResult<Option<ResetToken>> {
        let token = self
            .conn
            .query_row(
                "SELECT user_email, token_hash, issued_at, expires_at
                 FROM reset_tokens
                 WHERE user_email = ?1;",
                [user_email],
                parse_token_row,
            )
            .optional()?;
        Ok(token)
    }

    fn delete_expired_token(&self, token: &ResetToken, now_ms: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM reset_tokens
             WHERE user_email = ?1
               AND token_hash = ?2
               AND expires_at <= ?3;",
            params![token.user_email.as_str(), token.token_hash.as_str(), now_ms],
        )?;
        Ok(changed > 0)
    }

    fn consume_token<E>(
        &self,
        token_hash: &str,
        now_ms: i64,
        on_valid: impl FnOnce(&str) -> Result<(), E>,
    ) -> RepoResult<Result<ConsumeOutcome, E>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let stored = tx
            .query_row(
                "SELECT user_email, token_hash, issued_at, expires_at
                 FROM reset_tokens
                 WHERE token_hash = ?1;",
                [token_hash],
                parse_token_row,
            )
            .optional()?;

        let Some(stored) = stored else {
            return Ok(Ok(ConsumeOutcome::Unknown));
        };

        tx.execute(
            "DELETE FROM reset_tokens WHERE user_email = ?1;",
            [stored.user_email.as_str()],
        )?;

        if !stored.is_live_at(now_ms) {
            tx.commit()?;
            return Ok(Ok(ConsumeOutcome::Expired));
        }

        if let Err(err) = on_valid(stored.user_email.as_str()) {
            // Dropping `tx` restores the token.
            return Ok(Err(err));
        }

        tx.commit()?;
        Ok(Ok(ConsumeOutcome::Consumed {
            user_email: stored.user_email,
        }))
    }
}

fn parse_token_row(row: &Row<'_>) -> rusqlite::Result<ResetToken> {
    Ok(ResetToken {
        user_email: row.get("user_email")?,
        token_hash: row.get("token_hash")?,
        issued_at: row.get("issued_at")?,
        expires_at: row.get("expires_at")?,
    })
}
