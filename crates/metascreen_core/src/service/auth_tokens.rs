//! Password-reset token lifecycle.
//!
//! # Responsibility
//! - Issue single-use reset tokens and hand them to the identity provider.
//! - Validate presented tokens and apply the new password atomically.
//!
//! # Invariants
//! - Per user the states are `NoToken` and `TokenIssued`; issuing again
//!   replaces the previous token, which stops validating.
//! - A token is valid only while `now < expires_at`; expiry is evaluated
//!   lazily on read and expired rows are removed.
//! - Only SHA-256 digests are stored; raw tokens never reach storage or logs.
//! - Unknown emails get the same outward outcome as known ones.

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::model::user::{normalize_email, ResetToken, User};
use crate::repo::token_repo::{ConsumeOutcome, ResetTokenRepository};
use crate::repo::user_repo::UserRepository;
use crate::repo::RepoError;
use crate::service::random_hex;
use crate::service::user_directory::{validate_password, IdentityError, IdentityProvider};
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TOKEN_BYTES: usize = 32;

/// Reset state of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    TokenIssued { expires_at: i64 },
}

#[derive(Debug)]
pub enum AuthError {
    /// Presented token is unknown, replaced or expired.
    InvalidOrExpiredToken,
    InvalidPassword(&'static str),
    RandomSource(String),
    Identity(IdentityError),
    Repo(RepoError),
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrExpiredToken => write!(f, "reset token is invalid or expired"),
            Self::InvalidPassword(message) => write!(f, "invalid password: {message}"),
            Self::RandomSource(message) => write!(f, "random source unavailable: {message}"),
            Self::Identity(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AuthError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Identity(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for AuthError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<IdentityError> for AuthError {
    fn from(value: IdentityError) -> Self {
        Self::Identity(value)
    }
}

/// Hex SHA-256 digest under which a token is stored.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub struct AuthTokenManager<T, U, I>
where
    T: ResetTokenRepository,
    U: UserRepository,
    I: IdentityProvider,
{
    tokens: T,
    users: U,
    identity: I,
    ttl_ms: i64,
}

impl<T, U, I> AuthTokenManager<T, U, I>
where
    T: ResetTokenRepository,
    U: UserRepository,
    I: IdentityProvider,
{
    pub fn new(tokens: T, users: U, identity: I, config: &AuthConfig) -> Self {
        Self {
            tokens,
            users,
            identity,
            ttl_ms: config.reset_token_ttl_ms(),
        }
    }

    /// Issues a fresh token for `email` and sends the reset link.
    ///
    /// Returns `Ok(())` whether or not the email belongs to a user.
    pub fn request_reset(&self, ctx: &RequestContext, email: &str) -> Result<(), AuthError> {
        let Some(email) = normalize_email(email) else {
            info!("event=reset_request module=auth_tokens status=ok issued=false");
            return Ok(());
        };
        if self.users.get_user(&email)?.is_none() {
            info!("event=reset_request module=auth_tokens status=ok issued=false");
            return Ok(());
        }

        let token = random_hex(TOKEN_BYTES).map_err(|err| AuthError::RandomSource(err.to_string()))?;
        let issued_at = ctx.now_ms;
        self.tokens.upsert_token(&ResetToken {
            user_email: email.clone(),
            token_hash: hash_token(&token),
            issued_at,
            expires_at: issued_at.saturating_add(self.ttl_ms),
        })?;

        if let Err(err) = self.identity.reset_link(&email, &token) {
            warn!("event=reset_request module=auth_tokens status=error error={err}");
            return Err(err.into());
        }
        info!("event=reset_request module=auth_tokens status=ok issued=true");
        Ok(())
    }

    /// Sets a new password when `token` is the live token of some user.
    ///
    /// The password change and token removal commit together; an identity
    /// failure keeps the token usable.
    pub fn reset_password(
        &self,
        ctx: &RequestContext,
        token: &str,
        new_password: &str,
    ) -> Result<User, AuthError> {
        validate_password(new_password).map_err(AuthError::InvalidPassword)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let outcome = self
            .tokens
            .consume_token(&hash_token(token), ctx.now_ms, |email| {
                self.identity.set_password(email, new_password)
            })?;
        match outcome {
            Ok(ConsumeOutcome::Consumed { user_email }) => {
                info!("event=reset_password module=auth_tokens status=ok");
                self.users
                    .get_user(&user_email)?
                    .ok_or(AuthError::InvalidOrExpiredToken)
            }
            Ok(ConsumeOutcome::Expired) | Ok(ConsumeOutcome::Unknown) => {
                warn!("event=reset_password module=auth_tokens status=rejected");
                Err(AuthError::InvalidOrExpiredToken)
            }
            Err(err) => {
                warn!("event=reset_password module=auth_tokens status=error error={err}");
                Err(AuthError::Identity(err))
            }
        }
    }

    /// Current reset state of `email`, deleting an expired token on the way.
    pub fn token_state(&self, ctx: &RequestContext, email: &str) -> Result<TokenState, AuthError> {
        let Some(email) = normalize_email(email) else {
            return Ok(TokenState::NoToken);
        };
        let Some(token) = self.tokens.get_token_for_user(&email)? else {
            return Ok(TokenState::NoToken);
        };
        if token.is_live_at(ctx.now_ms) {
            return Ok(TokenState::TokenIssued {
                expires_at: token.expires_at,
            });
        }

        if !self.tokens.delete_expired_token(&token, ctx.now_ms)? {
            // Reissued since the read; report what is stored now.
            if let Some(current) = self.tokens.get_token_for_user(&email)? {
                if current.is_live_at(ctx.now_ms) {
                    return Ok(TokenState::TokenIssued {
                        expires_at: current.expires_at,
                    });
                }
            }
        }
        info!("event=token_expire module=auth_tokens status=ok");
        Ok(TokenState::NoToken)
    }
}
