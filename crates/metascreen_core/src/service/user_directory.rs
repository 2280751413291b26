//! Account directory: sign-up, login and role management.
//!
//! # Responsibility
//! - Delegate credentials to an external [`IdentityProvider`].
//! - Own the screening role of every known email.
//!
//! # Invariants
//! - Emails are normalized before any lookup or write.
//! - Only admins may grant the admin role or change roles, except that the
//!   very first account of an empty directory may sign up as admin.
//! - Passwords are never logged or stored here.

use crate::context::{now_epoch_ms, RequestContext};
use crate::model::user::{normalize_email, Role, User};
use crate::repo::user_repo::UserRepository;
use crate::repo::RepoError;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Minimum password length accepted by sign-up and reset.
pub const MIN_PASSWORD_CHARS: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Failure reported by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    AccountExists(String),
    InvalidCredentials,
    /// Provider refused the request (policy, unknown account).
    Rejected(String),
    /// Provider could not be reached.
    Unavailable(String),
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountExists(email) => write!(f, "identity account already exists: {email}"),
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::Rejected(message) => write!(f, "identity provider rejected request: {message}"),
            Self::Unavailable(message) => write!(f, "identity provider unavailable: {message}"),
        }
    }
}

impl Error for IdentityError {}

/// External credential store.
pub trait IdentityProvider {
    fn create_account(&self, email: &str, password: &str) -> Result<(), IdentityError>;
    /// Fails with [`IdentityError::InvalidCredentials`] on a mismatch.
    fn verify_credentials(&self, email: &str, password: &str) -> Result<(), IdentityError>;
    fn set_password(&self, email: &str, password: &str) -> Result<(), IdentityError>;
    /// Mints a reset link carrying `token` and delivers it to `email`.
    fn reset_link(&self, email: &str, token: &str) -> Result<(), IdentityError>;
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for &T {
    fn create_account(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).create_account(email, password)
    }

    fn verify_credentials(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).verify_credentials(email, password)
    }

    fn set_password(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).set_password(email, password)
    }

    fn reset_link(&self, email: &str, token: &str) -> Result<(), IdentityError> {
        (**self).reset_link(email, token)
    }
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    fn create_account(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).create_account(email, password)
    }

    fn verify_credentials(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).verify_credentials(email, password)
    }

    fn set_password(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        (**self).set_password(email, password)
    }

    fn reset_link(&self, email: &str, token: &str) -> Result<(), IdentityError> {
        (**self).reset_link(email, token)
    }
}

/// Service error for directory use-cases.
#[derive(Debug)]
pub enum UserDirectoryError {
    InvalidEmail(String),
    InvalidPassword(&'static str),
    Forbidden { action: &'static str },
    AlreadyExists(String),
    /// Login failed. Does not reveal whether the account exists.
    InvalidCredentials,
    UserNotFound(String),
    Identity(IdentityError),
    Repo(RepoError),
}

impl Display for UserDirectoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEmail(value) => write!(f, "invalid email: `{value}`"),
            Self::InvalidPassword(message) => write!(f, "invalid password: {message}"),
            Self::Forbidden { action } => write!(f, "admin role required to {action}"),
            Self::AlreadyExists(email) => write!(f, "user already exists: {email}"),
            Self::InvalidCredentials => write!(f, "authentication failed"),
            Self::UserNotFound(email) => write!(f, "user not found: {email}"),
            Self::Identity(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UserDirectoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Identity(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for UserDirectoryError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::UserNotFound(email) => Self::UserNotFound(email),
            RepoError::AlreadyExists(what) => Self::AlreadyExists(what),
            other => Self::Repo(other),
        }
    }
}

impl From<IdentityError> for UserDirectoryError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::AccountExists(email) => Self::AlreadyExists(email),
            IdentityError::InvalidCredentials => Self::InvalidCredentials,
            other => Self::Identity(other),
        }
    }
}

/// Checks the password policy shared by sign-up and reset.
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.trim().is_empty() {
        return Err("password must not be blank");
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err("password is too short");
    }
    Ok(())
}

/// User directory facade.
pub struct UserDirectory<U: UserRepository, I: IdentityProvider> {
    users: U,
    identity: I,
}

impl<U: UserRepository, I: IdentityProvider> UserDirectory<U, I> {
    pub fn new(users: U, identity: I) -> Self {
        Self { users, identity }
    }

    /// Creates an account and its role row.
    ///
    /// The role row is claimed first so concurrent sign-ups for one email
    /// race on the unique key, not on the identity provider. If the provider
    /// then refuses the account, the role row is removed again.
    pub fn sign_up(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, UserDirectoryError> {
        let email = parse_email(email)?;
        validate_password(password).map_err(UserDirectoryError::InvalidPassword)?;
        let user = User {
            email,
            role,
            created_at: ctx.now_ms,
        };

        if role == Role::Admin && !ctx.is_admin() {
            // Self-service admin only for the first account of an empty directory.
            if !self.users.create_first_user(&user)? {
                warn!("event=sign_up module=user_directory status=forbidden role={role}");
                return Err(UserDirectoryError::Forbidden {
                    action: "grant the admin role",
                });
            }
        } else {
            self.users.create_user(&user)?;
        }

        if let Err(err) = self.identity.create_account(&user.email, password) {
            warn!("event=sign_up module=user_directory status=error error={err}");
            if let Err(cleanup) = self.users.delete_user(&user.email) {
                warn!("event=sign_up_rollback module=user_directory status=error error={cleanup}");
            }
            return Err(err.into());
        }
        info!("event=sign_up module=user_directory status=ok role={role}");
        Ok(user)
    }

    /// Verifies credentials and returns the account.
    ///
    /// An account without a role row is treated as a reviewer.
    pub fn login(&self, email: &str, password: &str) -> Result<User, UserDirectoryError> {
        let email = normalize_email(email).ok_or(UserDirectoryError::InvalidCredentials)?;
        if let Err(err) = self.identity.verify_credentials(&email, password) {
            warn!("event=login module=user_directory status=error error={err}");
            return Err(err.into());
        }

        let user = self.users.get_user(&email)?.unwrap_or_else(|| User {
            email,
            role: Role::Reviewer,
            created_at: now_epoch_ms(),
        });
        info!("event=login module=user_directory status=ok role={}", user.role);
        Ok(user)
    }

    pub fn change_role(
        &self,
        ctx: &RequestContext,
        email: &str,
        role: Role,
    ) -> Result<User, UserDirectoryError> {
        if !ctx.is_admin() {
            warn!("event=change_role module=user_directory status=forbidden role={}", ctx.role);
            return Err(UserDirectoryError::Forbidden {
                action: "change roles",
            });
        }
        let email = parse_email(email)?;
        self.users.update_role(&email, role)?;
        info!("event=change_role module=user_directory status=ok role={role}");
        self.users
            .get_user(&email)?
            .ok_or(UserDirectoryError::UserNotFound(email))
    }

    /// All users sorted by email.
    pub fn list_users(&self) -> Result<Vec<User>, UserDirectoryError> {
        Ok(self.users.list_users()?)
    }

    pub fn find_user(&self, email: &str) -> Result<Option<User>, UserDirectoryError> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        Ok(self.users.get_user(&email)?)
    }
}

fn parse_email(email: &str) -> Result<String, UserDirectoryError> {
    normalize_email(email)
        .filter(|normalized| EMAIL_RE.is_match(normalized))
        .ok_or_else(|| UserDirectoryError::InvalidEmail(email.trim().to_string()))
}
