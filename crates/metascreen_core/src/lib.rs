//! Core screening engine for systematic literature reviews.
//! This crate owns deduplication, decision state, ranking, conflict and
//! progress accounting, and the password-reset token lifecycle.

pub mod config;
pub mod context;
pub mod db;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod screening;
pub mod service;

pub use config::{ConfigError, ScreeningConfig};
pub use context::RequestContext;
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::project::{Project, ProjectId};
pub use model::record::{Decision, Record, RecordDraft, RecordId};
pub use model::user::{Role, User};
pub use repo::{RepoError, RepoResult};
pub use screening::ranker::{Classification, ClassifierError, RankedQueue, RelevanceClassifier};
pub use service::auth_tokens::{AuthError, AuthTokenManager, TokenState};
pub use service::record_store::{
    DecisionRequest, Invitation, InvitationSender, RecordStore, ScreeningError,
};
pub use service::user_directory::{IdentityError, IdentityProvider, UserDirectory};

/// Minimal health-check API for integration checks.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
