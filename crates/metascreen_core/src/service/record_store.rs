//! Screening project facade.
//!
//! # Responsibility
//! - Expose project, ingestion, decision, ranking and reporting use-cases.
//! - Translate repository outcomes into screening errors.
//!
//! # Invariants
//! - Decisions are written only through compare-and-swap; a stale expected
//!   state surfaces as [`ScreeningError::DecisionConflict`], never as an
//!   overwrite.
//! - `reviewer_id` is always the acting user of the request context.
//! - Ranking runs on a snapshot, outside any database transaction.
//! - Admin-only operations: `create_project`, `rotate_share_token`,
//!   `replace_record_set`, `invite_collaborator`.

use crate::config::ScreeningConfig;
use crate::context::RequestContext;
use crate::export::{self, ExportError};
use crate::ingest::IngestBatch;
use crate::model::project::{IngestCounters, Project, ProjectId};
use crate::model::record::{Decision, Record, RecordId};
use crate::model::user::normalize_email;
use crate::repo::record_repo::{CasOutcome, DecisionUpdate, RecordRepository};
use crate::repo::RepoError;
use crate::screening::conflict::{detect_conflicts, Conflict};
use crate::screening::dedup::deduplicate;
use crate::screening::highlight::{HighlightSpan, KeywordHighlighter};
use crate::screening::progress::{compute_progress, PrismaCounts, ScreeningProgress};
use crate::screening::ranker::{RankedQueue, Ranker, RelevanceClassifier};
use crate::service::random_hex;
use crate::service::user_directory::IdentityError;
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

const SHARE_TOKEN_BYTES: usize = 16;

/// Service error for screening use-cases.
#[derive(Debug)]
pub enum ScreeningError {
    ProjectNotFound(ProjectId),
    RecordNotFound(RecordId),
    /// The stored decision differs from the expected prior state.
    DecisionConflict { current: Box<Record> },
    /// Requested transition is not part of the decision state machine.
    InvalidTransition { from: Decision, to: Decision },
    /// Caller role may not perform `action`.
    Forbidden { action: &'static str },
    InvalidInput(String),
    /// OS random source unavailable while minting a share token.
    RandomSource(String),
    /// The invitation could not be delivered.
    Invitation(IdentityError),
    Export(ExportError),
    Repo(RepoError),
}

impl Display for ScreeningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::DecisionConflict { current } => write!(
                f,
                "record {} was already decided as {}",
                current.uuid, current.decision
            ),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid decision transition: {from} -> {to}")
            }
            Self::Forbidden { action } => write!(f, "admin role required to {action}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::RandomSource(message) => write!(f, "random source unavailable: {message}"),
            Self::Invitation(err) => write!(f, "invitation not delivered: {err}"),
            Self::Export(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ScreeningError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invitation(err) => Some(err),
            Self::Export(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ScreeningError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ProjectNotFound(id) => Self::ProjectNotFound(id),
            RepoError::RecordNotFound(id) => Self::RecordNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ExportError> for ScreeningError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

pub type ScreeningResult<T> = Result<T, ScreeningError>;

/// One reviewer decision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRequest {
    pub record_id: RecordId,
    /// Decision the reviewer saw when deciding.
    pub expected_prior: Decision,
    pub new_decision: Decision,
    /// Kept only for exclusions; blank values are dropped.
    pub reason: Option<String>,
}

impl DecisionRequest {
    /// Decision on a record the reviewer saw as unscreened.
    pub fn from_unscreened(
        record_id: RecordId,
        new_decision: Decision,
        reason: Option<String>,
    ) -> Self {
        Self {
            record_id,
            expected_prior: Decision::Unscreened,
            new_decision,
            reason,
        }
    }
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Well-formed records in the batch.
    pub identified: u64,
    /// Records newly added to the project.
    pub stored: Vec<Record>,
    /// Batch records dropped as duplicates of existing or earlier records.
    pub duplicates: u64,
    /// Rows skipped as malformed.
    pub malformed: u64,
}

/// Invitation to collaborate on one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub project_id: ProjectId,
    pub project_name: String,
    /// Current share token of the project.
    pub share_token: String,
    /// Normalized email of the invitee.
    pub invitee_email: String,
    pub invited_by: String,
}

/// Delivers collaborator invitations (mail, chat, identity provider).
pub trait InvitationSender {
    fn send_invitation(&self, invitation: &Invitation) -> Result<(), IdentityError>;
}

/// One record with keyword matches in its title and abstract.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightedRecord {
    pub record: Record,
    pub title_spans: Vec<HighlightSpan>,
    pub abstract_spans: Vec<HighlightSpan>,
}

/// Screening facade over a record repository.
pub struct RecordStore<R: RecordRepository> {
    repo: R,
    ranker: Ranker,
    highlighter: KeywordHighlighter,
}

impl<R: RecordRepository> RecordStore<R> {
    pub fn new(repo: R, ranker: Ranker, highlighter: KeywordHighlighter) -> Self {
        Self {
            repo,
            ranker,
            highlighter,
        }
    }

    /// Builds a store from configuration and a relevance classifier.
    pub fn from_config(
        repo: R,
        config: &ScreeningConfig,
        classifier: Arc<dyn RelevanceClassifier>,
    ) -> ScreeningResult<Self> {
        let highlighter = KeywordHighlighter::new(&config.highlight.keywords)
            .map_err(|err| ScreeningError::InvalidInput(format!("highlight keywords: {err}")))?;
        Ok(Self::new(
            repo,
            Ranker::new(config.ranking.clone(), classifier),
            highlighter,
        ))
    }

    pub fn highlighter(&self) -> &KeywordHighlighter {
        &self.highlighter
    }

    /// Creates an empty project owned by the acting admin.
    pub fn create_project(&self, ctx: &RequestContext, name: &str) -> ScreeningResult<Project> {
        require_admin(ctx, "create a project")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ScreeningError::InvalidInput(
                "project name must not be blank".to_string(),
            ));
        }

        let project = Project {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            share_token: new_share_token()?,
            owner_email: ctx.actor_email.clone(),
            identified_count: 0,
            duplicates_removed: 0,
            malformed_skipped: 0,
            created_at: ctx.now_ms,
        };
        self.repo.create_project(&project)?;
        info!(
            "event=project_create module=record_store status=ok project_id={}",
            project.uuid
        );
        Ok(project)
    }

    pub fn find_project(&self, project_id: ProjectId) -> ScreeningResult<Project> {
        self.repo
            .get_project(project_id)?
            .ok_or(ScreeningError::ProjectNotFound(project_id))
    }

    /// All projects ordered by name, for project selection.
    pub fn list_projects(&self) -> ScreeningResult<Vec<Project>> {
        Ok(self.repo.list_projects()?)
    }

    /// Invites `email` to collaborate on a project through `sender`.
    ///
    /// The invitation carries the project name and its current share token.
    pub fn invite_collaborator(
        &self,
        ctx: &RequestContext,
        project_id: ProjectId,
        email: &str,
        sender: &impl InvitationSender,
    ) -> ScreeningResult<Invitation> {
        require_admin(ctx, "invite a collaborator")?;
        let invitee_email = normalize_email(email).ok_or_else(|| {
            ScreeningError::InvalidInput(format!("invalid invitee email `{}`", email.trim()))
        })?;
        let project = self.find_project(project_id)?;

        let invitation = Invitation {
            project_id,
            project_name: project.name,
            share_token: project.share_token,
            invitee_email,
            invited_by: ctx.actor_email.clone(),
        };
        if let Err(err) = sender.send_invitation(&invitation) {
            warn!(
                "event=invite_collaborator module=record_store status=error project_id={project_id} error={err}"
            );
            return Err(ScreeningError::Invitation(err));
        }
        info!("event=invite_collaborator module=record_store status=ok project_id={project_id}");
        Ok(invitation)
    }

    pub fn find_project_by_share_token(&self, share_token: &str) -> ScreeningResult<Option<Project>> {
        let share_token = share_token.trim();
        if share_token.is_empty() {
            return Ok(None);
        }
        Ok(self.repo.find_project_by_share_token(share_token)?)
    }

    /// Issues a new share token; the previous one stops resolving.
    pub fn rotate_share_token(
        &self,
        ctx: &RequestContext,
        project_id: ProjectId,
    ) -> ScreeningResult<String> {
        require_admin(ctx, "rotate a share token")?;
        let share_token = new_share_token()?;
        self.repo.set_share_token(project_id, &share_token)?;
        info!(
            "event=share_token_rotate module=record_store status=ok project_id={project_id}"
        );
        Ok(share_token)
    }

    /// Adds a normalized batch to the project.
    ///
    /// The batch is deduplicated together with the stored set, so a citation
    /// already in the project is dropped and counted as a duplicate. Drafts
    /// with a blank title are skipped and counted as malformed.
    pub fn ingest_batch(
        &self,
        project_id: ProjectId,
        batch: IngestBatch,
    ) -> ScreeningResult<IngestReport> {
        let batch = batch.renormalized();
        let existing = self.repo.load_record_set(project_id)?;
        let existing_ids: HashSet<RecordId> = existing.iter().map(|record| record.uuid).collect();
        let identified = batch.drafts.len() as u64;
        let malformed = batch.malformed_count();

        let mut combined = existing;
        combined.extend(
            batch
                .drafts
                .into_iter()
                .map(|draft| Record::from_draft(draft, 0)),
        );
        let outcome = deduplicate(combined);
        let incoming: Vec<Record> = outcome
            .records
            .into_iter()
            .filter(|record| !existing_ids.contains(&record.uuid))
            .collect();

        let counters = IngestCounters {
            identified,
            duplicates: outcome.duplicate_count as u64,
            malformed,
        };
        let appended = self.repo.append_records(project_id, &incoming, counters)?;
        let duplicates = counters.duplicates + appended.late_duplicates;
        info!(
            "event=ingest_batch module=record_store status=ok project_id={project_id} identified={identified} stored={} duplicates={duplicates} malformed={malformed}",
            appended.stored.len()
        );

        Ok(IngestReport {
            identified,
            stored: appended.stored,
            duplicates,
            malformed,
        })
    }

    /// Returns the whole record set in original order.
    pub fn record_set(&self, project_id: ProjectId) -> ScreeningResult<Vec<Record>> {
        Ok(self.repo.load_record_set(project_id)?)
    }

    /// Replaces the whole record set in one transaction.
    pub fn replace_record_set(
        &self,
        ctx: &RequestContext,
        project_id: ProjectId,
        records: &[Record],
    ) -> ScreeningResult<()> {
        require_admin(ctx, "replace a record set")?;
        match self.repo.replace_record_set(project_id, records) {
            Ok(()) => {
                info!(
                    "event=record_set_replace module=record_store status=ok project_id={project_id} records={}",
                    records.len()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=record_set_replace module=record_store status=error project_id={project_id} error={err}"
                );
                Err(err.into())
            }
        }
    }

    pub fn get_record(&self, project_id: ProjectId, record_id: RecordId) -> ScreeningResult<Record> {
        self.repo
            .get_record(project_id, record_id)?
            .ok_or(ScreeningError::RecordNotFound(record_id))
    }

    /// Records one reviewer decision with compare-and-swap semantics.
    pub fn assign_decision(
        &self,
        ctx: &RequestContext,
        project_id: ProjectId,
        request: DecisionRequest,
    ) -> ScreeningResult<Record> {
        if request.new_decision == Decision::Unscreened
            || request.expected_prior != Decision::Unscreened
        {
            return Err(ScreeningError::InvalidTransition {
                from: request.expected_prior,
                to: request.new_decision,
            });
        }

        let reason = match request.new_decision {
            Decision::Excluded => request
                .reason
                .map(|reason| reason.trim().to_string())
                .filter(|reason| !reason.is_empty()),
            _ => None,
        };
        let update = DecisionUpdate {
            record_id: request.record_id,
            expected_prior: request.expected_prior,
            new_decision: request.new_decision,
            reviewer_id: ctx.actor_email.clone(),
            reason,
            decided_at: ctx.now_ms,
        };

        match self.repo.compare_and_set_decision(project_id, &update)? {
            CasOutcome::Applied(record) => {
                info!(
                    "event=decision_assign module=record_store status=ok project_id={project_id} record_id={} decision={}",
                    record.uuid, record.decision
                );
                Ok(record)
            }
            CasOutcome::Stale(current) => {
                warn!(
                    "event=decision_assign module=record_store status=conflict project_id={project_id} record_id={} current={}",
                    current.uuid, current.decision
                );
                Err(ScreeningError::DecisionConflict {
                    current: Box::new(current),
                })
            }
        }
    }

    /// Unscreened records in presentation order, ranked when enough records
    /// are labeled.
    pub fn next_records(&self, project_id: ProjectId) -> ScreeningResult<RankedQueue> {
        let snapshot = self.repo.load_record_set(project_id)?;
        Ok(self.ranker.rank(&snapshot))
    }

    /// Next record to present, or `None` when screening is complete.
    pub fn next_record(&self, project_id: ProjectId) -> ScreeningResult<Option<Record>> {
        Ok(self.next_records(project_id)?.records.into_iter().next())
    }

    pub fn progress(&self, project_id: ProjectId) -> ScreeningResult<ScreeningProgress> {
        let records = self.repo.load_record_set(project_id)?;
        Ok(compute_progress(&records))
    }

    pub fn prisma_counts(&self, project_id: ProjectId) -> ScreeningResult<PrismaCounts> {
        let project = self.find_project(project_id)?;
        let progress = self.progress(project_id)?;
        Ok(PrismaCounts::from_parts(&project, &progress))
    }

    /// Dedup keys whose recorded decisions disagree.
    pub fn conflicts(&self, project_id: ProjectId) -> ScreeningResult<Vec<Conflict>> {
        self.find_project(project_id)?;
        let history = self.repo.list_decision_history(project_id)?;
        Ok(detect_conflicts(&history))
    }

    pub fn highlight_record(
        &self,
        project_id: ProjectId,
        record_id: RecordId,
    ) -> ScreeningResult<HighlightedRecord> {
        let record = self.get_record(project_id, record_id)?;
        Ok(HighlightedRecord {
            title_spans: self.highlighter.spans(&record.title),
            abstract_spans: self.highlighter.spans(&record.abstract_text),
            record,
        })
    }

    pub fn export_csv<W: Write>(&self, project_id: ProjectId, writer: W) -> ScreeningResult<()> {
        let records = self.repo.load_record_set(project_id)?;
        export::export_csv(&records, writer)?;
        info!(
            "event=export module=record_store status=ok format=csv project_id={project_id} records={}",
            records.len()
        );
        Ok(())
    }

    pub fn export_ris<W: Write>(&self, project_id: ProjectId, writer: W) -> ScreeningResult<()> {
        let records = self.repo.load_record_set(project_id)?;
        export::export_ris(&records, writer)?;
        info!(
            "event=export module=record_store status=ok format=ris project_id={project_id} records={}",
            records.len()
        );
        Ok(())
    }
}

fn require_admin(ctx: &RequestContext, action: &'static str) -> ScreeningResult<()> {
    if ctx.is_admin() {
        return Ok(());
    }
    warn!("event=role_check module=record_store status=forbidden role={}", ctx.role);
    Err(ScreeningError::Forbidden { action })
}

fn new_share_token() -> ScreeningResult<String> {
    random_hex(SHARE_TOKEN_BYTES).map_err(|err| ScreeningError::RandomSource(err.to_string()))
}
