//! Project/record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist projects, their ordered record sets and decision history.
//! - Own the compare-and-swap decision write.
//!
//! # Invariants
//! - Record sets are returned in `ordinal ASC` order.
//! - A decision write succeeds only when the stored decision equals the
//!   expected prior state; the record update and its history row commit
//!   together.
//! - `replace_record_set` is all-or-nothing and keeps ordinals and dedup
//!   keys unique within the set.
//! - Decision history is append-only and survives record-set replacement.

use crate::model::project::{IngestCounters, Project, ProjectId};
use crate::model::record::{Decision, DecisionEvent, Record, RecordId};
use crate::repo::{
    ensure_connection_ready, i64_param, map_unique_violation, u64_column, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashSet;
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT
    uuid,
    ordinal,
    title,
    abstract_text,
    year,
    journal,
    article_type,
    dedup_key,
    decision,
    reason,
    reviewer_id,
    decided_at
FROM records";

const PROJECT_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    share_token,
    owner_email,
    identified_count,
    duplicates_removed,
    malformed_skipped,
    created_at
FROM projects";

/// Conditional decision write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionUpdate {
    pub record_id: RecordId,
    pub expected_prior: Decision,
    pub new_decision: Decision,
    pub reviewer_id: String,
    pub reason: Option<String>,
    /// Unix epoch milliseconds.
    pub decided_at: i64,
}

/// Result of a compare-and-swap decision write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The write was applied; carries the updated record.
    Applied(Record),
    /// The stored decision did not match; carries the untouched current record.
    Stale(Record),
}

/// Result of appending one ingestion batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    /// Records stored, with their assigned ordinals.
    pub stored: Vec<Record>,
    /// Records skipped because an equal `dedup_key` was stored concurrently.
    pub late_duplicates: u64,
}

/// Repository interface for screening projects and records.
pub trait RecordRepository {
    /// Creates one project row.
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId>;
    /// Loads one project by id.
    fn get_project(&self, project_id: ProjectId) -> RepoResult<Option<Project>>;
    /// Lists all projects ordered by name.
    fn list_projects(&self) -> RepoResult<Vec<Project>>;
    /// Loads one project by its shared-access token.
    fn find_project_by_share_token(&self, share_token: &str) -> RepoResult<Option<Project>>;
    /// Replaces the shared-access token of one project.
    fn set_share_token(&self, project_id: ProjectId, share_token: &str) -> RepoResult<()>;
    /// Appends deduplicated records after the current last ordinal and bumps
    /// ingestion counters, in one transaction.
    fn append_records(
        &self,
        project_id: ProjectId,
        records: &[Record],
        counters: IngestCounters,
    ) -> RepoResult<AppendOutcome>;
    /// Loads the whole record set of one project.
    fn load_record_set(&self, project_id: ProjectId) -> RepoResult<Vec<Record>>;
    /// Replaces the whole record set of one project.
    fn replace_record_set(&self, project_id: ProjectId, records: &[Record]) -> RepoResult<()>;
    /// Loads one record.
    fn get_record(&self, project_id: ProjectId, record_id: RecordId)
        -> RepoResult<Option<Record>>;
    /// Writes a decision only if the stored decision equals `expected_prior`.
    fn compare_and_set_decision(
        &self,
        project_id: ProjectId,
        update: &DecisionUpdate,
    ) -> RepoResult<CasOutcome>;
    /// Lists decision history in write order.
    fn list_decision_history(&self, project_id: ProjectId) -> RepoResult<Vec<DecisionEvent>>;
}

/// SQLite-backed record repository.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn immediate_tx(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId> {
        self.conn
            .execute(
                "INSERT INTO projects (
                    uuid,
                    name,
                    share_token,
                    owner_email,
                    identified_count,
                    duplicates_removed,
                    malformed_skipped,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    project.uuid.to_string(),
                    project.name.as_str(),
                    project.share_token.as_str(),
                    project.owner_email.as_str(),
                    i64_param(project.identified_count),
                    i64_param(project.duplicates_removed),
                    i64_param(project.malformed_skipped),
                    project.created_at,
                ],
            )
            .map_err(|err| map_unique_violation(err, format!("project `{}`", project.name)))?;
        Ok(project.uuid)
    }

    fn get_project(&self, project_id: ProjectId) -> RepoResult<Option<Project>> {
        load_project(self.conn, project_id)
    }

    fn list_projects(&self) -> RepoResult<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROJECT_SELECT_SQL} ORDER BY name ASC, created_at ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }
        Ok(projects)
    }

    fn find_project_by_share_token(&self, share_token: &str) -> RepoResult<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROJECT_SELECT_SQL} WHERE share_token = ?1;"))?;
        let mut rows = stmt.query([share_token])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }

    fn set_share_token(&self, project_id: ProjectId, share_token: &str) -> RepoResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET share_token = ?2 WHERE uuid = ?1;",
                params![project_id.to_string(), share_token],
            )
            .map_err(|err| map_unique_violation(err, "project share token"))?;
        if changed == 0 {
            return Err(RepoError::ProjectNotFound(project_id));
        }
        Ok(())
    }

    fn append_records(
        &self,
        project_id: ProjectId,
        records: &[Record],
        counters: IngestCounters,
    ) -> RepoResult<AppendOutcome> {
        for record in records {
            record.validate()?;
        }

        let tx = self.immediate_tx()?;
        ensure_project_exists(&tx, project_id)?;

        let mut next_ordinal: i64 = tx.query_row(
            "SELECT COALESCE(MAX(ordinal), -1) + 1 FROM records WHERE project_uuid = ?1;",
            [project_id.to_string()],
            |row| row.get(0),
        )?;
        let mut stored = Vec::with_capacity(records.len());
        let mut late_duplicates = 0_u64;

        for record in records {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM records WHERE project_uuid = ?1 AND dedup_key = ?2
                );",
                params![project_id.to_string(), record.dedup_key.as_str()],
                |row| row.get(0),
            )?;
            if exists == 1 {
                late_duplicates += 1;
                continue;
            }

            let mut placed = record.clone();
            placed.ordinal = next_ordinal;
            insert_record(&tx, project_id, &placed)?;
            next_ordinal += 1;
            stored.push(placed);
        }

        tx.execute(
            "UPDATE projects
             SET
                identified_count = identified_count + ?2,
                duplicates_removed = duplicates_removed + ?3,
                malformed_skipped = malformed_skipped + ?4
             WHERE uuid = ?1;",
            params![
                project_id.to_string(),
                i64_param(counters.identified),
                i64_param(counters.duplicates + late_duplicates),
                i64_param(counters.malformed),
            ],
        )?;
        tx.commit()?;

        Ok(AppendOutcome {
            stored,
            late_duplicates,
        })
    }

    fn load_record_set(&self, project_id: ProjectId) -> RepoResult<Vec<Record>> {
        if load_project(self.conn, project_id)?.is_none() {
            return Err(RepoError::ProjectNotFound(project_id));
        }

        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE project_uuid = ?1
             ORDER BY ordinal ASC;"
        ))?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn replace_record_set(&self, project_id: ProjectId, records: &[Record]) -> RepoResult<()> {
        let mut ordinals = HashSet::with_capacity(records.len());
        let mut dedup_keys = HashSet::with_capacity(records.len());
        for record in records {
            record.validate()?;
            if !ordinals.insert(record.ordinal) {
                return Err(RepoError::AlreadyExists(format!(
                    "record ordinal {}",
                    record.ordinal
                )));
            }
            if !dedup_keys.insert(record.dedup_key.as_str()) {
                return Err(RepoError::AlreadyExists(format!(
                    "record dedup key `{}`",
                    record.dedup_key
                )));
            }
        }

        let tx = self.immediate_tx()?;
        ensure_project_exists(&tx, project_id)?;
        tx.execute(
            "DELETE FROM records WHERE project_uuid = ?1;",
            [project_id.to_string()],
        )?;
        for record in records {
            insert_record(&tx, project_id, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_record(
        &self,
        project_id: ProjectId,
        record_id: RecordId,
    ) -> RepoResult<Option<Record>> {
        load_record(self.conn, project_id, record_id)
    }

    fn compare_and_set_decision(
        &self,
        project_id: ProjectId,
        update: &DecisionUpdate,
    ) -> RepoResult<CasOutcome> {
        let tx = self.immediate_tx()?;
        let changed = tx.execute(
            "UPDATE records
             SET
                decision = ?1,
                reason = ?2,
                reviewer_id = ?3,
                decided_at = ?4
             WHERE project_uuid = ?5
               AND uuid = ?6
               AND decision = ?7;",
            params![
                update.new_decision.as_str(),
                update.reason.as_deref(),
                update.reviewer_id.as_str(),
                update.decided_at,
                project_id.to_string(),
                update.record_id.to_string(),
                update.expected_prior.as_str(),
            ],
        )?;

        let current = load_record(&tx, project_id, update.record_id)?
            .ok_or(RepoError::RecordNotFound(update.record_id))?;
        if changed == 0 {
            return Ok(CasOutcome::Stale(current));
        }

        // Dropping `tx` on a failed check rolls the update back.
        current.validate()?;
        tx.execute(
            "INSERT INTO decision_history (
                project_uuid,
                record_uuid,
                dedup_key,
                reviewer_id,
                decision,
                reason,
                decided_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                project_id.to_string(),
                current.uuid.to_string(),
                current.dedup_key.as_str(),
                update.reviewer_id.as_str(),
                update.new_decision.as_str(),
                update.reason.as_deref(),
                update.decided_at,
            ],
        )?;
        tx.commit()?;
        Ok(CasOutcome::Applied(current))
    }

    fn list_decision_history(&self, project_id: ProjectId) -> RepoResult<Vec<DecisionEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                record_uuid,
                dedup_key,
                reviewer_id,
                decision,
                reason,
                decided_at
             FROM decision_history
             WHERE project_uuid = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let record_text: String = row.get("record_uuid")?;
            let decision_text: String = row.get("decision")?;
            events.push(DecisionEvent {
                record_id: parse_uuid(&record_text, "decision_history.record_uuid")?,
                dedup_key: row.get("dedup_key")?,
                reviewer_id: row.get("reviewer_id")?,
                decision: parse_decision(&decision_text, "decision_history.decision")?,
                reason: row.get("reason")?,
                decided_at: row.get("decided_at")?,
            });
        }
        Ok(events)
    }
}

fn insert_record(conn: &Connection, project_id: ProjectId, record: &Record) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO records (
            uuid,
            project_uuid,
            ordinal,
            title,
            abstract_text,
            year,
            journal,
            article_type,
            dedup_key,
            decision,
            reason,
            reviewer_id,
            decided_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
        params![
            record.uuid.to_string(),
            project_id.to_string(),
            record.ordinal,
            record.title.as_str(),
            record.abstract_text.as_str(),
            record.year.as_str(),
            record.journal.as_str(),
            record.article_type.as_str(),
            record.dedup_key.as_str(),
            record.decision.as_str(),
            record.reason.as_deref(),
            record.reviewer_id.as_deref(),
            record.decided_at,
        ],
    )
    .map_err(|err| map_unique_violation(err, format!("record {}", record.uuid)))?;
    Ok(())
}

fn load_record(
    conn: &Connection,
    project_id: ProjectId,
    record_id: RecordId,
) -> RepoResult<Option<Record>> {
    conn.query_row(
        &format!("{RECORD_SELECT_SQL} WHERE project_uuid = ?1 AND uuid = ?2;"),
        params![project_id.to_string(), record_id.to_string()],
        |row| Ok(parse_record_row(row)),
    )
    .optional()?
    .transpose()
}

fn load_project(conn: &Connection, project_id: ProjectId) -> RepoResult<Option<Project>> {
    conn.query_row(
        &format!("{PROJECT_SELECT_SQL} WHERE uuid = ?1;"),
        [project_id.to_string()],
        |row| Ok(parse_project_row(row)),
    )
    .optional()?
    .transpose()
}

fn ensure_project_exists(conn: &Connection, project_id: ProjectId) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE uuid = ?1);",
        [project_id.to_string()],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::ProjectNotFound(project_id));
    }
    Ok(())
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let uuid_text: String = row.get("uuid")?;
    let decision_text: String = row.get("decision")?;
    let record = Record {
        uuid: parse_uuid(&uuid_text, "records.uuid")?,
        ordinal: row.get("ordinal")?,
        title: row.get("title")?,
        abstract_text: row.get("abstract_text")?,
        year: row.get("year")?,
        journal: row.get("journal")?,
        article_type: row.get("article_type")?,
        dedup_key: row.get("dedup_key")?,
        decision: parse_decision(&decision_text, "records.decision")?,
        reason: row.get("reason")?,
        reviewer_id: row.get("reviewer_id")?,
        decided_at: row.get("decided_at")?,
        relevance_score: None,
    };
    record.validate()?;
    Ok(record)
}

fn parse_project_row(row: &Row<'_>) -> RepoResult<Project> {
    let uuid_text: String = row.get("uuid")?;
    Ok(Project {
        uuid: parse_uuid(&uuid_text, "projects.uuid")?,
        name: row.get("name")?,
        share_token: row.get("share_token")?,
        owner_email: row.get("owner_email")?,
        identified_count: u64_column(row.get("identified_count")?, "projects.identified_count")?,
        duplicates_removed: u64_column(
            row.get("duplicates_removed")?,
            "projects.duplicates_removed",
        )?,
        malformed_skipped: u64_column(row.get("malformed_skipped")?, "projects.malformed_skipped")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_decision(value: &str, column: &str) -> RepoResult<Decision> {
    Decision::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid decision `{value}` in {column}")))
}
