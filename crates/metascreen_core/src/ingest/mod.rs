//! Citation ingestion and normalization.
//!
//! # Responsibility
//! - Turn loosely-shaped source rows into [`RecordDraft`] values.
//! - Skip and count malformed rows instead of failing the batch.
//!
//! # Invariants
//! - Every produced draft has a non-blank title.
//! - Absent optional fields become empty strings.
//! - Only structural problems (no title column, broken stream) fail a batch.

use crate::model::record::RecordDraft;
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;

const TITLE_HEADERS: &[&str] = &["title", "primary_title", "ti"];
const ABSTRACT_HEADERS: &[&str] = &["abstract", "abstract_text", "ab"];
const YEAR_HEADERS: &[&str] = &["year", "publication_year", "py"];
const JOURNAL_HEADERS: &[&str] = &["journal", "secondary_title", "source", "jo"];
const TYPE_HEADERS: &[&str] = &["article_type", "type", "type_of_reference", "ty"];

/// One source row before normalization. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub title: Option<String>,
    #[serde(rename = "abstract", alias = "abstract_text")]
    pub abstract_text: Option<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    #[serde(alias = "type")]
    pub article_type: Option<String>,
}

/// Why one source row was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Title missing or whitespace only.
    BlankTitle,
    /// Row could not be decoded (for example invalid UTF-8).
    Unreadable(String),
}

impl Display for MalformedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "blank title"),
            Self::Unreadable(message) => write!(f, "unreadable row: {message}"),
        }
    }
}

/// Skipped source row, identified by its zero-based position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedIngestRecord {
    pub position: usize,
    pub reason: MalformedReason,
}

/// Normalized batch: usable drafts in source order plus skipped rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestBatch {
    pub drafts: Vec<RecordDraft>,
    pub malformed: Vec<MalformedIngestRecord>,
}

impl IngestBatch {
    pub fn malformed_count(&self) -> u64 {
        self.malformed.len() as u64
    }

    /// Runs every draft through normalization again.
    ///
    /// Batches can be assembled by hand, so drafts are not trusted to be
    /// normalized. Drafts with a blank title move to `malformed`, positioned
    /// by their index in `drafts`.
    pub fn renormalized(self) -> Self {
        let mut batch = Self {
            drafts: Vec::with_capacity(self.drafts.len()),
            malformed: self.malformed,
        };
        for (position, draft) in self.drafts.into_iter().enumerate() {
            push_normalized(&mut batch, position, RawRecord::from(draft));
        }
        batch
    }
}

impl From<RecordDraft> for RawRecord {
    fn from(draft: RecordDraft) -> Self {
        Self {
            title: Some(draft.title),
            abstract_text: Some(draft.abstract_text),
            year: Some(draft.year),
            journal: Some(draft.journal),
            article_type: Some(draft.article_type),
        }
    }
}

/// Batch-level ingestion failure.
#[derive(Debug)]
pub enum IngestError {
    /// The header row has no recognizable title column.
    MissingTitleColumn,
    Csv(csv::Error),
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTitleColumn => write!(f, "input has no title column"),
            Self::Csv(err) => write!(f, "csv input error: {err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingTitleColumn => None,
            Self::Csv(err) => Some(err),
        }
    }
}

impl From<csv::Error> for IngestError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

/// Normalizes already-parsed rows from any source.
pub fn normalize_raw_records(raw: impl IntoIterator<Item = RawRecord>) -> IngestBatch {
    let mut batch = IngestBatch::default();
    for (position, record) in raw.into_iter().enumerate() {
        push_normalized(&mut batch, position, record);
    }
    log_batch("normalize_raw_records", &batch);
    batch
}

/// Reads a CSV citation export with a header row.
///
/// Header names are matched case-insensitively; `type` and `article_type`
/// are both accepted for the article type column.
pub fn read_csv_batch<R: Read>(reader: R) -> Result<IngestBatch, IngestError> {
    let mut csv_reader = ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = ColumnMap::from_headers(csv_reader.headers()?)?;

    let mut batch = IngestBatch::default();
    for (position, row) in csv_reader.records().enumerate() {
        match row {
            Ok(row) => push_normalized(&mut batch, position, columns.raw_record(&row)),
            Err(err) if err.is_io_error() => return Err(IngestError::Csv(err)),
            Err(err) => batch.malformed.push(MalformedIngestRecord {
                position,
                reason: MalformedReason::Unreadable(err.to_string()),
            }),
        }
    }
    log_batch("read_csv_batch", &batch);
    Ok(batch)
}

struct ColumnMap {
    title: usize,
    abstract_text: Option<usize>,
    year: Option<usize>,
    journal: Option<usize>,
    article_type: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, IngestError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|header| header.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|header| header == alias))
        };

        Ok(Self {
            title: find(TITLE_HEADERS).ok_or(IngestError::MissingTitleColumn)?,
            abstract_text: find(ABSTRACT_HEADERS),
            year: find(YEAR_HEADERS),
            journal: find(JOURNAL_HEADERS),
            article_type: find(TYPE_HEADERS),
        })
    }

    fn raw_record(&self, row: &StringRecord) -> RawRecord {
        let field = |idx: Option<usize>| idx.and_then(|idx| row.get(idx)).map(str::to_string);
        RawRecord {
            title: field(Some(self.title)),
            abstract_text: field(self.abstract_text),
            year: field(self.year),
            journal: field(self.journal),
            article_type: field(self.article_type),
        }
    }
}

fn push_normalized(batch: &mut IngestBatch, position: usize, raw: RawRecord) {
    match normalize_one(raw) {
        Ok(draft) => batch.drafts.push(draft),
        Err(reason) => batch
            .malformed
            .push(MalformedIngestRecord { position, reason }),
    }
}

fn normalize_one(raw: RawRecord) -> Result<RecordDraft, MalformedReason> {
    let text = |value: Option<String>| value.map(|v| v.trim().to_string()).unwrap_or_default();
    let title = text(raw.title);
    if title.is_empty() {
        return Err(MalformedReason::BlankTitle);
    }
    Ok(RecordDraft {
        title,
        abstract_text: text(raw.abstract_text),
        year: text(raw.year),
        journal: text(raw.journal),
        article_type: text(raw.article_type),
    })
}

fn log_batch(source: &str, batch: &IngestBatch) {
    log::info!(
        "event=ingest_normalize module=ingest status=ok source={} drafts={} malformed={}",
        source,
        batch.drafts.len(),
        batch.malformed.len()
    );
}
