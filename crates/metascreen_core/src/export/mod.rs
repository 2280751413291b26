//! Screening result export.
//!
//! CSV columns are fixed: title, abstract, year, journal, article_type,
//! decision, reason, reviewer_id. RIS output carries the screening outcome in
//! the `N1` note of each entry.

use crate::model::record::{Decision, Record};
use csv::Writer;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;

pub const CSV_HEADER: [&str; 8] = [
    "title",
    "abstract",
    "year",
    "journal",
    "article_type",
    "decision",
    "reason",
    "reviewer_id",
];

#[derive(Debug)]
pub enum ExportError {
    Csv(csv::Error),
    Io(std::io::Error),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(err) => write!(f, "csv export failed: {err}"),
            Self::Io(err) => write!(f, "export write failed: {err}"),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Csv(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<csv::Error> for ExportError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Writes `records` as CSV, header first, in the given order.
pub fn export_csv<W: Write>(records: &[Record], writer: W) -> Result<(), ExportError> {
    let mut csv_writer = Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;
    for record in records {
        csv_writer.write_record([
            record.title.as_str(),
            record.abstract_text.as_str(),
            record.year.as_str(),
            record.journal.as_str(),
            record.article_type.as_str(),
            record.decision.as_str(),
            record.reason.as_deref().unwrap_or(""),
            record.reviewer_id.as_deref().unwrap_or(""),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Writes `records` as RIS entries.
pub fn export_ris<W: Write>(records: &[Record], mut writer: W) -> Result<(), ExportError> {
    for record in records {
        write_tag(&mut writer, "TY", ris_type(&record.article_type))?;
        write_tag(&mut writer, "TI", &record.title)?;
        if !record.abstract_text.is_empty() {
            write_tag(&mut writer, "AB", &record.abstract_text)?;
        }
        if !record.year.is_empty() {
            write_tag(&mut writer, "PY", &record.year)?;
        }
        if !record.journal.is_empty() {
            write_tag(&mut writer, "JO", &record.journal)?;
        }
        write_tag(&mut writer, "N1", &screening_note(record))?;
        writeln!(writer, "ER  - ")?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Renders the screening outcome carried in the RIS `N1` field.
pub fn screening_note(record: &Record) -> String {
    let mut note = format!("Decision: {}", record.decision);
    if let Some(reviewer) = record.reviewer_id.as_deref() {
        note.push_str("; Reviewer: ");
        note.push_str(reviewer);
    }
    if record.decision == Decision::Excluded {
        if let Some(reason) = record.reason.as_deref() {
            note.push_str("; Reason: ");
            note.push_str(reason);
        }
    }
    note
}

fn ris_type(article_type: &str) -> &str {
    let trimmed = article_type.trim();
    if trimmed.len() >= 2 && trimmed.len() <= 4 && trimmed.chars().all(|c| c.is_ascii_uppercase())
    {
        return trimmed;
    }
    "JOUR"
}

fn write_tag<W: Write>(writer: &mut W, tag: &str, value: &str) -> std::io::Result<()> {
    // RIS is line oriented; embedded line breaks would start a bogus tag.
    let flattened = value.replace(['\r', '\n'], " ");
    writeln!(writer, "{tag}  - {flattened}")
}
