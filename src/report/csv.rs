//! CSV export of audit records.
//!
//! One header row, then one row per record. Every string column is quoted
//! and embedded quotes are doubled, even when the text looks like a number.
//!
//! # Columns
//!
//! - `id`: audit row id
//! - `created_at`: RFC 3339 timestamp
//! - `entity_type`, `entity_id`: empty for system-level events
//! - `operation_kind`: `dependency_check`, `dependency_view` or `cache_refresh`
//! - `outcome`: `SUCCESS`, `FAILED` or `WARNING`
//! - `dependency_count`
//! - `error_message`

use std::io;

use chrono::SecondsFormat;
use thiserror::Error;

use crate::audit::AuditRecord;

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

const HEADER: [&str; 8] = [
    "id",
    "created_at",
    "entity_type",
    "entity_id",
    "operation_kind",
    "outcome",
    "dependency_count",
    "error_message",
];

/// CSV output formatter.
pub struct CsvOutput<'a> {
    records: &'a [AuditRecord],
}

impl<'a> CsvOutput<'a> {
    #[must_use]
    pub fn new(records: &'a [AuditRecord]) -> Self {
        Self { records }
    }

    /// Write the CSV output to the given writer.
    ///
    /// Quoting follows the column type, not the field text: string columns
    /// are always quoted, numeric columns never are. Fields arrive already
    /// quoted, so the writer itself must not quote again.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);

        csv_writer.write_record(HEADER.iter().map(|name| quoted(name)))?;
        for record in self.records {
            csv_writer.write_record(row(record))?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Render into a byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }
}

fn row(record: &AuditRecord) -> [String; 8] {
    [
        numeric(record.id),
        quoted(&record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        quoted(record.entity_type.as_deref().unwrap_or_default()),
        numeric(record.entity_id),
        quoted(record.operation_kind.as_str()),
        quoted(record.outcome.as_str()),
        numeric(record.dependency_count),
        quoted(record.error_message.as_deref().unwrap_or_default()),
    ]
}

/// Wrap in double quotes, doubling any embedded quote.
fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn numeric<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
