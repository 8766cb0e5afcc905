//! JSON export of audit records.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "exportDate": "2024-05-01T12:00:00Z",
//!   "filters": { "entityType": "equipment", "windowDays": 7 },
//!   "totalRecords": 1,
//!   "records": [
//!     {
//!       "id": 12,
//!       "entityType": "equipment",
//!       "entityId": 42,
//!       "operationKind": "dependency_check",
//!       "outcome": "SUCCESS",
//!       "dependencyCount": 3,
//!       "errorMessage": null,
//!       "createdAt": "2024-05-01T11:59:58.123456Z"
//!     }
//!   ]
//! }
//! ```

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditFilter, AuditRecord};

/// Envelope written by the JSON exporter.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOutput<'a> {
    /// When the export was produced
    pub export_date: DateTime<Utc>,
    /// The filters the records were selected with
    pub filters: &'a AuditFilter,
    /// Number of records in `records`
    pub total_records: usize,
    /// Matching records, newest first
    pub records: &'a [AuditRecord],
}

impl<'a> JsonOutput<'a> {
    #[must_use]
    pub fn new(
        records: &'a [AuditRecord],
        filters: &'a AuditFilter,
        export_date: DateTime<Utc>,
    ) -> Self {
        Self {
            export_date,
            filters,
            total_records: records.len(),
            records,
        }
    }

    /// Pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty-printed JSON to the given writer.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n").map_err(serde_json::Error::io)
    }
}
