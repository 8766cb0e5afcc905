//! Human-readable renderings.
//!
//! Colors come from `yansi`; `main` disables them for `--no-color`, for
//! `NO_COLOR`, and when stdout is not a terminal.

use std::io::{self, Write};

use chrono::{SecondsFormat, Utc};
use yansi::Paint;

use crate::audit::{AuditPage, Outcome};
use crate::cache::{CacheEntry, CacheStats, RefreshReport};
use crate::registry::RelationshipDefinition;
use crate::report::{EntityOverview, ReportSummary};
use crate::resolver::{DependencySummary, RecordSample};
use crate::store::Value;

/// Verdict and findings of a check or view.
pub fn write_summary<W: Write>(mut w: W, summary: &DependencySummary) -> io::Result<()> {
    let verdict = if summary.deletable {
        "deletable".green().bold().to_string()
    } else {
        "blocked".red().bold().to_string()
    };
    writeln!(
        w,
        "{} {}: {} ({} dependent records)",
        summary.entity_type, summary.entity_id, verdict, summary.total_dependent_records
    )?;

    for finding in &summary.findings {
        let marker = if finding.is_blocking() {
            "blocks".red().to_string()
        } else {
            "cascades".yellow().to_string()
        };
        writeln!(
            w,
            "  {}.{}  {} rows  [{}, {}]",
            finding.child_entity_type,
            finding.foreign_key_column,
            finding.match_count,
            finding.relationship_kind,
            marker
        )?;
        for sample in &finding.samples {
            writeln!(w, "    {}", format_sample(sample).dim())?;
        }
    }
    Ok(())
}

fn format_sample(sample: &RecordSample) -> String {
    sample
        .iter()
        .map(|(column, value)| format!("{column}={}", format_value(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(x) => x.to_string(),
        Value::Text(s) => format!("{s:?}"),
    }
}

pub fn write_refresh_report<W: Write>(mut w: W, report: &RefreshReport) -> io::Result<()> {
    writeln!(
        w,
        "Refreshed {} entries, evicted {} stale entries",
        report.refreshed.bold(),
        report.evicted
    )?;
    if report.interrupted {
        writeln!(w, "{}", "Run interrupted before all entities were visited".yellow())?;
    }
    if !report.failures.is_empty() {
        writeln!(w, "{} failures:", report.failures.len().to_string().red())?;
        for failure in &report.failures {
            match failure.entity_id {
                Some(id) => writeln!(w, "  {} {}: {}", failure.entity_type, id, failure.error)?,
                None => writeln!(w, "  {}: {}", failure.entity_type, failure.error)?,
            }
        }
    }
    Ok(())
}

pub fn write_cache_entry<W: Write>(mut w: W, entry: Option<&CacheEntry>) -> io::Result<()> {
    match entry {
        None => writeln!(w, "{}", "Not cached".dim()),
        Some(entry) => {
            let age = entry.age(Utc::now());
            writeln!(
                w,
                "{} {}: {} dependent records, computed {} ({}s ago)",
                entry.entity_type,
                entry.entity_id,
                entry.dependency_count,
                entry.computed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                age.num_seconds()
            )
        }
    }
}

pub fn write_cache_stats<W: Write>(mut w: W, stats: &CacheStats) -> io::Result<()> {
    writeln!(
        w,
        "{} entries: {} fresh, {} stale",
        stats.total,
        stats.fresh.green(),
        stats.stale.yellow()
    )
}

pub fn write_audit_page<W: Write>(mut w: W, page: &AuditPage) -> io::Result<()> {
    if page.records.is_empty() {
        return writeln!(w, "{}", "No audit records".dim());
    }
    for record in &page.records {
        let outcome = match record.outcome {
            Outcome::Success => record.outcome.as_str().green().to_string(),
            Outcome::Failed => record.outcome.as_str().red().to_string(),
            Outcome::Warning => record.outcome.as_str().yellow().to_string(),
        };
        let entity = match (&record.entity_type, record.entity_id) {
            (Some(t), Some(id)) => format!("{t} {id}"),
            _ => "-".to_string(),
        };
        write!(
            w,
            "{}  {:<16}  {:<7}  {}",
            record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.operation_kind.as_str(),
            outcome,
            entity
        )?;
        if let Some(count) = record.dependency_count {
            write!(w, "  deps={count}")?;
        }
        if let Some(message) = &record.error_message {
            write!(w, "  {}", message.as_str().dim())?;
        }
        writeln!(w)?;
    }
    writeln!(
        w,
        "Page {} of {} ({} records)",
        page.page,
        page.total_pages.max(1),
        page.total
    )
}

pub fn write_report_summary<W: Write>(mut w: W, summary: &ReportSummary) -> io::Result<()> {
    writeln!(w, "Last {} days", summary.window_days.bold())?;
    writeln!(w, "  validations:               {}", summary.total_validations)?;
    writeln!(w, "  successful:                {}", summary.successful.green())?;
    writeln!(w, "  failed:                    {}", summary.failed.red())?;
    writeln!(w, "  warnings:                  {}", summary.warnings.yellow())?;
    writeln!(w, "  entities with dependents:  {}", summary.entities_with_dependencies)?;
    writeln!(w, "  average dependents:        {:.2}", summary.average_dependencies)
}

pub fn write_overview<W: Write>(mut w: W, overview: &[EntityOverview]) -> io::Result<()> {
    if overview.is_empty() {
        return writeln!(w, "{}", "No relationships registered".dim());
    }
    writeln!(w, "{:<24} {:>6} {:>7} {:>10}", "ENTITY TYPE", "TOTAL", "ACTIVE", "IN USE")?;
    for row in overview {
        writeln!(
            w,
            "{:<24} {:>6} {:>7} {:>10}",
            row.entity_type,
            row.total_relationships,
            row.active_relationships,
            row.relationships_with_dependencies
        )?;
    }
    Ok(())
}

pub fn write_relationships<W: Write>(
    mut w: W,
    relationships: &[RelationshipDefinition],
) -> io::Result<()> {
    if relationships.is_empty() {
        return writeln!(w, "{}", "No relationships registered".dim());
    }
    for r in relationships {
        let state = if r.active {
            "active".green().to_string()
        } else {
            "inactive".dim().to_string()
        };
        write!(
            w,
            "#{:<4} {} -> {}.{}  [{}{}] {}",
            r.id,
            r.parent_entity_type,
            r.child_entity_type,
            r.foreign_key_column,
            r.relationship_kind,
            if r.cascade_allowed { ", cascade" } else { "" },
            state
        )?;
        if let Some(description) = &r.description {
            write!(w, "  {description}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}
