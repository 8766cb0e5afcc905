//! Command-line interface definitions for refguard.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, color, database, config) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Can equipment 42 be deleted?
//! refguard check equipment 42
//!
//! # Same check with a page of blocking rows, as JSON
//! refguard check equipment 42 --samples --sample-limit 5 --output json
//!
//! # Rebuild the dependency cache
//! refguard refresh
//!
//! # Export last week's failed checks
//! refguard export --days 7 --outcome failed --format csv --out failed.csv
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::audit::{OperationKind, Outcome, MAX_WINDOW_DAYS};
use crate::registry::RelationshipKind;

/// Referential-integrity guard for relational records.
///
/// refguard answers "can this record be deleted?" from a registry of
/// parent/child relationships, keeps a cache of dependency summaries, and
/// audits every check.
#[derive(Debug, Parser)]
#[command(name = "refguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace including SQL)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// SQLite database path (overrides config and REFGUARD_DATABASE)
    #[arg(long, value_name = "PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Config file path (default: platform config dir)
    #[arg(long, value_name = "PATH", global = true, env = "REFGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for refguard.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check whether an entity can be deleted
    Check(ResolveArgs),
    /// Show the dependents of an entity
    View(ResolveArgs),
    /// Evict stale cache entries and rebuild the rest
    Refresh(RefreshArgs),
    /// Inspect or maintain the dependency cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Browse the audit log
    Audit(AuditArgs),
    /// Validation counts over a trailing window
    Summary(SummaryArgs),
    /// Relationship counts per entity type
    Overview(OverviewArgs),
    /// Export the audit log as CSV or JSON
    Export(ExportArgs),
    /// Manage relationship definitions
    #[command(subcommand)]
    Relationship(RelationshipCommand),
    /// Create the engine tables
    Init,
}

/// Arguments for `check` and `view`.
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Entity type (table name), e.g. equipment
    #[arg(value_name = "ENTITY_TYPE")]
    pub entity_type: String,

    /// Entity id
    #[arg(value_name = "ID", allow_negative_numbers = true)]
    pub entity_id: i64,

    /// Include a page of matching child rows per finding
    #[arg(long)]
    pub samples: bool,

    /// Samples per finding (capped by sample_cap)
    #[arg(long, value_name = "N", requires = "samples")]
    pub sample_limit: Option<u32>,

    /// 0-based sample page
    #[arg(long, value_name = "N", default_value = "0", requires = "samples")]
    pub sample_page: u32,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `refresh`.
#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Cache subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show the cached summary for an entity
    Get {
        #[arg(value_name = "ENTITY_TYPE")]
        entity_type: String,
        #[arg(value_name = "ID", allow_negative_numbers = true)]
        entity_id: i64,
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Entry counts by freshness
    Stats {
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Delete entries older than the staleness window
    Evict,
}

/// Arguments for `audit`.
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Only records for this entity type
    #[arg(long, value_name = "TYPE")]
    pub entity_type: Option<String>,

    /// Only records with this outcome
    #[arg(long, value_enum)]
    pub outcome: Option<OutcomeArg>,

    /// Only records of this operation kind
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Trailing window in days, e.g. 7 or 7d
    #[arg(long, value_name = "DAYS", value_parser = parse_days)]
    pub days: Option<u32>,

    /// 1-based page number
    #[arg(long, value_name = "N", default_value = "1")]
    pub page: u32,

    /// Records per page (default from config)
    #[arg(long, value_name = "N")]
    pub limit: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `summary`.
#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Trailing window in days (default from config)
    #[arg(long, value_name = "DAYS", value_parser = parse_days)]
    pub days: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `overview`.
#[derive(Debug, Args)]
pub struct OverviewArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `export`.
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Trailing window in days (default from config)
    #[arg(long, value_name = "DAYS", value_parser = parse_days)]
    pub days: Option<u32>,

    /// Only records for this entity type
    #[arg(long, value_name = "TYPE")]
    pub entity_type: Option<String>,

    /// Only records with this outcome
    #[arg(long, value_enum)]
    pub outcome: Option<OutcomeArg>,

    /// Only records of this operation kind
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Export format: csv or json
    #[arg(short, long, value_name = "FORMAT")]
    pub format: String,

    /// Write to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

/// Relationship subcommands.
#[derive(Debug, Subcommand)]
pub enum RelationshipCommand {
    /// List relationship definitions
    List {
        /// Include deactivated relationships
        #[arg(long)]
        all: bool,
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Register a new relationship
    Add(AddRelationshipArgs),
    /// Stop checking a relationship
    Deactivate {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Resume checking a relationship
    Activate {
        #[arg(value_name = "ID")]
        id: i64,
    },
}

/// Arguments for `relationship add`.
#[derive(Debug, Args)]
pub struct AddRelationshipArgs {
    /// Parent entity type
    #[arg(value_name = "PARENT")]
    pub parent: String,

    /// Child entity type holding the foreign key
    #[arg(value_name = "CHILD")]
    pub child: String,

    /// Foreign key column on the child
    #[arg(value_name = "FK_COLUMN")]
    pub foreign_key_column: String,

    /// Relationship kind
    #[arg(long, value_enum, default_value = "one-to-many")]
    pub kind: RelationshipKindArg,

    /// Dependents are removed with the parent and do not block deletion
    #[arg(long)]
    pub cascade: bool,

    /// Free-text description
    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Audit outcome filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    Success,
    Failed,
    Warning,
}

impl From<OutcomeArg> for Outcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Success => Outcome::Success,
            OutcomeArg::Failed => Outcome::Failed,
            OutcomeArg::Warning => Outcome::Warning,
        }
    }
}

/// Audit operation kind filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// dependency_check
    Check,
    /// dependency_view
    View,
    /// cache_refresh
    Refresh,
}

impl From<KindArg> for OperationKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Check => OperationKind::DependencyCheck,
            KindArg::View => OperationKind::DependencyView,
            KindArg::Refresh => OperationKind::CacheRefresh,
        }
    }
}

/// Relationship kind for `relationship add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelationshipKindArg {
    OneToMany,
    ManyToMany,
}

impl From<RelationshipKindArg> for RelationshipKind {
    fn from(arg: RelationshipKindArg) -> Self {
        match arg {
            RelationshipKindArg::OneToMany => RelationshipKind::OneToMany,
            RelationshipKindArg::ManyToMany => RelationshipKind::ManyToMany,
        }
    }
}

/// Parse a trailing window such as `7` or `7d` into days.
///
/// # Examples
///
/// ```
/// use refguard::cli::parse_days;
///
/// assert_eq!(parse_days("7").unwrap(), 7);
/// assert_eq!(parse_days("30d").unwrap(), 30);
/// assert!(parse_days("0").is_err());
/// ```
///
/// # Errors
///
/// Returns an error for empty input, non-numbers, zero, or windows longer
/// than the audit log accepts.
pub fn parse_days(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits = s.strip_suffix(['d', 'D']).unwrap_or(s).trim();
    if digits.is_empty() {
        return Err("Window cannot be empty".to_string());
    }
    let days: u32 = digits
        .parse()
        .map_err(|_| format!("Invalid number of days: '{s}'"))?;
    if days == 0 {
        return Err("Window must be at least 1 day".to_string());
    }
    if days > MAX_WINDOW_DAYS {
        return Err(format!("Window cannot exceed {MAX_WINDOW_DAYS} days"));
    }
    Ok(days)
}
