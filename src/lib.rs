//! refguard - dependency validation and cache engine
//!
//! Answers "can this record be deleted?" for relational data. A registry of
//! parent/child relationships drives per-entity dependency checks; results are
//! memoized in a keyed cache, every check is written to an append-only audit
//! log, and the log feeds windowed summaries and CSV/JSON exports.
//!
//! Library users go through [`engine::Engine`]; the `refguard` binary is a
//! thin layer over [`run_app`].

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod signal;
pub mod store;

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;

use crate::audit::{AuditFilter, Pagination};
use crate::cli::{CacheCommand, Cli, Commands, OutputFormat, RelationshipCommand, ResolveArgs};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::ExitCode;
use crate::output::{text, write_json};
use crate::progress::Progress;
use crate::registry::NewRelationship;
use crate::resolver::ResolveOptions;
use crate::store::SqliteStore;

/// Run the CLI application logic.
///
/// Returns the exit code for successful runs; errors are reported by `main`.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color || !io::stdout().is_terminal() {
        yansi::disable();
    }

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    let database = config.database_path()?;
    log::debug!("Opening database {}", database.display());
    let store = SqliteStore::open(&database, config.busy_timeout())
        .with_context(|| format!("Failed to open database {}", database.display()))?;

    let engine = Engine::new(Arc::new(store), &config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let code = match cli.command {
        Commands::Init => {
            writeln!(out, "Engine tables ready in {}", database.display())?;
            ExitCode::Success
        }
        Commands::Check(args) => {
            let options = resolve_options(&args, &config);
            let summary = engine.resolve(&args.entity_type, args.entity_id, &options)?;
            render(&mut out, args.output, &summary, |w, v| text::write_summary(w, v))?;
            if summary.deletable {
                ExitCode::Success
            } else {
                ExitCode::Blocked
            }
        }
        Commands::View(args) => {
            let options = resolve_options(&args, &config);
            let summary = engine.view(&args.entity_type, args.entity_id, &options)?;
            render(&mut out, args.output, &summary, |w, v| text::write_summary(w, v))?;
            ExitCode::Success
        }
        Commands::Refresh(args) => {
            let handler = signal::install_handler()?;
            let mut refresher = engine.refresher().with_shutdown_flag(handler.get_flag());
            if !args.no_progress && !cli.quiet && io::stderr().is_terminal() {
                refresher = refresher
                    .with_progress_callback(Arc::new(Progress::new(false, cli.no_color)));
            }
            let report = refresher.refresh_all()?;
            render(&mut out, args.output, &report, |w, v| text::write_refresh_report(w, v))?;
            if report.interrupted {
                ExitCode::Interrupted
            } else if report.failures.is_empty() {
                ExitCode::Success
            } else {
                ExitCode::PartialSuccess
            }
        }
        Commands::Cache(command) => match command {
            CacheCommand::Get {
                entity_type,
                entity_id,
                output,
            } => {
                let entry = engine.cache_get(&entity_type, entity_id)?;
                match output {
                    OutputFormat::Json => write_json(&mut out, &entry)?,
                    OutputFormat::Text => text::write_cache_entry(&mut out, entry.as_ref())?,
                }
                ExitCode::Success
            }
            CacheCommand::Stats { output } => {
                let stats = engine.cache_stats()?;
                render(&mut out, output, &stats, |w, v| text::write_cache_stats(w, v))?;
                ExitCode::Success
            }
            CacheCommand::Evict => {
                let evicted = engine.evict_stale()?;
                writeln!(out, "Evicted {evicted} stale entries")?;
                ExitCode::Success
            }
        },
        Commands::Audit(args) => {
            let filter = AuditFilter {
                entity_type: args.entity_type,
                outcome: args.outcome.map(Into::into),
                operation_kind: args.kind.map(Into::into),
                window_days: args.days,
            };
            let limit = args.limit.unwrap_or(config.default_page_limit);
            let pagination = Pagination::new(args.page, limit);
            let page = engine.list_recent(&filter, pagination)?;
            render(&mut out, args.output, &page, |w, v| text::write_audit_page(w, v))?;
            ExitCode::Success
        }
        Commands::Summary(args) => {
            let summary = engine.summary(args.days.unwrap_or(config.default_window_days))?;
            render(&mut out, args.output, &summary, |w, v| text::write_report_summary(w, v))?;
            ExitCode::Success
        }
        Commands::Overview(args) => {
            let overview = engine.entities_overview()?;
            match args.output {
                OutputFormat::Json => write_json(&mut out, &overview)?,
                OutputFormat::Text => text::write_overview(&mut out, &overview)?,
            }
            ExitCode::Success
        }
        Commands::Export(args) => {
            let filter = AuditFilter {
                entity_type: args.entity_type,
                outcome: args.outcome.map(Into::into),
                operation_kind: args.kind.map(Into::into),
                window_days: None,
            };
            let days = args.days.unwrap_or(config.default_window_days);
            let export = engine.export(days, &filter, &args.format)?;
            match &args.out {
                Some(path) => {
                    fs::write(path, &export.bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    log::info!(
                        "Wrote {} records ({}) to {}",
                        export.total_records,
                        export.content_type,
                        path.display()
                    );
                }
                None => out.write_all(&export.bytes)?,
            }
            ExitCode::Success
        }
        Commands::Relationship(command) => run_relationship(&engine, command, &mut out)?,
    };

    out.flush()?;
    Ok(code)
}

fn resolve_options(args: &ResolveArgs, config: &Config) -> ResolveOptions {
    if args.samples {
        ResolveOptions::default().with_samples(
            args.sample_limit.unwrap_or(config.sample_cap),
            args.sample_page,
        )
    } else {
        ResolveOptions::default()
    }
}

fn render<W, T, F>(out: &mut W, format: OutputFormat, value: &T, as_text: F) -> io::Result<()>
where
    W: Write,
    T: serde::Serialize,
    F: FnOnce(&mut W, &T) -> io::Result<()>,
{
    match format {
        OutputFormat::Json => write_json(out, value),
        OutputFormat::Text => as_text(out, value),
    }
}

fn run_relationship<W: Write>(
    engine: &Engine,
    command: RelationshipCommand,
    out: &mut W,
) -> anyhow::Result<ExitCode> {
    let registry = engine.registry();
    match command {
        RelationshipCommand::List { all, output } => {
            let relationships = registry.list(all).map_err(error::EngineError::from)?;
            match output {
                OutputFormat::Json => write_json(out, &relationships)?,
                OutputFormat::Text => text::write_relationships(out, &relationships)?,
            }
        }
        RelationshipCommand::Add(args) => {
            let mut new = NewRelationship::new(&args.parent, &args.child, &args.foreign_key_column)
                .with_kind(args.kind.into())
                .with_cascade(args.cascade);
            if let Some(description) = args.description {
                new = new.with_description(description);
            }
            for table in [&args.parent, &args.child] {
                if !engine.catalog().contains_table(table) {
                    log::warn!(
                        "Table '{table}' is not in the current schema; \
                         checks will fail until it exists"
                    );
                }
            }
            let id = registry.register(&new).map_err(error::EngineError::from)?;
            writeln!(out, "Registered relationship #{id}")?;
        }
        RelationshipCommand::Deactivate { id } => {
            registry.set_active(id, false).map_err(error::EngineError::from)?;
            writeln!(out, "Deactivated relationship #{id}")?;
        }
        RelationshipCommand::Activate { id } => {
            registry.set_active(id, true).map_err(error::EngineError::from)?;
            writeln!(out, "Activated relationship #{id}")?;
        }
    }
    Ok(ExitCode::Success)
}
