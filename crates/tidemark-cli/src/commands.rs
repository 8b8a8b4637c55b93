use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use tidemark_config::AppConfig;
use tidemark_db::{
    Database, FileLock, MigrationState, MigrationStatus, Migrator, RollbackOutcome, SourceChain,
    SqlDirectorySource, UpOutcome,
};
use tracing::debug;

use crate::migrations;

#[derive(Debug, Clone, Subcommand)]
pub enum MigrateAction {
    /// Apply every pending migration as one batch
    Up,
    /// Undo the most recent batch
    #[command(alias = "down")]
    Rollback,
    /// Undo every applied migration
    Reset,
    /// Reset, then apply everything again
    Refresh,
    /// Drop ALL tables, then apply everything (destroys data)
    Fresh,
    /// Show which migrations have run
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

/// The lock file sits next to the database: `app.db` locks `app.db.migrate.lock`.
pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("tidemark"));
    name.push(".migrate.lock");
    db_path.with_file_name(name)
}

pub fn open_migrator(config: &AppConfig) -> Result<Migrator> {
    let db = Database::open(&config.database)
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;
    let source = SourceChain::new()
        .with(migrations::registry()?)
        .with(SqlDirectorySource::new(&config.migrations.directory));
    let lock = lock_path(&config.database.path);
    debug!(
        "migrating {} with ledger {}",
        config.database.path.display(),
        config.migrations.table
    );

    let migrator = Migrator::sqlite(Arc::new(db), source, &config.migrations.table)?;
    Ok(migrator.with_lock(FileLock::new(lock)))
}

/// Run one action and return what to print.
pub fn migrate(config: &AppConfig, action: &MigrateAction) -> Result<Vec<String>> {
    let migrator = open_migrator(config)?;
    let lines = match action {
        MigrateAction::Up => render_up(&migrator.up()?),
        MigrateAction::Rollback => render_rollback(&migrator.rollback()?),
        MigrateAction::Reset => render_rollback(&migrator.reset()?),
        MigrateAction::Refresh => {
            let outcome = migrator.refresh()?;
            let mut lines = render_rollback(&outcome.reset);
            lines.extend(render_up(&outcome.up));
            lines
        }
        MigrateAction::Fresh => {
            let outcome = migrator.fresh()?;
            let mut lines: Vec<String> = outcome
                .dropped
                .iter()
                .map(|t| format!("Dropped table: {t}"))
                .collect();
            lines.extend(render_up(&outcome.up));
            lines
        }
        MigrateAction::Status { json } => {
            let statuses = migrator.status()?;
            if *json {
                vec![serde_json::to_string_pretty(&statuses)?]
            } else {
                render_status(&statuses)
            }
        }
    };
    Ok(lines)
}

pub fn render_up(outcome: &UpOutcome) -> Vec<String> {
    match outcome {
        UpOutcome::AlreadyUpToDate => vec!["Nothing to migrate.".to_string()],
        UpOutcome::Applied { batch, migrations } => migrations
            .iter()
            .map(|m| format!("Migrated: {m}"))
            .chain(std::iter::once(format!("Batch {batch} applied.")))
            .collect(),
    }
}

pub fn render_rollback(outcome: &RollbackOutcome) -> Vec<String> {
    match outcome {
        RollbackOutcome::NothingToRollback => vec!["Nothing to rollback.".to_string()],
        RollbackOutcome::RolledBack {
            migrations,
            missing,
        } => migrations
            .iter()
            .map(|m| {
                if missing.contains(m) {
                    format!("Migration not found: {m}")
                } else {
                    format!("Rolled back: {m}")
                }
            })
            .collect(),
    }
}

pub fn render_status(statuses: &[MigrationStatus]) -> Vec<String> {
    if statuses.is_empty() {
        return vec!["No migrations found.".to_string()];
    }
    let mut lines = vec![format!("{:<5} {:<6} Migration", "Ran?", "Batch")];
    for status in statuses {
        let line = match &status.state {
            MigrationState::Pending => format!("{:<5} {:<6} {}", "No", "", status.name),
            MigrationState::Applied { batch } => {
                format!("{:<5} {:<6} {}", "Yes", batch, status.name)
            }
            MigrationState::Missing { batch } => {
                format!("{:<5} {:<6} {} (missing)", "Yes", batch, status.name)
            }
        };
        lines.push(line);
    }
    lines
}
