mod commands;
mod make;
mod migrations;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tidemark_config::{AppConfig, ConfigLoader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::MigrateAction;

#[derive(Parser)]
#[command(name = "tidemark", version, about = "Batch-tracked, reversible schema migrations for SQLite")]
struct Cli {
    /// Path to the config file (YAML or TOML)
    #[arg(short, long, global = true, default_value = "tidemark.yml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run, undo or inspect migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Generate new files
    Make {
        #[command(subcommand)]
        target: MakeTarget,
    },
}

#[derive(Subcommand)]
enum MakeTarget {
    /// Create an empty timestamped SQL migration in the migrations directory
    Migration {
        /// Descriptive name, e.g. add_tags_table
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let config = load_config(&cli.config)?;
    init_tracing(&config.log_level, cli.log_format);
    info!("{}", config_source(&cli.config));

    match cli.command {
        Command::Migrate { action } => {
            for line in commands::migrate(&config, &action)? {
                println!("{line}");
            }
        }
        Command::Make {
            target: MakeTarget::Migration { name },
        } => {
            let now = chrono::Local::now().naive_local();
            let path = make::create_migration(&config.migrations.directory, &name, now)?;
            println!("Created migration: {}", path.display());
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    ConfigLoader::load_with_env(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Logged once the subscriber exists, since config decides the log level.
fn config_source(path: &Path) -> String {
    if path.exists() {
        format!("loaded config from {}", path.display())
    } else {
        format!("no config file at {}, using defaults", path.display())
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn down_is_an_alias_for_rollback() {
        let cli = Cli::try_parse_from(["tidemark", "migrate", "down"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Migrate {
                action: MigrateAction::Rollback
            }
        ));
    }

    #[test]
    fn parses_status_json_and_global_flags() {
        let cli = Cli::try_parse_from([
            "tidemark",
            "migrate",
            "status",
            "--json",
            "--config",
            "conf/app.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("conf/app.toml"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Command::Migrate {
                action: MigrateAction::Status { json: true }
            }
        ));
    }

    #[test]
    fn config_source_reports_file_or_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yml");
        assert!(config_source(&path).starts_with("no config file at"));

        std::fs::write(&path, "log_level: debug\n").unwrap();
        assert!(config_source(&path).starts_with("loaded config from"));
        assert_eq!(ConfigLoader::load(&path).unwrap().log_level, "debug");
    }

    #[test]
    fn parses_make_migration() {
        let cli = Cli::try_parse_from(["tidemark", "make", "migration", "add_tags_table"]).unwrap();
        match cli.command {
            Command::Make {
                target: MakeTarget::Migration { name },
            } => assert_eq!(name, "add_tags_table"),
            _ => panic!("expected make migration"),
        }
    }
}
