//! Binary entry point for recstore.
//!
//! A thin CLI over [`RecordStore`]: every subcommand runs one operation and
//! prints the result as JSON.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr/print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use recstore::observability::{self, LoggingConfig};
use recstore::storage::driver::driver_for;
use recstore::{ConnectionManager, Fields, Filter, RecordStore, RecstoreConfig, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Recstore - table-agnostic record access.
#[derive(Parser)]
#[command(name = "recstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "RECSTORE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print rows, optionally filtered.
    Get {
        /// Table name (the configured prefix is applied).
        table: String,

        /// Equality filter, `column=value` (repeatable, AND-combined).
        #[arg(short = 'w', long = "where", value_name = "COLUMN=VALUE")]
        filters: Vec<String>,
    },

    /// Print every row id.
    Ids {
        /// Table name.
        table: String,
    },

    /// Print the row count.
    Count {
        /// Table name.
        table: String,
    },

    /// Insert a row and print its id.
    Create {
        /// Table name.
        table: String,

        /// Column value, `column=value` (repeatable).
        #[arg(short, long = "field", value_name = "COLUMN=VALUE")]
        fields: Vec<String>,
    },

    /// Update columns of a row.
    Update {
        /// Table name.
        table: String,

        /// Row id.
        id: i64,

        /// Column value, `column=value` (repeatable).
        #[arg(short, long = "field", value_name = "COLUMN=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Delete a row.
    Delete {
        /// Table name.
        table: String,

        /// Row id.
        id: i64,
    },

    /// Check that the database is reachable.
    Ping,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match observability::with_bootstrap_logging(cli.verbose, || {
        load_config(cli.config.as_deref())
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) =
        observability::init_logging(LoggingConfig::from_settings(Some(&config.logging), cli.verbose))
    {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RecstoreConfig> {
    let config = match path {
        Some(path) => RecstoreConfig::load_from_file(path)?,
        None => RecstoreConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Runs the selected command.
fn run_command(command: Commands, config: &RecstoreConfig) -> anyhow::Result<()> {
    let db = &config.database;
    let driver = driver_for(db)?;
    let manager = Arc::new(ConnectionManager::new(driver, db.connect_params()));
    let mut store = RecordStore::new(Arc::clone(&manager));
    if let Some(schema) = &db.schema {
        store = store.with_schema(schema)?;
    }

    match command {
        Commands::Get { table, filters } => {
            let filter: Filter = parse_pairs(&filters)?.into_iter().collect();
            let records = store.try_get_objects(&db.table_name(&table), Some(&filter))?;
            print_json(&records)?;
        },
        Commands::Ids { table } => print_json(&store.try_get_object_ids(&db.table_name(&table))?)?,
        Commands::Count { table } => {
            print_json(&store.try_get_object_count(&db.table_name(&table))?)?;
        },
        Commands::Create { table, fields } => {
            let fields: Fields = parse_pairs(&fields)?.into_iter().collect();
            print_json(&store.try_create_object(&db.table_name(&table), &fields)?)?;
        },
        Commands::Update { table, id, fields } => {
            let fields: Fields = parse_pairs(&fields)?.into_iter().collect();
            store.try_update_object(&db.table_name(&table), id, &fields)?;
            print_json(&serde_json::json!({ "updated": id }))?;
        },
        Commands::Delete { table, id } => {
            store.try_delete_object(&db.table_name(&table), id)?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        },
        Commands::Ping => {
            if !manager.connect() {
                bail!("cannot connect to {} database '{}'", db.backend.as_str(), db.name);
            }
            print_json(&serde_json::json!({ "backend": manager.backend(), "connected": true }))?;
        },
    }

    manager.disconnect();
    Ok(())
}

/// Parses `column=value` arguments.
///
/// Values that parse as JSON keep their type (numbers, `null`, arrays);
/// anything else is taken as text.
fn parse_pairs(args: &[String]) -> anyhow::Result<Vec<(String, Value)>> {
    args.iter()
        .map(|arg| {
            let (column, raw) = arg
                .split_once('=')
                .with_context(|| format!("expected COLUMN=VALUE, got '{arg}'"))?;
            let value = serde_json::from_str::<serde_json::Value>(raw)
                .map_or_else(|_| Value::from(raw), Value::from);
            Ok((column.to_string(), value))
        })
        .collect()
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&[
            "age=30".to_string(),
            "name=alice".to_string(),
            "tags=[\"a\",\"b\"]".to_string(),
            "note=a=b".to_string(),
        ])
        .unwrap();

        assert_eq!(pairs[0], ("age".to_string(), Value::Integer(30)));
        assert_eq!(pairs[1], ("name".to_string(), Value::from("alice")));
        assert_eq!(pairs[2].1, Value::from(vec!["a", "b"]));
        assert_eq!(pairs[3], ("note".to_string(), Value::from("a=b")));
    }

    #[test]
    fn test_parse_pairs_rejects_missing_equals() {
        assert!(parse_pairs(&["age".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "recstore", "update", "users", "7", "--field", "age=31",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Update { id: 7, .. }));
        assert!(Cli::try_parse_from(["recstore", "update", "users", "7"]).is_err());
    }
}
