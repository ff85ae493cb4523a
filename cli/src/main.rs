use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use journal_kernel::{FileLog, Store, WriteError};

mod todos;

use todos::{TodoAdded, TodoCompleted, TodoRemoved, Todos};

/// Journal to-do list
#[derive(Parser, Debug)]
#[command(name = "journal")]
#[command(about = "To-do list kept in an append-only event log", long_about = None)]
struct Cli {
    /// Path to the event log
    #[arg(long, default_value = "journal.log")]
    log: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a to-do
    Add { title: String },

    /// Mark a to-do as done
    Done { id: Uuid },

    /// Remove a to-do
    Remove { id: Uuid },

    /// Print all to-dos as JSON
    List,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct Added {
    id: Uuid,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Open store (replays the log)
    // ----------------------------
    let backend = FileLog::open(&cli.log)
        .with_context(|| format!("opening event log {}", cli.log.display()))?;
    let store = Store::open(backend, Todos::default(), &todos::registry())
        .with_context(|| format!("loading event log {}", cli.log.display()))?;
    info!(log = %cli.log.display(), "store opened");

    // ----------------------------
    // Run command
    // ----------------------------
    let outcome = match cli.command {
        Command::Add { title } => {
            let id = Uuid::new_v4();
            store
                .write(|_| TodoAdded { id, title })
                .map(|()| Some(serde_json::to_value(Added { id })))
        }
        Command::Done { id } => store.write(|_| TodoCompleted { id }).map(|()| None),
        Command::Remove { id } => store.write(|_| TodoRemoved { id }).map(|()| None),
        Command::List => Ok(Some(store.read(|todos| serde_json::to_value(todos)))),
    };

    // ----------------------------
    // Output
    // ----------------------------
    match outcome {
        Ok(Some(value)) => {
            println!("{}", serde_json::to_string_pretty(&value?)?);
            Ok(ExitCode::SUCCESS)
        }
        Ok(None) => Ok(ExitCode::SUCCESS),
        Err(WriteError::Validation(rejection)) => {
            eprintln!("rejected: {}", rejection.source);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).context("writing to event log"),
    }
}
