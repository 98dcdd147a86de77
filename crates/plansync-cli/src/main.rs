//! Plansync CLI - inspect and manage the local sync queue
//!
//! Operates directly on the durable queue database; never talks to the
//! remote. Useful for checking sync health and requeueing failed entries.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use plansync_core::{
    Database, OperationId, OperationQueue, SqliteOperationQueue, SyncOperation, SyncState,
    SyncStatusInfo,
};

mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "plansync")]
#[command(about = "Inspect and manage the Plansync queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Identity whose queue to operate on
    #[arg(long, default_value = "local")]
    owner: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show aggregate sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queue entries
    List {
        /// Only show failed entries
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Requeue failed entries with a fresh retry budget
    Retry {
        /// Queue entry id
        id: Option<String>,
        /// Requeue every failed entry
        #[arg(long)]
        all: bool,
    },
    /// Remove a queue entry regardless of status
    Remove {
        /// Queue entry id
        id: String,
    },
    /// Drop every queue entry for this owner
    Clear {
        /// Confirm the destructive operation
        #[arg(long)]
        force: bool,
    },
}

/// Queue-only status view; engine flags are unknown to an offline inspector
#[derive(Serialize)]
struct StatusOutput {
    state: SyncState,
    pending: u64,
    failed: u64,
    oldest_pending_age: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let path = match cli.db_path {
        Some(path) => path,
        None => default_db_path()?,
    };
    let db = Database::open(&path)?;
    let queue = SqliteOperationQueue::new(db, &cli.owner);
    tracing::debug!(path = %path.display(), owner = %cli.owner, "opened queue database");

    match cli.command {
        Commands::Status { json } => status(&queue, json),
        Commands::List { failed, json } => list(&queue, failed, json),
        Commands::Retry { id, all } => retry(&queue, id, all),
        Commands::Remove { id } => {
            queue.remove(&parse_id(&id)?)?;
            println!("Removed {id}");
            Ok(())
        }
        Commands::Clear { force } => {
            if !force {
                return Err(CliError::ClearNotConfirmed);
            }
            let removed = queue.clear()?;
            println!("Cleared {removed} queue entries");
            Ok(())
        }
    }
}

fn status(queue: &SqliteOperationQueue, json: bool) -> Result<(), CliError> {
    let (pending, failed) = queue.counts()?;
    let now = chrono::Utc::now().timestamp_millis();
    let oldest_pending_age = queue
        .pending()?
        .first()
        .map(|entry| format_age(entry.age_ms(now)));

    let output = StatusOutput {
        state: SyncStatusInfo::derive_state(true, false, pending, failed),
        pending,
        failed,
        oldest_pending_age,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("State:   {}", output.state);
        println!("Pending: {pending}");
        println!("Failed:  {failed}");
        if let Some(age) = output.oldest_pending_age {
            println!("Oldest pending entry: {age} old");
        }
    }
    Ok(())
}

fn list(queue: &SqliteOperationQueue, failed_only: bool, json: bool) -> Result<(), CliError> {
    let entries = if failed_only {
        queue.failed()?
    } else {
        queue.all()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp_millis();
    for entry in &entries {
        println!("{}", format_entry(entry, now));
    }
    println!("{} entries", entries.len());
    Ok(())
}

fn retry(queue: &SqliteOperationQueue, id: Option<String>, all: bool) -> Result<(), CliError> {
    if all {
        let moved = queue.requeue_all_failed()?;
        println!("Requeued {moved} failed entries");
        return Ok(());
    }
    let id = id.ok_or(CliError::MissingRetryTarget)?;
    queue.requeue_failed(&parse_id(&id)?)?;
    println!("Requeued {id}");
    Ok(())
}

fn parse_id(raw: &str) -> Result<OperationId, CliError> {
    raw.parse()
        .map_err(|_| CliError::InvalidOperationId(raw.to_string()))
}

fn default_db_path() -> Result<PathBuf, CliError> {
    let base = dirs::data_dir().ok_or(CliError::NoDataDir)?;
    Ok(base.join("plansync").join("plansync.db"))
}

fn format_entry(entry: &SyncOperation, now: i64) -> String {
    let mut line = format!(
        "{}  {:<10} {:<12} {:<6} {:<7} retries={} age={}",
        entry.id,
        entry.entity_kind,
        entry.entity_id,
        entry.operation,
        entry.status,
        entry.retry_count,
        format_age(entry.age_ms(now)),
    );
    if let Some(error) = &entry.last_error {
        line.push_str(&format!("  last_error={error}"));
    }
    line
}

fn format_age(ms: i64) -> String {
    let seconds = ms / 1000;
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plansync_core::{EntityKind, OperationKind};
    use serde_json::json;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(5_000), "5s");
        assert_eq!(format_age(90_000), "1m");
        assert_eq!(format_age(7_200_000), "2h");
        assert_eq!(format_age(200_000_000), "2d");
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = OperationId::new();
        assert_eq!(parse_id(&id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_format_entry_includes_error() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteOperationQueue::new(db, "u1");
        let id = queue
            .enqueue(
                EntityKind::Player,
                "p1",
                OperationKind::Create,
                Some(json!({"name": "Alice"})),
            )
            .unwrap();
        queue.mark_failed(&id, "conflict").unwrap();

        let entry = queue
            .find_by_entity(EntityKind::Player, "p1")
            .unwrap()
            .unwrap();
        let line = format_entry(&entry, chrono::Utc::now().timestamp_millis());
        assert!(line.contains("player"));
        assert!(line.contains("failed"));
        assert!(line.contains("last_error=conflict"));
    }
}
