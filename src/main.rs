//! Binary entry point for daybook.
//!
//! This binary provides the CLI interface for the daybook persistence and
//! sync engine.

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
use daybook::config::{DaybookConfig, StorageMode, SyncSettings};
use daybook::models::{ChatMessage, DiaryEntry, DiaryId, MessageRole, SessionId};
use daybook::observability::{self, LoggingConfig};
use daybook::storage::{DiaryQuery, DiaryStore};
use daybook::sync::SyncOrchestrator;
use std::path::PathBuf;
use std::process::ExitCode;

/// Daybook - local-first persistence and sync for sessions and diaries.
#[derive(Parser)]
#[command(name = "daybook")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Work with chat sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Work with diary entries.
    Diary {
        #[command(subcommand)]
        command: DiaryCommands,
    },

    /// Push local sessions to the replica now.
    Sync {
        /// Storage mode to sync with: local, remote, hybrid.
        #[arg(short, long)]
        mode: Option<String>,

        /// Also pull replica state into the local store afterwards.
        #[arg(long)]
        pull: bool,
    },

    /// Run the periodic sync timer until interrupted.
    Daemon {
        /// Sync interval in milliseconds.
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Show storage health and configuration.
    Status,
}

/// Session subcommands.
#[derive(Subcommand)]
enum SessionCommands {
    /// Append a message to a session, creating it if needed.
    Add {
        /// Session identifier.
        session_id: String,

        /// Message content.
        content: String,

        /// Message role: user, assistant, system.
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// List stored sessions, most recently updated first.
    List,

    /// Show the messages of one session.
    Show {
        /// Session identifier.
        session_id: String,
    },

    /// Delete a session.
    Delete {
        /// Session identifier.
        session_id: String,
    },
}

/// Diary subcommands.
#[derive(Subcommand)]
enum DiaryCommands {
    /// Add a diary entry for a calendar day.
    Add {
        /// Calendar day, e.g. 2026-08-29.
        date: String,

        /// Entry text.
        text: String,

        /// Entry title.
        #[arg(short, long)]
        title: Option<String>,

        /// Mood label.
        #[arg(short, long)]
        mood: Option<String>,
    },

    /// List entries, pinned first then newest first.
    List {
        /// Inclusive start day.
        #[arg(long)]
        from: Option<String>,

        /// Inclusive end day.
        #[arg(long)]
        to: Option<String>,

        /// Mood filter.
        #[arg(short, long)]
        mood: Option<String>,
    },

    /// Search entries for a case-insensitive needle.
    Search {
        /// Text to look for.
        needle: String,
    },

    /// Soft-delete an entry (keeps the row, hides it from listings).
    Delete {
        /// Entry identifier.
        id: String,

        /// Physically remove the row instead.
        #[arg(long)]
        hard: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let mut logging = LoggingConfig::from_env();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    observability::init_logging(&logging);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DaybookConfig> {
    let mut config = match &cli.config {
        Some(path) => DaybookConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => DaybookConfig::load_default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    Ok(config)
}

async fn run_command(command: Commands, config: DaybookConfig) -> anyhow::Result<()> {
    match command {
        Commands::Session { command } => run_session_command(command, config).await,
        Commands::Diary { command } => run_diary_command(command, &config),
        Commands::Sync { mode, pull } => run_sync(mode, pull, config).await,
        Commands::Daemon { interval_ms } => run_daemon(interval_ms, config).await,
        Commands::Status => run_status(config).await,
    }
}

async fn run_session_command(
    command: SessionCommands,
    config: DaybookConfig,
) -> anyhow::Result<()> {
    let orchestrator = SyncOrchestrator::new(config).await?;
    let store = orchestrator.store();

    match command {
        SessionCommands::Add {
            session_id,
            content,
            role,
        } => {
            let id = SessionId::new(session_id);
            let message = ChatMessage::new(MessageRole::parse(&role), content);
            store.save_message(&id, &message).await?;
            println!("Saved message {} to session {id}", message.id);
        },
        SessionCommands::List => {
            let sessions = store.load_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions stored.");
            }
            for session in sessions {
                println!(
                    "{}  {} message(s)  updated {}",
                    session.id,
                    session.messages.len(),
                    session.updated_at.to_rfc3339()
                );
            }
        },
        SessionCommands::Show { session_id } => {
            let messages = store.load_messages(&SessionId::new(session_id)).await?;
            for message in messages {
                println!(
                    "[{}] {}: {}",
                    message.timestamp.to_rfc3339(),
                    message.role.as_str(),
                    message.content
                );
            }
        },
        SessionCommands::Delete { session_id } => {
            let deleted = store.delete_session(&SessionId::new(session_id)).await?;
            if deleted {
                println!("Session deleted.");
            } else {
                println!("No such session.");
            }
        },
    }

    Ok(())
}

fn run_diary_command(command: DiaryCommands, config: &DaybookConfig) -> anyhow::Result<()> {
    let store = DiaryStore::new(config.data_dir.join("diary.db"))?;

    match command {
        DiaryCommands::Add {
            date,
            text,
            title,
            mood,
        } => {
            let mut entry = DiaryEntry::new(date, serde_json::json!({ "text": text }));
            if let Some(title) = title {
                entry.title = title;
            }
            entry.mood = mood;

            let saved = store.save(&entry)?;
            println!("Saved entry {} ({} words)", saved.id, saved.word_count);
        },
        DiaryCommands::List { from, to, mood } => {
            let mut query = DiaryQuery::new();
            query.from_date = from;
            query.to_date = to;
            query.mood = mood;

            let entries = store.list(&query);
            if entries.is_empty() {
                println!("No entries.");
            }
            for entry in entries {
                print_entry(&entry);
            }
        },
        DiaryCommands::Search { needle } => {
            let entries = store.search(&needle);
            if entries.is_empty() {
                println!("No matches.");
            }
            for entry in entries {
                print_entry(&entry);
            }
        },
        DiaryCommands::Delete { id, hard } => {
            let id = DiaryId::new(id);
            let removed = if hard {
                store.hard_delete(&id)?
            } else {
                store.soft_delete(&id)?
            };
            if removed {
                println!("Entry deleted.");
            } else {
                println!("No such entry.");
            }
        },
    }

    Ok(())
}

fn print_entry(entry: &DiaryEntry) {
    let pin = if entry.is_pinned { "*" } else { " " };
    let title = if entry.title.is_empty() {
        &entry.excerpt
    } else {
        &entry.title
    };
    println!("{pin} {}  {}  {}", entry.date, entry.id, title);
}

async fn run_sync(mode: Option<String>, pull: bool, mut config: DaybookConfig) -> anyhow::Result<()> {
    if let Some(mode) = mode {
        config.sync.mode = StorageMode::parse(&mode);
    }
    // A one-shot pass never needs the timer
    config.sync.sync_interval_ms = 0;

    let orchestrator = SyncOrchestrator::new(config).await?;
    let outcome = orchestrator.sync_now().await?;
    println!("{}", outcome.summary());

    if pull {
        let sessions = orchestrator.pull_now().await?;
        println!("holding {} session(s) after pull", sessions.len());
    }
    Ok(())
}

async fn run_daemon(interval_ms: Option<u64>, mut config: DaybookConfig) -> anyhow::Result<()> {
    if let Some(interval_ms) = interval_ms {
        config.sync.sync_interval_ms = interval_ms;
    }
    if config.sync.sync_interval_ms == 0 {
        bail!("daemon mode needs a non-zero sync interval");
    }

    let mut orchestrator = SyncOrchestrator::new(config).await?;
    println!(
        "Syncing every {}ms in {} mode, Ctrl-C to stop.",
        orchestrator.settings().sync_interval_ms,
        orchestrator.settings().mode.as_str()
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;

    orchestrator.shutdown();
    println!("Stopped.");
    Ok(())
}

async fn run_status(config: DaybookConfig) -> anyhow::Result<()> {
    println!("data dir:  {}", config.data_dir.display());
    println!("mode:      {}", config.sync.mode.as_str());
    println!("interval:  {}ms", config.sync.sync_interval_ms);
    println!("offline:   {}", config.sync.offline_mode_enabled);
    println!(
        "replica:   {}",
        config.api_base_url.as_deref().unwrap_or("(not configured)")
    );

    let kv = daybook::storage::TieredKv::open(&config.data_dir)?;
    println!(
        "kv tier:   {}",
        if kv.primary_available() {
            "primary (sqlite)"
        } else {
            "degraded (file)"
        }
    );

    let diary = DiaryStore::new(config.data_dir.join("diary.db"))?;
    println!("diary:     {} entries (schema v{})", diary.count()?, diary.schema_version()?);

    let sessions = SyncOrchestrator::new(
        DaybookConfig {
            sync: SyncSettings::new(),
            ..config
        },
    )
    .await?
    .store()
    .load_sessions()
    .await?;
    println!("sessions:  {}", sessions.len());

    Ok(())
}
