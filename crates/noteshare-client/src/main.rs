//! noteshare: command-line client for shared notes.
//!
//! `edit` and `watch` keep a live session open against the relay; the other
//! subcommands are one-shot REST calls.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use noteshare_client::config::{DEFAULT_API_URL, DEFAULT_SHARE_URL, DEFAULT_SOCKET_URL};
use noteshare_client::{Config, HttpNoteApi, WsConfig, WsTransport};
use noteshare_core::expiry::{format_remaining, time_remaining};
use noteshare_core::{
    CacheConfig, ConnectionConfig, ConnectionManager, ConnectionStatus, EditPhase, Library,
    NoteApi, NoteCache, NoteSession, PipelineConfig, SavePlan, SyncContext, TextSurface,
    parse_note_link,
};

#[derive(Parser, Debug)]
#[command(name = "noteshare")]
#[command(about = "Create, edit and share notes in real time")]
struct Args {
    /// REST API base URL
    #[arg(long, global = true, env = "NOTESHARE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Real-time relay URL
    #[arg(long, global = true, env = "NOTESHARE_SOCKET_URL", default_value = DEFAULT_SOCKET_URL)]
    socket_url: String,

    /// Public origin for share links
    #[arg(long, global = true, env = "NOTESHARE_SHARE_URL", default_value = DEFAULT_SHARE_URL)]
    share_url: String,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new note
    Create {
        /// Initial content
        content: Option<String>,
    },
    /// Print a note's content
    Get {
        /// Note id or share link
        note: String,
    },
    /// Edit a note live: every line read from stdin replaces the content
    Edit { note: String },
    /// Print remote updates to a note as they arrive
    Watch { note: String },
    /// Save a note to the library
    Save {
        note: String,
        /// Title for a new library entry
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// List library entries
    List,
    /// Delete a library entry
    Delete {
        /// Library entry id
        id: String,
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,noteshare=debug"
    } else {
        "info,noteshare=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new(&args.api_url, &args.socket_url, &args.share_url)?;
    debug!("API: {}, relay: {}", config.api_url, config.socket_url);
    let api: Arc<dyn NoteApi> = Arc::new(HttpNoteApi::new(&config.api_url)?);

    match args.command {
        Command::Create { content } => {
            let note = api.create_note(content.as_deref().unwrap_or_default()).await?;
            println!("{}", note.id);
            println!("{}/{}", config.share_url, note.id);
        }
        Command::Get { note } => {
            let id = note_id(&note)?;
            let Some(note) = api.get_note(&id).await? else {
                bail!("Note not found: {}", id);
            };
            println!("{}", note.content);
            eprintln!(
                "Expires in: {}",
                format_remaining(time_remaining(note.created_at, Utc::now()))
            );
        }
        Command::Edit { note } => {
            edit(&config, api, &note_id(&note)?).await?;
        }
        Command::Watch { note } => {
            watch(&config, api, &note_id(&note)?).await?;
        }
        Command::Save {
            note,
            title,
            password,
        } => {
            let id = note_id(&note)?;
            let library = Library::new(Arc::clone(&api), &config.share_url);
            if library.prepare(&id).await? == SavePlan::New && title.is_none() {
                bail!("--title is required when saving a note for the first time");
            }
            let Some(current) = api.get_note(&id).await? else {
                bail!("Note not found: {}", id);
            };
            let saved = library
                .save(&id, &current.content, title.as_deref(), password.as_deref())
                .await?;
            if saved.is_new == Some(false) {
                println!("Updated \"{}\" ({})", saved.title, saved.id);
            } else {
                println!("Saved \"{}\" ({})", saved.title, saved.id);
            }
        }
        Command::List => {
            let library = Library::new(Arc::clone(&api), &config.share_url);
            for entry in library.list().await? {
                let lock = if entry.is_password_protected { " [locked]" } else { "" };
                println!(
                    "{}\t{}{}\t{} bytes\t{}",
                    entry.id,
                    entry.title,
                    lock,
                    entry.size,
                    entry.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Delete { id, password } => {
            let library = Library::new(Arc::clone(&api), &config.share_url);
            library.delete(&id, password.as_deref()).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

fn note_id(input: &str) -> Result<String> {
    parse_note_link(input).context("A note id or link is required")
}

/// Connect to the relay and bundle the shared collaborators.
fn connect(config: &Config, api: Arc<dyn NoteApi>) -> SyncContext {
    let (transport, events) = WsTransport::new(WsConfig::new(&config.socket_url));
    let connection =
        ConnectionManager::new(ConnectionConfig::default(), Arc::new(transport), events);
    connection.start();
    SyncContext {
        cache: Arc::new(NoteCache::new(Arc::clone(&api), CacheConfig::default())),
        api,
        connection,
        pipeline: PipelineConfig::default(),
    }
}

fn report_status(status: &ConnectionStatus) {
    match status {
        ConnectionStatus::Connected => eprintln!("-- connected"),
        ConnectionStatus::Disconnected => eprintln!("-- disconnected"),
        ConnectionStatus::Reconnecting { attempt, delay } => {
            eprintln!("-- reconnecting (attempt {}, in {:?})", attempt, delay)
        }
        ConnectionStatus::MaxAttemptsReached => {
            eprintln!("-- could not reconnect; restart to try again")
        }
    }
}

async fn edit(config: &Config, api: Arc<dyn NoteApi>, id: &str) -> Result<()> {
    let ctx = connect(config, api);
    let _status = ctx.connection.on_status(report_status);
    let mut session = NoteSession::open(&ctx, id, TextSurface::default()).await?;
    println!("{}", session.content());

    let target = id.to_string();
    let _updates = ctx.connection.on_update(move |update| {
        if update.note_id == target {
            println!("<< {}", update.content);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    session.edit(|s| s.set_text(&line));
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Let the last edit go out before leaving.
    while session.phase() != EditPhase::Idle {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    while ctx.connection.has_pending_update() && ctx.connection.connection_status() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("Save status: {:?}", session.save_status());

    session.close();
    ctx.connection.shutdown();
    Ok(())
}

async fn watch(config: &Config, api: Arc<dyn NoteApi>, id: &str) -> Result<()> {
    let ctx = connect(config, api);
    let _status = ctx.connection.on_status(report_status);
    let mut session = NoteSession::open(&ctx, id, TextSurface::default()).await?;
    println!("{}", session.content());

    let target = id.to_string();
    let _updates = ctx.connection.on_update(move |update| {
        if update.note_id == target {
            println!("{}", update.content);
        }
    });

    tokio::signal::ctrl_c().await?;
    session.close();
    ctx.connection.shutdown();
    Ok(())
}
