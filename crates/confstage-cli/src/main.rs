// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::print_stdout, clippy::print_stderr)]
//! confstage CLI
//!
//! Offline inspection of the persisted session store: list sessions, show
//! staged changes, compile a commit batch without sending it, and revert.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use confstage_app_core::config::ConfigService;
use confstage_app_core::prefs::{ClientPrefs, CLIENT_PREFS_KEY};
use confstage_config_fs::FsConfigStore;
use confstage_core::mutator::cancel_all;
use confstage_core::session::{ACTIVE_SESSION_KEY, SESSIONS_KEY};
use confstage_core::{compile_commit, ModificationKind, ModificationRecord, Original, Session, SessionStore};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and revert staged configuration changes")]
struct Args {
    /// Directory holding the persisted client state (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored sessions
    Sessions,
    /// Show staged changes of a session
    Pending {
        /// Session key (defaults to the active session)
        #[arg(long)]
        session: Option<String>,
    },
    /// Compile the staged changes into a commit batch and print it as JSON
    Compile {
        /// Session key (defaults to the active session)
        #[arg(long)]
        session: Option<String>,
    },
    /// Revert staged changes
    Cancel {
        /// Session key (defaults to the active session)
        #[arg(long)]
        session: Option<String>,
        /// Only revert below this node
        #[arg(long)]
        path: Option<String>,
    },
    /// Forget a stored session
    Close {
        /// Session key
        session: String,
    },
    /// Print the client preferences
    Prefs,
    /// Remove all stored sessions
    Reset {
        /// Also remove the client preferences
        #[arg(long)]
        prefs: bool,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    }
    .context("opening config store")?;
    debug!(dir = %store.base().display(), "config store ready");
    let config = ConfigService::new(store);

    match args.cmd {
        Command::Sessions => {
            let sessions = SessionStore::load(&config)?;
            print_sessions(&sessions);
        }
        Command::Pending { session } => {
            let sessions = SessionStore::load(&config)?;
            let session = select(&sessions, session.as_deref())?;
            print_pending(session);
        }
        Command::Compile { session } => {
            let sessions = SessionStore::load(&config)?;
            let session = select(&sessions, session.as_deref())?;
            match compile_commit(session) {
                Ok(batch) => println!("{}", serde_json::to_string_pretty(&batch)?),
                Err(err) if err.is_validation() => {
                    eprintln!("validation failed: {err}");
                    return Ok(ExitCode::FAILURE);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Cancel { session, path } => {
            let mut sessions = SessionStore::load(&config)?;
            let key = select(&sessions, session.as_deref())?.key.clone();
            let target = sessions.require_mut(&key)?;
            let before = target.modifications.len();
            cancel_all(target, path.as_deref(), true)?;
            let reverted = before - target.modifications.len();
            sessions.persist(&config)?;
            info!(session = %key, reverted, "changes reverted");
            println!("reverted {reverted} change(s) in {key}");
        }
        Command::Close { session } => {
            let mut sessions = SessionStore::load(&config)?;
            sessions
                .close(&session)
                .with_context(|| format!("unknown session: {session}"))?;
            sessions.persist(&config)?;
            println!("closed {session}");
        }
        Command::Prefs => {
            let prefs: ClientPrefs = config.load_or_default(CLIENT_PREFS_KEY)?;
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
        Command::Reset { prefs } => {
            config.remove(SESSIONS_KEY)?;
            config.remove(ACTIVE_SESSION_KEY)?;
            if prefs {
                config.remove(CLIENT_PREFS_KEY)?;
            }
            println!("reset");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Session named by `key`, or the active one.
fn select<'a>(sessions: &'a SessionStore, key: Option<&str>) -> Result<&'a Session> {
    match key {
        Some(key) => sessions
            .get(key)
            .with_context(|| format!("unknown session: {key}")),
        None => sessions.active().context("no active session; pass --session"),
    }
}

fn print_sessions(sessions: &SessionStore) {
    if sessions.is_empty() {
        println!("no sessions");
        return;
    }
    let active = sessions.active_key();
    let mut table = Table::new();
    table.set_header(vec!["", "Key", "Device", "Address", "Loaded", "Pending"]);
    for session in sessions.sessions() {
        let marker = if active == Some(session.key.as_str()) { "*" } else { "" };
        let device = &session.device;
        table.add_row(vec![
            marker.to_owned(),
            session.key.clone(),
            device.name.clone(),
            format!("{}@{}:{}", device.username, device.hostname, device.port),
            format!("{:?}", session.data_presence),
            session.modifications.len().to_string(),
        ]);
    }
    println!("{table}");
}

fn print_pending(session: &Session) {
    if session.modifications.is_empty() {
        println!("no staged changes in {}", session.key);
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Path", "Kind", "Detail"]);
    for (path, record) in session.modifications.iter() {
        let kind = record
            .kind
            .map_or_else(|| "-".to_owned(), |k| format!("{k:?}").to_lowercase());
        table.add_row(vec![path.clone(), kind, detail(record)]);
    }
    println!("{table}");
}

fn detail(record: &ModificationRecord) -> String {
    match record.kind {
        Some(ModificationKind::Change) => {
            let was = match &record.original {
                Some(Original::Value(Some(v))) => v.as_str(),
                _ => "",
            };
            format!("{was:?} -> {:?}", record.value.as_deref().unwrap_or_default())
        }
        Some(ModificationKind::Reorder) => record
            .reorder
            .as_ref()
            .map(|r| format!("{r:?}"))
            .unwrap_or_default(),
        Some(ModificationKind::Create | ModificationKind::Replace) => {
            record.data.clone().unwrap_or_default()
        }
        Some(ModificationKind::Delete) | None => String::new(),
    }
}
