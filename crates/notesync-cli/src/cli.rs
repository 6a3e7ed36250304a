use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Sync notes and folders with a remote store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync pass
    Sync {
        /// Skip note payloads and sync metadata only
        #[arg(long)]
        metadata_only: bool,
        /// Push local changes without downloading
        #[arg(long)]
        upload_only: bool,
        /// Abandon the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync periodically until interrupted
    Watch {
        /// Seconds between sync passes
        #[arg(short, long, default_value = "300")]
        interval: u64,
        /// Skip note payloads and sync metadata only
        #[arg(long)]
        metadata_only: bool,
    },
    /// Show session, pending changes and last sync time
    Status,
    /// List folders
    Folders {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent notes
    Notes {
        /// Only notes in this folder
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the stored session
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Store a session obtained from the auth provider
    Set {
        /// Account user id
        #[arg(long, value_name = "ID")]
        user_id: String,
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
        /// Access token (JWT)
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
        /// Refresh token
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
        /// Access token expiry as Unix seconds
        #[arg(long, value_name = "SECS")]
        expires_at: i64,
    },
    /// Show the stored session
    Show,
    /// Sign out and clear the stored session
    Clear,
}
