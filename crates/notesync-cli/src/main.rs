//! notesync CLI - run and inspect note sync from the terminal

mod auth;
mod cli;
mod commands;
mod config;
mod error;

use std::time::Duration;

use clap::Parser;
use notesync_core::SyncOptions;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SessionCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::list::{run_folders, run_notes};
use crate::commands::session::{run_session_clear, run_session_set, run_session_show, SessionInput};
use crate::commands::status::run_status;
use crate::commands::sync::{run_conflicts, run_sync, run_watch};
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notesync=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).map_err(CliError::Config)?;
    let db_path = resolve_db_path(cli.db_path, &config)?;

    match cli.command {
        Commands::Sync {
            metadata_only,
            upload_only,
            timeout,
            json,
        } => {
            let options = SyncOptions {
                include_binary_data: !metadata_only,
                two_way: !upload_only,
            };
            let timeout = timeout.map(Duration::from_secs);
            run_sync(&config, &db_path, options, timeout, json).await?;
        }
        Commands::Watch {
            interval,
            metadata_only,
        } => {
            let options = SyncOptions {
                include_binary_data: !metadata_only,
                two_way: true,
            };
            let interval = Duration::from_secs(interval.max(1));
            run_watch(&config, &db_path, interval, options).await?;
        }
        Commands::Status => run_status(&config, &db_path).await?,
        Commands::Folders { json } => run_folders(&config, &db_path, json).await?,
        Commands::Notes {
            folder,
            limit,
            json,
        } => run_notes(&config, &db_path, folder.as_deref(), limit, json).await?,
        Commands::Conflicts { limit, json } => run_conflicts(&config, &db_path, limit, json).await?,
        Commands::Session { command } => match command {
            SessionCommands::Set {
                user_id,
                email,
                access_token,
                refresh_token,
                expires_at,
            } => run_session_set(
                &config,
                SessionInput {
                    user_id,
                    email,
                    access_token,
                    refresh_token,
                    expires_at,
                },
            )?,
            SessionCommands::Show => run_session_show(&config)?,
            SessionCommands::Clear => run_session_clear(&config).await?,
        },
    }

    Ok(())
}
