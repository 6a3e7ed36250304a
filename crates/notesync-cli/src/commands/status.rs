use std::path::Path;

use chrono::Utc;
use notesync_core::db::{
    LibSqlConflictRepository, LibSqlFolderRepository, LibSqlNoteRepository,
    LibSqlSettingsRepository, SettingsRepository,
};
use notesync_core::models::UserId;

use crate::auth::load_stored_session;
use crate::commands::common::{format_relative_time, format_sync_timestamp, open_database};
use crate::config::CliConfig;
use crate::error::CliError;

/// Recent conflicts worth surfacing in the status summary.
const STATUS_CONFLICT_WINDOW: usize = 100;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LocalStatus {
    pub pending_folders: usize,
    pub pending_notes: usize,
    pub last_sync_at: Option<i64>,
    pub recent_conflicts: usize,
}

pub async fn local_status(db_path: &Path, owner: &UserId) -> Result<LocalStatus, CliError> {
    let database = open_database(db_path).await?;
    let conn = database.connection();

    Ok(LocalStatus {
        pending_folders: LibSqlFolderRepository::new(conn).pending(owner).await?.len(),
        pending_notes: LibSqlNoteRepository::new(conn).pending(owner).await?.len(),
        last_sync_at: LibSqlSettingsRepository::new(conn).last_sync_at(owner).await?,
        recent_conflicts: LibSqlConflictRepository::new(conn)
            .list(owner, STATUS_CONFLICT_WINDOW)
            .await?
            .len(),
    })
}

pub async fn run_status(config: &CliConfig, db_path: &Path) -> Result<(), CliError> {
    println!("Database: {}", db_path.display());

    if !config.remote.is_configured() {
        println!("Remote:   not configured");
        return Ok(());
    }
    println!(
        "Remote:   {}",
        config.remote.rest_url.as_deref().unwrap_or_default()
    );

    let Some(session) = load_stored_session(&config.remote)? else {
        println!("Session:  signed out");
        return Ok(());
    };

    let expiry = format_sync_timestamp(session.expires_at.saturating_mul(1000));
    let state = if session.is_expired() {
        "refresh due"
    } else {
        "valid"
    };
    match session.user.email.as_deref() {
        Some(email) => println!("Session:  {} <{}>", session.user.id, email),
        None => println!("Session:  {}", session.user.id),
    }
    println!("Token:    {state}, expires {expiry}");

    let owner = UserId::new(session.user.id);
    let status = local_status(db_path, &owner).await?;
    let last_sync = status.last_sync_at.map_or_else(
        || "never".to_string(),
        |at| {
            format!(
                "{} ({})",
                format_sync_timestamp(at),
                format_relative_time(at, Utc::now().timestamp_millis())
            )
        },
    );
    println!("Last sync: {last_sync}");
    println!(
        "Pending:  {} folders, {} notes",
        status.pending_folders, status.pending_notes
    );
    println!("Conflicts: {} recent", status.recent_conflicts);
    Ok(())
}
