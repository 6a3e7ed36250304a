use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use notesync_core::db::Database;
use notesync_core::models::{Folder, Note, SyncConflict, UserId};
use serde::Serialize;

use crate::auth::load_stored_session;
use crate::config::CliConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct FolderListItem {
    pub id: String,
    pub name: String,
    pub color: String,
    pub updated_at: i64,
    pub sync_status: String,
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub folder_id: Option<String>,
    pub updated_at: i64,
    pub relative_time: String,
    pub processing_status: String,
    pub sync_status: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// Flag, then `NOTESYNC_DB_PATH`, then the config file, then the data dir.
pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    config: &CliConfig,
) -> Result<PathBuf, CliError> {
    cli_db_path
        .or_else(|| env::var_os("NOTESYNC_DB_PATH").map(PathBuf::from))
        .or_else(|| config.database_path.clone())
        .or_else(default_db_path)
        .ok_or_else(|| {
            CliError::Config("Failed to resolve a data directory for the database".into())
        })
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("notesync").join("notesync.db"))
}

pub async fn open_database(path: &Path) -> Result<Database, CliError> {
    Ok(Database::open(path).await?)
}

/// Owner of local data according to the stored session.
pub fn stored_owner(config: &CliConfig) -> Result<UserId, CliError> {
    load_stored_session(&config.remote)?
        .map(|session| UserId::new(session.user.id))
        .ok_or(CliError::NotSignedIn)
}

pub fn folder_to_list_item(folder: &Folder) -> FolderListItem {
    FolderListItem {
        id: folder.id.to_string(),
        name: folder.name.clone(),
        color: folder.color.clone(),
        updated_at: folder.updated_at,
        sync_status: folder.sync_status.as_str().to_string(),
    }
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        folder_id: note.folder_id.map(|id| id.to_string()),
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
        processing_status: note.processing_status.as_str().to_string(),
        sync_status: note.sync_status.as_str().to_string(),
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity: conflict.entity.clone(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_folder_lines(folders: &[Folder]) -> Vec<String> {
    folders
        .iter()
        .map(|folder| {
            format!(
                "{:<13}  {:<30}  {}",
                short_id(&folder.id.to_string()),
                folder.name,
                folder.sync_status.as_str()
            )
        })
        .collect()
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = short_id(&note.id.to_string());
            let preview = note.title_preview(40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            format!(
                "{id:<13}  {preview:<40}  {relative_time:<10}  {}",
                note.sync_status.as_str()
            )
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entity,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
