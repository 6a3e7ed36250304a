use std::path::Path;

use notesync_core::db::{
    FolderRepository, LibSqlFolderRepository, LibSqlNoteRepository, NoteRepository,
};
use notesync_core::models::FolderId;

use crate::commands::common::{
    folder_to_list_item, format_folder_lines, format_note_lines, note_to_list_item,
    open_database, stored_owner, FolderListItem, NoteListItem,
};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_folders(
    config: &CliConfig,
    db_path: &Path,
    as_json: bool,
) -> Result<(), CliError> {
    let owner = stored_owner(config)?;
    let database = open_database(db_path).await?;
    let folders = LibSqlFolderRepository::new(database.connection())
        .list(&owner)
        .await?;

    if as_json {
        let json_items = folders
            .iter()
            .map(folder_to_list_item)
            .collect::<Vec<FolderListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if folders.is_empty() {
        println!("No folders.");
    } else {
        for line in format_folder_lines(&folders) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_notes(
    config: &CliConfig,
    db_path: &Path,
    folder: Option<&str>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let folder = folder
        .map(|raw| {
            raw.trim()
                .parse::<FolderId>()
                .map_err(|_| CliError::InvalidFolderId(raw.to_string()))
        })
        .transpose()?;

    let owner = stored_owner(config)?;
    let database = open_database(db_path).await?;
    let notes = LibSqlNoteRepository::new(database.connection());
    let notes = match folder {
        Some(folder) => notes.list_in_folder(&owner, &folder, limit, 0).await?,
        None => notes.list(&owner, limit, 0).await?,
    };

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
