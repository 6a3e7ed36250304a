//! Local store for notesync

mod conflict_repository;
mod connection;
mod folder_repository;
mod migrations;
mod note_repository;
mod row;
mod settings_repository;

pub use conflict_repository::LibSqlConflictRepository;
pub use connection::Database;
pub use folder_repository::{FolderRepository, LibSqlFolderRepository};
pub use note_repository::{LibSqlNoteRepository, NoteRepository};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
