//! Data models for notesync

mod folder;
mod note;
mod sync_conflict;
mod sync_status;
mod user;

pub use folder::{Folder, FolderId};
pub use note::{Note, NoteId};
pub use sync_conflict::SyncConflict;
pub use sync_status::{ProcessingStatus, SyncStatus};
pub use user::UserId;
