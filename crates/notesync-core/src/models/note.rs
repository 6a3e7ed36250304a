//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{FolderId, ProcessingStatus, SyncStatus, UserId};

/// A unique identifier for a note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A note in the system
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier, never reassigned
    pub id: NoteId,
    /// User that owns this note
    pub owner_id: UserId,
    /// Note title
    pub title: String,
    /// Containing folder; a weak reference nulled when the folder goes away
    pub folder_id: Option<FolderId>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), the LWW tie-breaker
    pub updated_at: i64,
    /// Soft delete marker (Unix ms)
    pub deleted_at: Option<i64>,
    /// Imported source content
    pub original_content: Option<Vec<u8>>,
    /// Generated content derived from the source
    pub ai_content: Option<Vec<u8>>,
    /// Content pipeline state
    pub processing_status: ProcessingStatus,
    /// Local sync bookkeeping
    pub sync_status: SyncStatus,
}

impl Note {
    /// Create a new pending note
    #[must_use]
    pub fn new(owner_id: UserId, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: NoteId::new(),
            owner_id,
            title: title.into(),
            folder_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            original_content: None,
            ai_content: None,
            processing_status: ProcessingStatus::Pending,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Place the note in a folder
    #[must_use]
    pub const fn in_folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Get the title truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title.trim().chars().take(max_len).collect()
    }
}

// Payloads can be megabytes; print sizes instead of bytes.
impl fmt::Debug for Note {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Note")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("title", &self.title)
            .field("folder_id", &self.folder_id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("deleted_at", &self.deleted_at)
            .field("original_content", &self.original_content.as_ref().map(Vec::len))
            .field("ai_content", &self.ai_content.as_ref().map(Vec::len))
            .field("processing_status", &self.processing_status)
            .field("sync_status", &self.sync_status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse() {
        let id = NoteId::new();
        let parsed: NoteId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_note_new() {
        let note = Note::new(UserId::new("user-1"), "Groceries");
        assert_eq!(note.title, "Groceries");
        assert!(!note.is_deleted());
        assert!(note.folder_id.is_none());
        assert_eq!(note.sync_status, SyncStatus::Pending);
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_title_preview() {
        let note = Note::new(UserId::new("user-1"), "  A rather long title  ");
        assert_eq!(note.title_preview(8), "A rather");
    }

    #[test]
    fn test_debug_omits_payload_bytes() {
        let mut note = Note::new(UserId::new("user-1"), "Audio");
        note.original_content = Some(vec![7; 4096]);
        let rendered = format!("{note:?}");
        assert!(rendered.contains("4096"));
        assert!(!rendered.contains("7, 7, 7"));
    }
}
