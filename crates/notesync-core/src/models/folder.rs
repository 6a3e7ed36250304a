//! Folder model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{SyncStatus, UserId};

/// A unique identifier for a folder, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId(Uuid);

impl FolderId {
    /// Create a new unique folder ID using UUID v7
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

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A folder grouping notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Unique identifier, never reassigned
    pub id: FolderId,
    /// User that owns this folder
    pub owner_id: UserId,
    /// Display name
    pub name: String,
    /// Display color (hex string)
    pub color: String,
    /// Position in the folder list
    pub sort_order: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms), the LWW tie-breaker
    pub updated_at: i64,
    /// Soft delete marker (Unix ms)
    pub deleted_at: Option<i64>,
    /// Local sync bookkeeping
    pub sync_status: SyncStatus,
}

impl Folder {
    /// Name of the well-known default folder
    pub const DEFAULT_NAME: &'static str = "All Notes";

    /// Default display color
    pub const DEFAULT_COLOR: &'static str = "#8E8E93";

    /// Create a new pending folder
    #[must_use]
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: FolderId::new(),
            owner_id,
            name: name.into(),
            color: Self::DEFAULT_COLOR.to_string(),
            sort_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Create the default "All Notes" folder for an owner
    #[must_use]
    pub fn default_for(owner_id: UserId) -> Self {
        Self::new(owner_id, Self::DEFAULT_NAME)
    }

    pub fn is_default(&self) -> bool {
        self.name == Self::DEFAULT_NAME
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_new_is_pending() {
        let folder = Folder::new(UserId::new("user-1"), "Work");
        assert_eq!(folder.name, "Work");
        assert_eq!(folder.sync_status, SyncStatus::Pending);
        assert_eq!(folder.created_at, folder.updated_at);
        assert!(!folder.is_deleted());
        assert!(!folder.is_default());
    }

    #[test]
    fn test_default_folder() {
        let folder = Folder::default_for(UserId::new("user-1"));
        assert!(folder.is_default());
        assert_eq!(folder.name, "All Notes");
    }

    #[test]
    fn test_folder_id_parse() {
        let id = FolderId::new();
        let parsed: FolderId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
