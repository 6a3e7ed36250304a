//! Folder repository implementation

use libsql::{params, Connection, Row};

use super::row::{integer, nullable, opt_integer, text};
use crate::error::{Error, Result};
use crate::models::{Folder, FolderId, UserId};
use crate::util::unix_millis_now;

const FOLDER_COLUMNS: &str =
    "id, owner_id, name, color, sort_order, created_at, updated_at, deleted_at, sync_status";

/// Trait for user-facing folder operations (async)
///
/// Every call is scoped by owner and tombstones are never returned.
#[allow(async_fn_in_trait)]
pub trait FolderRepository {
    /// Create a new folder
    async fn create(&self, owner: &UserId, name: &str) -> Result<Folder>;

    /// Get a folder by ID
    async fn get(&self, owner: &UserId, id: &FolderId) -> Result<Option<Folder>>;

    /// List folders in display order
    async fn list(&self, owner: &UserId) -> Result<Vec<Folder>>;

    /// Rename and recolor a folder
    async fn update(
        &self,
        owner: &UserId,
        id: &FolderId,
        name: &str,
        color: &str,
    ) -> Result<Folder>;

    /// Soft delete a folder, detaching its notes
    async fn delete(&self, owner: &UserId, id: &FolderId) -> Result<()>;

    /// Return the default folder, creating it if missing
    async fn ensure_default(&self, owner: &UserId) -> Result<Folder>;
}

/// libSQL implementation of `FolderRepository`
pub struct LibSqlFolderRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlFolderRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a folder from a database row
    fn parse_folder(row: &Row) -> Result<Folder> {
        let id = text(row, 0)?;
        Ok(Folder {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid folder id '{id}'")))?,
            owner_id: UserId::new(text(row, 1)?),
            name: text(row, 2)?,
            color: text(row, 3)?,
            sort_order: integer(row, 4)?,
            created_at: integer(row, 5)?,
            updated_at: integer(row, 6)?,
            deleted_at: opt_integer(row, 7)?,
            sync_status: text(row, 8)?.parse()?,
        })
    }

    async fn query_folders(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Folder>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut folders = Vec::new();
        while let Some(row) = rows.next().await? {
            folders.push(Self::parse_folder(&row)?);
        }
        Ok(folders)
    }

    /// Look up a folder by ID, tombstones included
    pub async fn find_any(&self, owner: &UserId, id: &str) -> Result<Option<Folder>> {
        let folders = self
            .query_folders(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE owner_id = ? AND id = ?"),
                params![owner.as_str(), id],
            )
            .await?;
        Ok(folders.into_iter().next())
    }

    /// Folders with local changes not yet accepted remotely
    pub async fn pending(&self, owner: &UserId) -> Result<Vec<Folder>> {
        self.query_folders(
            &format!(
                "SELECT {FOLDER_COLUMNS} FROM folders
                 WHERE owner_id = ? AND sync_status != 'synced'
                 ORDER BY created_at ASC, id ASC"
            ),
            params![owner.as_str()],
        )
        .await
    }

    /// Insert or fully overwrite a folder keyed by ID
    pub async fn save(&self, folder: &Folder) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO folders (id, owner_id, name, color, sort_order, created_at, updated_at, deleted_at, sync_status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    color = excluded.color,
                    sort_order = excluded.sort_order,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at,
                    sync_status = excluded.sync_status
                 WHERE folders.owner_id = excluded.owner_id",
                params![
                    folder.id.as_str(),
                    folder.owner_id.as_str(),
                    folder.name.as_str(),
                    folder.color.as_str(),
                    folder.sort_order,
                    folder.created_at,
                    folder.updated_at,
                    nullable(folder.deleted_at),
                    folder.sync_status.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    /// Soft delete a folder and detach its notes
    async fn tombstone(&self, owner: &UserId, id: &FolderId) -> Result<()> {
        let now = unix_millis_now();
        self.conn
            .execute(
                "UPDATE folders SET deleted_at = ?, updated_at = ?, sync_status = 'pending'
                 WHERE owner_id = ? AND id = ?",
                params![now, now, owner.as_str(), id.as_str()],
            )
            .await?;

        // Weak reference: notes survive their folder
        self.conn
            .execute(
                "UPDATE notes SET folder_id = NULL, updated_at = ?, sync_status = 'pending'
                 WHERE owner_id = ? AND folder_id = ?",
                params![now, owner.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Flag a folder as accepted by the remote store
    pub async fn mark_synced(&self, owner: &UserId, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE folders SET sync_status = 'synced' WHERE owner_id = ? AND id = ?",
                params![owner.as_str(), id],
            )
            .await?;
        Ok(())
    }

    /// Tombstones whose deletion already reached the remote store
    pub async fn confirmed_tombstones(&self, owner: &UserId) -> Result<Vec<Folder>> {
        self.query_folders(
            &format!(
                "SELECT {FOLDER_COLUMNS} FROM folders
                 WHERE owner_id = ? AND deleted_at IS NOT NULL AND sync_status = 'synced'"
            ),
            params![owner.as_str()],
        )
        .await
    }

    /// Physically remove a folder row
    pub async fn purge(&self, owner: &UserId, id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM folders WHERE owner_id = ? AND id = ?",
                params![owner.as_str(), id],
            )
            .await?;
        Ok(())
    }

    /// Remove tombstones deleted before `cutoff` (Unix ms)
    pub async fn purge_expired(&self, owner: &UserId, cutoff: i64) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM folders WHERE owner_id = ? AND deleted_at IS NOT NULL AND deleted_at < ?",
                params![owner.as_str(), cutoff],
            )
            .await?;
        Ok(removed)
    }

    /// Live folders carrying the default name, oldest first
    pub async fn default_candidates(&self, owner: &UserId, name: &str) -> Result<Vec<Folder>> {
        self.query_folders(
            &format!(
                "SELECT {FOLDER_COLUMNS} FROM folders
                 WHERE owner_id = ? AND name = ? AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ),
            params![owner.as_str(), name],
        )
        .await
    }

    /// Create the named default folder if no live one exists
    pub async fn ensure_named_default(&self, owner: &UserId, name: &str) -> Result<Folder> {
        if let Some(existing) = self.default_candidates(owner, name).await?.into_iter().next() {
            return Ok(existing);
        }
        let folder = Folder::new(owner.clone(), name);
        self.save(&folder).await?;
        tracing::debug!("Created default folder {} for {}", folder.id, owner);
        Ok(folder)
    }
}

impl FolderRepository for LibSqlFolderRepository<'_> {
    async fn create(&self, owner: &UserId, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Folder name cannot be empty".into()));
        }
        let mut folder = Folder::new(owner.clone(), name);
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM folders WHERE owner_id = ? AND deleted_at IS NULL",
                params![owner.as_str()],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            folder.sort_order = integer(&row, 0)?;
        }
        self.save(&folder).await?;
        Ok(folder)
    }

    async fn get(&self, owner: &UserId, id: &FolderId) -> Result<Option<Folder>> {
        Ok(self
            .find_any(owner, &id.as_str())
            .await?
            .filter(|folder| !folder.is_deleted()))
    }

    async fn list(&self, owner: &UserId) -> Result<Vec<Folder>> {
        self.query_folders(
            &format!(
                "SELECT {FOLDER_COLUMNS} FROM folders
                 WHERE owner_id = ? AND deleted_at IS NULL
                 ORDER BY sort_order ASC, name ASC"
            ),
            params![owner.as_str()],
        )
        .await
    }

    async fn update(
        &self,
        owner: &UserId,
        id: &FolderId,
        name: &str,
        color: &str,
    ) -> Result<Folder> {
        let now = unix_millis_now();
        let rows = self
            .conn
            .execute(
                "UPDATE folders SET name = ?, color = ?, updated_at = ?, sync_status = 'pending'
                 WHERE owner_id = ? AND id = ? AND deleted_at IS NULL",
                params![name.trim(), color.trim(), now, owner.as_str(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn delete(&self, owner: &UserId, id: &FolderId) -> Result<()> {
        let Some(folder) = self.get(owner, id).await? else {
            return Err(Error::NotFound(id.to_string()));
        };
        if folder.is_default() {
            return Err(Error::InvalidInput(
                "The default folder cannot be deleted".into(),
            ));
        }

        // The tombstone and the detached notes land together or not at all
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        if let Err(error) = self.tombstone(owner, id).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error);
        }
        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }

        Ok(())
    }

    async fn ensure_default(&self, owner: &UserId) -> Result<Folder> {
        self.ensure_named_default(owner, Folder::DEFAULT_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlNoteRepository, NoteRepository};
    use crate::models::SyncStatus;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn owner() -> UserId {
        UserId::new("user-1")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_list() {
        let db = setup().await;
        let repo = LibSqlFolderRepository::new(db.connection());

        let work = repo.create(&owner(), "Work").await.unwrap();
        let home = repo.create(&owner(), "Home").await.unwrap();
        assert_eq!(work.sort_order, 0);
        assert_eq!(home.sort_order, 1);

        let folders = repo.list(&owner()).await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Work", "Home"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_owner_scoping() {
        let db = setup().await;
        let repo = LibSqlFolderRepository::new(db.connection());

        let folder = repo.create(&owner(), "Private").await.unwrap();
        let intruder = UserId::new("user-2");

        assert!(repo.get(&intruder, &folder.id).await.unwrap().is_none());
        assert!(repo.list(&intruder).await.unwrap().is_empty());
        assert!(repo.delete(&intruder, &folder.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_soft_and_detaches_notes() {
        let db = setup().await;
        let folders = LibSqlFolderRepository::new(db.connection());
        let notes = LibSqlNoteRepository::new(db.connection());

        let folder = folders.create(&owner(), "Trips").await.unwrap();
        let note = notes
            .create(&owner(), "Packing list", Some(folder.id))
            .await
            .unwrap();

        folders.delete(&owner(), &folder.id).await.unwrap();

        assert!(folders.get(&owner(), &folder.id).await.unwrap().is_none());
        let tombstone = folders
            .find_any(&owner(), &folder.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.deleted_at.is_some());
        assert_eq!(tombstone.sync_status, SyncStatus::Pending);

        let detached = notes.get(&owner(), &note.id).await.unwrap().unwrap();
        assert!(detached.folder_id.is_none());
        assert_eq!(detached.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_detach_keeps_the_folder() {
        let db = setup().await;
        let folders = LibSqlFolderRepository::new(db.connection());
        let notes = LibSqlNoteRepository::new(db.connection());

        let folder = folders.create(&owner(), "Trips").await.unwrap();
        let note = notes
            .create(&owner(), "Packing list", Some(folder.id))
            .await
            .unwrap();
        db.connection()
            .execute(
                "CREATE TRIGGER reject_detach BEFORE UPDATE OF folder_id ON notes
                 BEGIN SELECT RAISE(ABORT, 'detach rejected'); END",
                (),
            )
            .await
            .unwrap();

        assert!(folders.delete(&owner(), &folder.id).await.is_err());

        let kept = folders.get(&owner(), &folder.id).await.unwrap().unwrap();
        assert!(kept.deleted_at.is_none());
        let attached = notes.get(&owner(), &note.id).await.unwrap().unwrap();
        assert_eq!(attached.folder_id, Some(folder.id));

        // The connection is usable again once the failed delete rolled back.
        folders.create(&owner(), "Later").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_default_folder_is_unique_and_protected() {
        let db = setup().await;
        let repo = LibSqlFolderRepository::new(db.connection());

        let first = repo.ensure_default(&owner()).await.unwrap();
        let second = repo.ensure_default(&owner()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(repo.delete(&owner(), &first.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_marks_pending() {
        let db = setup().await;
        let repo = LibSqlFolderRepository::new(db.connection());

        let mut folder = repo.create(&owner(), "Old").await.unwrap();
        folder.sync_status = SyncStatus::Synced;
        repo.save(&folder).await.unwrap();

        let updated = repo
            .update(&owner(), &folder.id, "New", "#FF0000")
            .await
            .unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.color, "#FF0000");
        assert_eq!(updated.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_side_queries() {
        let db = setup().await;
        let repo = LibSqlFolderRepository::new(db.connection());

        let kept = repo.create(&owner(), "Kept").await.unwrap();
        let gone = repo.create(&owner(), "Gone").await.unwrap();
        assert_eq!(repo.pending(&owner()).await.unwrap().len(), 2);

        repo.mark_synced(&owner(), &kept.id.as_str()).await.unwrap();
        assert_eq!(repo.pending(&owner()).await.unwrap().len(), 1);

        repo.delete(&owner(), &gone.id).await.unwrap();
        assert!(repo.confirmed_tombstones(&owner()).await.unwrap().is_empty());

        repo.mark_synced(&owner(), &gone.id.as_str()).await.unwrap();
        let confirmed = repo.confirmed_tombstones(&owner()).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, gone.id);

        repo.purge(&owner(), &gone.id.as_str()).await.unwrap();
        assert!(repo
            .find_any(&owner(), &gone.id.as_str())
            .await
            .unwrap()
            .is_none());
    }
}
