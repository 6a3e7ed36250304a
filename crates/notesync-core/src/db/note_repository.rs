//! Note repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::{params, Connection, Row};

use super::row::{integer, nullable, opt_blob, opt_integer, opt_text, text};
use crate::error::{Error, Result};
use crate::models::{FolderId, Note, NoteId, ProcessingStatus, SyncStatus, UserId};
use crate::util::unix_millis_now;

const NOTE_COLUMNS: &str = "id, owner_id, title, folder_id, created_at, updated_at, deleted_at, \
     original_content, ai_content, processing_status, sync_status";

/// Trait for user-facing note operations (async)
///
/// Every call is scoped by owner and tombstones are never returned.
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Create a new note, optionally inside a folder
    async fn create(
        &self,
        owner: &UserId,
        title: &str,
        folder: Option<FolderId>,
    ) -> Result<Note>;

    /// Get a note by ID
    async fn get(&self, owner: &UserId, id: &NoteId) -> Result<Option<Note>>;

    /// List notes, most recently updated first
    async fn list(&self, owner: &UserId, limit: usize, offset: usize) -> Result<Vec<Note>>;

    /// List notes inside one folder
    async fn list_in_folder(
        &self,
        owner: &UserId,
        folder: &FolderId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Note>>;

    /// Change a note's title
    async fn rename(&self, owner: &UserId, id: &NoteId, title: &str) -> Result<Note>;

    /// Move a note to another folder, or out of any folder
    async fn move_to(
        &self,
        owner: &UserId,
        id: &NoteId,
        folder: Option<FolderId>,
    ) -> Result<Note>;

    /// Replace a note's payloads and processing state
    async fn set_content(
        &self,
        owner: &UserId,
        id: &NoteId,
        original: Option<Vec<u8>>,
        generated: Option<Vec<u8>>,
        status: ProcessingStatus,
    ) -> Result<Note>;

    /// Soft delete a note
    async fn delete(&self, owner: &UserId, id: &NoteId) -> Result<()>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row
    fn parse_note(row: &Row) -> Result<Note> {
        let id = text(row, 0)?;
        let folder_id = opt_text(row, 3)?
            .map(|raw| {
                raw.parse::<FolderId>()
                    .map_err(|_| Error::Database(format!("invalid folder id '{raw}'")))
            })
            .transpose()?;
        Ok(Note {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid note id '{id}'")))?,
            owner_id: UserId::new(text(row, 1)?),
            title: text(row, 2)?,
            folder_id,
            created_at: integer(row, 4)?,
            updated_at: integer(row, 5)?,
            deleted_at: opt_integer(row, 6)?,
            original_content: opt_blob(row, 7)?,
            ai_content: opt_blob(row, 8)?,
            processing_status: text(row, 9)?.parse()?,
            sync_status: text(row, 10)?.parse()?,
        })
    }

    async fn query_notes(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Note>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }

    /// Check that a folder exists, is live and belongs to `owner`
    async fn ensure_folder_usable(&self, owner: &UserId, folder: &FolderId) -> Result<()> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM folders WHERE owner_id = ? AND id = ? AND deleted_at IS NULL",
                params![owner.as_str(), folder.as_str()],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => integer(&row, 0)?,
            None => 0,
        };
        if count == 0 {
            return Err(Error::Validation(format!(
                "folder {folder} does not exist for this user"
            )));
        }
        Ok(())
    }

    /// Look up a note by ID, tombstones included
    pub async fn find_any(&self, owner: &UserId, id: &str) -> Result<Option<Note>> {
        let notes = self
            .query_notes(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE owner_id = ? AND id = ?"),
                params![owner.as_str(), id],
            )
            .await?;
        Ok(notes.into_iter().next())
    }

    /// Notes to push in a sync pass: every pending note, plus synced notes
    /// whose payloads an earlier pass held back when `with_payloads` is set
    pub async fn upload_candidates(
        &self,
        owner: &UserId,
        with_payloads: bool,
    ) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND (sync_status != 'synced' OR (? AND payload_pending = 1))
                 ORDER BY created_at ASC, id ASC"
            ),
            params![owner.as_str(), i64::from(with_payloads)],
        )
        .await
    }

    /// Notes with local changes not yet accepted remotely
    pub async fn pending(&self, owner: &UserId) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND sync_status != 'synced'
                 ORDER BY created_at ASC, id ASC"
            ),
            params![owner.as_str()],
        )
        .await
    }

    /// Insert or fully overwrite a note keyed by ID
    pub async fn save(&self, note: &Note) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notes (id, owner_id, title, folder_id, created_at, updated_at, deleted_at,
                                    original_content, ai_content, processing_status, sync_status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    folder_id = excluded.folder_id,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    deleted_at = excluded.deleted_at,
                    original_content = excluded.original_content,
                    ai_content = excluded.ai_content,
                    processing_status = excluded.processing_status,
                    sync_status = excluded.sync_status
                 WHERE notes.owner_id = excluded.owner_id",
                params![
                    note.id.as_str(),
                    note.owner_id.as_str(),
                    note.title.as_str(),
                    nullable(note.folder_id.map(|id| id.as_str())),
                    note.created_at,
                    note.updated_at,
                    nullable(note.deleted_at),
                    nullable(note.original_content.clone()),
                    nullable(note.ai_content.clone()),
                    note.processing_status.as_str(),
                    note.sync_status.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    /// Flag a note as accepted by the remote store. `payload_pending` keeps
    /// it queued until a pass uploads its payloads.
    pub async fn mark_uploaded(
        &self,
        owner: &UserId,
        id: &str,
        payload_pending: bool,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notes SET sync_status = 'synced', payload_pending = ?
                 WHERE owner_id = ? AND id = ?",
                params![i64::from(payload_pending), owner.as_str(), id],
            )
            .await?;
        Ok(())
    }

    /// Record a note written from a remote row. `payload_stale` means the
    /// remote payloads were not pulled.
    pub async fn mark_downloaded(
        &self,
        owner: &UserId,
        id: &str,
        payload_stale: bool,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notes SET payload_pending = 0, payload_stale = ?
                 WHERE owner_id = ? AND id = ?",
                params![i64::from(payload_stale), owner.as_str(), id],
            )
            .await?;
        Ok(())
    }

    /// Whether the remote store holds newer payloads than this note
    pub async fn payload_stale(&self, owner: &UserId, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload_stale FROM notes WHERE owner_id = ? AND id = ?",
                params![owner.as_str(), id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(integer(&row, 0)? != 0),
            None => Ok(false),
        }
    }

    /// Tombstones whose deletion already reached the remote store
    pub async fn confirmed_tombstones(&self, owner: &UserId) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND deleted_at IS NOT NULL AND sync_status = 'synced'"
            ),
            params![owner.as_str()],
        )
        .await
    }

    /// Physically remove a note row
    pub async fn purge(&self, owner: &UserId, id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM notes WHERE owner_id = ? AND id = ?",
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
                "DELETE FROM notes WHERE owner_id = ? AND deleted_at IS NOT NULL AND deleted_at < ?",
                params![owner.as_str(), cutoff],
            )
            .await?;
        Ok(removed)
    }

    /// Point every note of folder `from` at folder `to`
    pub async fn reassign_folder(&self, owner: &UserId, from: &str, to: &str) -> Result<u64> {
        let moved = self
            .conn
            .execute(
                "UPDATE notes SET folder_id = ?, updated_at = ?, sync_status = 'pending'
                 WHERE owner_id = ? AND folder_id = ?",
                params![to, unix_millis_now(), owner.as_str(), from],
            )
            .await?;
        Ok(moved)
    }

    /// Null out folder references that no longer resolve to a live folder
    pub async fn detach_orphans(&self, owner: &UserId) -> Result<u64> {
        let detached = self
            .conn
            .execute(
                "UPDATE notes SET folder_id = NULL, updated_at = ?, sync_status = 'pending'
                 WHERE owner_id = ? AND deleted_at IS NULL AND folder_id IS NOT NULL
                   AND folder_id NOT IN (
                       SELECT id FROM folders WHERE owner_id = ? AND deleted_at IS NULL
                   )",
                params![unix_millis_now(), owner.as_str(), owner.as_str()],
            )
            .await?;
        Ok(detached)
    }

    async fn touch(
        &self,
        owner: &UserId,
        id: &NoteId,
        assignments: &str,
        value: libsql::Value,
    ) -> Result<Note> {
        let now = unix_millis_now();
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE notes SET {assignments}, updated_at = ?, sync_status = 'pending'
                     WHERE owner_id = ? AND id = ? AND deleted_at IS NULL"
                ),
                params![value, now, owner.as_str(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn create(
        &self,
        owner: &UserId,
        title: &str,
        folder: Option<FolderId>,
    ) -> Result<Note> {
        if let Some(folder) = &folder {
            self.ensure_folder_usable(owner, folder).await?;
        }
        let mut note = Note::new(owner.clone(), title.trim());
        note.folder_id = folder;
        self.save(&note).await?;
        Ok(note)
    }

    async fn get(&self, owner: &UserId, id: &NoteId) -> Result<Option<Note>> {
        Ok(self
            .find_any(owner, &id.as_str())
            .await?
            .filter(|note| !note.is_deleted()))
    }

    async fn list(&self, owner: &UserId, limit: usize, offset: usize) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND deleted_at IS NULL
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![owner.as_str(), limit as i64, offset as i64],
        )
        .await
    }

    async fn list_in_folder(
        &self,
        owner: &UserId,
        folder: &FolderId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND folder_id = ? AND deleted_at IS NULL
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![owner.as_str(), folder.as_str(), limit as i64, offset as i64],
        )
        .await
    }

    async fn rename(&self, owner: &UserId, id: &NoteId, title: &str) -> Result<Note> {
        self.touch(owner, id, "title = ?", title.trim().into()).await
    }

    async fn move_to(
        &self,
        owner: &UserId,
        id: &NoteId,
        folder: Option<FolderId>,
    ) -> Result<Note> {
        if let Some(folder) = &folder {
            self.ensure_folder_usable(owner, folder).await?;
        }
        self.touch(owner, id, "folder_id = ?", nullable(folder.map(|f| f.as_str())))
            .await
    }

    async fn set_content(
        &self,
        owner: &UserId,
        id: &NoteId,
        original: Option<Vec<u8>>,
        generated: Option<Vec<u8>>,
        status: ProcessingStatus,
    ) -> Result<Note> {
        let now = unix_millis_now();
        let rows = self
            .conn
            .execute(
                "UPDATE notes SET original_content = ?, ai_content = ?, processing_status = ?,
                                  updated_at = ?, sync_status = 'pending', payload_stale = 0
                 WHERE owner_id = ? AND id = ? AND deleted_at IS NULL",
                params![
                    nullable(original),
                    nullable(generated),
                    status.as_str(),
                    now,
                    owner.as_str(),
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn delete(&self, owner: &UserId, id: &NoteId) -> Result<()> {
        let now = unix_millis_now();

        let rows = self
            .conn
            .execute(
                "UPDATE notes SET deleted_at = ?, updated_at = ?, sync_status = ?
                 WHERE owner_id = ? AND id = ? AND deleted_at IS NULL",
                params![now, now, SyncStatus::Pending.as_str(), owner.as_str(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }
}
