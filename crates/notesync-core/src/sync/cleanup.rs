//! End-of-run housekeeping inside the sync transaction.

use libsql::Connection;

use super::manager::{is_record_level, EntitySyncManager};
use crate::db::{LibSqlFolderRepository, LibSqlNoteRepository};
use crate::error::Result;
use crate::models::{Folder, Note, SyncStatus, UserId};
use crate::util::unix_millis_now;

/// What the cleanup step changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Confirmed tombstones deleted remotely and purged
    pub purged_tombstones: usize,
    /// Confirmed tombstones kept because the remote delete failed
    pub kept_tombstones: usize,
    /// Tombstones dropped after the retention window
    pub expired_tombstones: u64,
    /// Duplicate default folders merged into the oldest one
    pub merged_default_folders: usize,
    /// Notes moved out of merged default folders
    pub reassigned_notes: u64,
    /// Notes whose folder no longer exists
    pub detached_notes: u64,
}

impl CleanupReport {
    /// Local rows touched.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn changes(&self) -> usize {
        self.purged_tombstones
            + self.merged_default_folders
            + (self.expired_tombstones + self.reassigned_notes + self.detached_notes) as usize
    }
}

pub(super) struct Cleanup<'a> {
    pub folders: &'a EntitySyncManager<Folder>,
    pub notes: &'a EntitySyncManager<Note>,
    pub default_folder_name: &'a str,
    pub retention_millis: i64,
}

impl Cleanup<'_> {
    pub async fn run(&self, conn: &Connection, owner: &UserId) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for phase in [
            self.notes.cleanup_deleted(conn, owner).await?,
            self.folders.cleanup_deleted(conn, owner).await?,
        ] {
            report.purged_tombstones += phase.succeeded;
            report.kept_tombstones += phase.failed;
        }

        report.expired_tombstones = self
            .notes
            .purge_expired(conn, owner, self.retention_millis)
            .await?
            + self
                .folders
                .purge_expired(conn, owner, self.retention_millis)
                .await?;

        self.merge_default_folders(conn, owner, &mut report).await?;

        report.detached_notes = LibSqlNoteRepository::new(conn)
            .detach_orphans(owner)
            .await?;
        if report.detached_notes > 0 {
            tracing::info!(
                "Detached {} notes from folders that no longer exist",
                report.detached_notes
            );
        }

        Ok(report)
    }

    /// Keep the oldest default folder, fold the others into it.
    async fn merge_default_folders(
        &self,
        conn: &Connection,
        owner: &UserId,
        report: &mut CleanupReport,
    ) -> Result<()> {
        let folders = LibSqlFolderRepository::new(conn);
        let notes = LibSqlNoteRepository::new(conn);
        let mut candidates = folders
            .default_candidates(owner, self.default_folder_name)
            .await?
            .into_iter();
        let Some(keeper) = candidates.next() else {
            return Ok(());
        };
        let keeper_id = keeper.id.as_str();

        for duplicate in candidates {
            let duplicate_id = duplicate.id.as_str();
            report.reassigned_notes += notes
                .reassign_folder(owner, &duplicate_id, &keeper_id)
                .await?;

            match self.folders.delete_remote(owner, &duplicate_id).await {
                Ok(()) => folders.purge(owner, &duplicate_id).await?,
                Err(error) if is_record_level(&error) => {
                    tracing::warn!(
                        "Could not delete duplicate default folder {} remotely, leaving a tombstone: {}",
                        duplicate_id,
                        error
                    );
                    let now = unix_millis_now();
                    let mut tombstone = duplicate;
                    tombstone.deleted_at = Some(now);
                    tombstone.updated_at = now;
                    tombstone.sync_status = SyncStatus::Pending;
                    folders.save(&tombstone).await?;
                }
                Err(error) => return Err(error),
            }
            report.merged_default_folders += 1;
        }

        if report.merged_default_folders > 0 {
            tracing::info!(
                "Merged {} duplicate '{}' folders into {}",
                report.merged_default_folders,
                self.default_folder_name,
                keeper_id
            );
        }
        Ok(())
    }
}
