//! Conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{params, Connection};

use super::row::{integer, text};
use crate::error::Result;
use crate::models::{SyncConflict, UserId};

/// libSQL store for LWW resolutions that overwrote unsynced local edits
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append one resolution to the log
    pub async fn record(
        &self,
        owner: &UserId,
        entity: &str,
        record_id: &str,
        local_updated_at: i64,
        incoming_updated_at: i64,
        resolved_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                    (entity, record_id, owner_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
                 VALUES (?, ?, ?, ?, ?, ?, 'lww')",
                params![
                    entity,
                    record_id,
                    owner.as_str(),
                    local_updated_at,
                    incoming_updated_at,
                    resolved_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Most recent resolutions first
    pub async fn list(&self, owner: &UserId, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 WHERE owner_id = ?
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                params![owner.as_str(), limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: integer(&row, 0)?,
                entity: text(&row, 1)?,
                record_id: text(&row, 2)?,
                local_updated_at: integer(&row, 3)?,
                incoming_updated_at: integer(&row, 4)?,
                resolved_at: integer(&row, 5)?,
                strategy: text(&row, 6)?,
            });
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        let owner = UserId::new("user-1");

        repo.record(&owner, "notes", "a", 10, 20, 100).await.unwrap();
        repo.record(&owner, "folders", "b", 30, 40, 200).await.unwrap();
        repo.record(&UserId::new("user-2"), "notes", "c", 1, 2, 300)
            .await
            .unwrap();

        let conflicts = repo.list(&owner, 10).await.unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].record_id, "b");
        assert_eq!(conflicts[0].strategy, "lww");
        assert_eq!(conflicts[1].local_updated_at, 10);
        assert_eq!(conflicts[1].incoming_updated_at, 20);
    }
}
