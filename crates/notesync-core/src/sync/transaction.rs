//! Isolated mutation scope for one sync run.
//!
//! Each transaction owns a dedicated connection with `BEGIN IMMEDIATE`.
//! Readers on the live connection keep seeing the last committed state (WAL)
//! until `commit`. Dropping an unfinished transaction closes its connection,
//! which makes SQLite discard every write made inside it.

use libsql::Connection;
use tokio::time::Instant;

use crate::db::Database;
use crate::error::{Error, Result};

/// Named diagnostic marker inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub name: String,
    /// Changes recorded before this checkpoint
    pub changes: usize,
}

/// Opens [`SyncTransaction`]s against a file-backed [`Database`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionManager<'a> {
    database: &'a Database,
}

impl<'a> TransactionManager<'a> {
    pub const fn new(database: &'a Database) -> Self {
        Self { database }
    }

    pub async fn begin_transaction(&self) -> Result<SyncTransaction> {
        let conn = self.database.connect_isolated().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|error| Error::Transaction(format!("failed to begin: {error}")))?;
        tracing::debug!("Began sync transaction");
        Ok(SyncTransaction {
            conn,
            checkpoints: Vec::new(),
            changes: 0,
            started: Instant::now(),
            finished: false,
        })
    }
}

/// All-or-nothing write scope. Checkpoints cannot be rolled back to.
pub struct SyncTransaction {
    conn: Connection,
    checkpoints: Vec<Checkpoint>,
    changes: usize,
    started: Instant,
    finished: bool,
}

impl SyncTransaction {
    /// Connection every write of the run must go through.
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn add_checkpoint(&mut self, name: impl Into<String>) {
        let checkpoint = Checkpoint {
            name: name.into(),
            changes: self.changes,
        };
        tracing::debug!(
            "Checkpoint '{}' after {} changes ({:?} elapsed)",
            checkpoint.name,
            checkpoint.changes,
            self.started.elapsed()
        );
        self.checkpoints.push(checkpoint);
    }

    pub fn mark_changes(&mut self, count: usize) {
        self.changes += count;
    }

    /// Publish every write to the live connection.
    pub async fn commit(mut self) -> Result<Vec<Checkpoint>> {
        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            // A failed COMMIT can leave the transaction open.
            let _ = self.conn.execute("ROLLBACK", ()).await;
            self.finished = true;
            return Err(Error::Transaction(format!("failed to commit: {error}")));
        }
        self.finished = true;
        tracing::debug!(
            "Committed sync transaction with {} changes in {:?}",
            self.changes,
            self.started.elapsed()
        );
        Ok(std::mem::take(&mut self.checkpoints))
    }

    /// Discard every write since `begin_transaction`.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|error| Error::Transaction(format!("failed to roll back: {error}")))?;
        tracing::info!(
            "Rolled back sync transaction ({} changes, last checkpoint {:?})",
            self.changes,
            self.checkpoints.last().map(|checkpoint| checkpoint.name.as_str())
        );
        Ok(())
    }
}

impl Drop for SyncTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "Sync transaction dropped before commit; {} changes discarded",
                self.changes
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FolderRepository, LibSqlFolderRepository};
    use crate::models::UserId;

    async fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("notesync.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_publishes_writes_to_the_live_connection() {
        let (_dir, db) = setup().await;
        let owner = UserId::new("user-1");
        let manager = TransactionManager::new(&db);

        let mut tx = manager.begin_transaction().await.unwrap();
        LibSqlFolderRepository::new(tx.connection())
            .create(&owner, "Work")
            .await
            .unwrap();
        tx.mark_changes(1);
        tx.add_checkpoint("folders");

        let live = LibSqlFolderRepository::new(db.connection());
        assert!(live.list(&owner).await.unwrap().is_empty());

        let checkpoints = tx.commit().await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].changes, 1);
        assert_eq!(live.list(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_discards_every_write() {
        let (_dir, db) = setup().await;
        let owner = UserId::new("user-1");
        let manager = TransactionManager::new(&db);

        let tx = manager.begin_transaction().await.unwrap();
        let repo = LibSqlFolderRepository::new(tx.connection());
        repo.create(&owner, "Work").await.unwrap();
        repo.create(&owner, "Home").await.unwrap();
        tx.rollback().await.unwrap();

        let live = LibSqlFolderRepository::new(db.connection());
        assert!(live.list(&owner).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_an_open_transaction_discards_writes() {
        let (_dir, db) = setup().await;
        let owner = UserId::new("user-1");
        {
            let tx = TransactionManager::new(&db).begin_transaction().await.unwrap();
            LibSqlFolderRepository::new(tx.connection())
                .create(&owner, "Work")
                .await
                .unwrap();
        }

        let live = LibSqlFolderRepository::new(db.connection());
        assert!(live.list(&owner).await.unwrap().is_empty());

        // The write lock was released with the connection.
        let tx = TransactionManager::new(&db).begin_transaction().await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_databases_cannot_host_transactions() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(TransactionManager::new(&db)
            .begin_transaction()
            .await
            .is_err());
    }
}
