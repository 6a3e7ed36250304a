//! Settings repository implementation
//!
//! Simple key-value preferences kept outside sync transactions.

use crate::error::Result;
use crate::models::UserId;
use libsql::Connection;

const LAST_SYNC_PREFIX: &str = "last_sync_at:";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Read a raw preference value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw preference value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Completion time (Unix ms) of the owner's last successful sync
    async fn last_sync_at(&self, owner: &UserId) -> Result<Option<i64>>;

    /// Record a successful sync for the owner
    async fn set_last_sync_at(&self, owner: &UserId, at: i64) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn last_sync_at(&self, owner: &UserId) -> Result<Option<i64>> {
        let key = format!("{LAST_SYNC_PREFIX}{owner}");
        Ok(self
            .get(&key)
            .await?
            .and_then(|value| value.trim().parse().ok()))
    }

    async fn set_last_sync_at(&self, owner: &UserId, at: i64) -> Result<()> {
        let key = format!("{LAST_SYNC_PREFIX}{owner}");
        self.set(&key, &at.to_string()).await
    }
}
