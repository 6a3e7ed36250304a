//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::migrations;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database wrapper for libSQL connections
///
/// Holds the live connection every reader uses. Sync transactions run on
/// separate connections from [`Database::connect_isolated`], so their writes
/// stay invisible here until they commit.
#[derive(Debug)]
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            path: Some(path),
        };
        database.configure().await?;
        database.migrate().await?;
        tracing::debug!("Opened local store at {}", path_str);
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    ///
    /// Every connection to `:memory:` is a separate database, so an in-memory
    /// store cannot host isolated sync transactions.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            path: None,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for concurrent readers and one writer
    async fn configure(&self) -> Result<()> {
        configure_connection(&self.conn, self.path.is_some()).await
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the live connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open a new connection that does not share transaction state with
    /// [`Database::connection`].
    pub async fn connect_isolated(&self) -> Result<Connection> {
        if self.path.is_none() {
            return Err(Error::Database(
                "isolated connections require a file-backed database".into(),
            ));
        }
        let conn = self.db.connect()?;
        configure_connection(&conn, true).await?;
        Ok(conn)
    }
}

async fn configure_connection(conn: &Connection, file_backed: bool) -> Result<()> {
    if file_backed {
        // journal_mode returns a row; some builds reject that through execute
        conn.query("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
    }
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
    Ok(())
}
