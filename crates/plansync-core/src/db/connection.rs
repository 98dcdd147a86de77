//! Database connection management

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

use super::migrations;

/// Shared handle to the `SQLite` database backing the queue and local store.
///
/// The connection sits behind a mutex; the facade (enqueuer) and the engine
/// (drainer) coordinate exclusively through short transactions on it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the underlying connection for a short operation
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".to_string()))
    }
}

/// Configure `SQLite` for durability and concurrent readers
fn configure(conn: &Connection) -> Result<()> {
    // WAL keeps enqueue latency low while the engine reads
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let guard = db.lock().unwrap();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("plansync.db");
        let db = Database::open(&path).unwrap();
        drop(db);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("plansync.db");
        drop(Database::open(&path).unwrap());
        // Second open must run migrations without complaint
        Database::open(&path).unwrap();
    }
}
