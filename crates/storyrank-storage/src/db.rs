//! Database connection management.
//!
//! One writer connection plus a small pool of read-only connections, each
//! behind its own Mutex. WAL mode lets readers run alongside the writer and
//! alongside each other. Configures WAL mode and recommended PRAGMAs on
//! initialization.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use storyrank_core::error::StoryrankError;

use crate::migrations;

/// Read-only connections opened next to the writer for file databases.
const READER_CONNECTIONS: usize = 4;

type Slot = Mutex<Option<Connection>>;

/// Thread-safe SQLite database wrapper.
///
/// Connections are held in an `Option` so they can be released exactly once
/// at shutdown. Every operation after [`Database::close`] fails with a
/// storage error instead of touching a dead handle.
///
/// In-memory databases have no reader pool; reads share the writer.
pub struct Database {
    conn: Slot,
    readers: Vec<Slot>,
    next_reader: AtomicUsize,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// When `reset` is true every stored item is dropped before migrations
    /// run. This is destructive and is only triggered from
    /// `storage.reset_on_start`.
    pub fn open(path: &Path, reset: bool) -> Result<Self, StoryrankError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoryrankError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| StoryrankError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        if reset {
            warn!(
                path = %path.display(),
                "Resetting item store; all previously ingested items are discarded"
            );
            migrations::reset_schema(&conn)?;
        }

        migrations::run_migrations(&conn)?;

        let readers = (0..READER_CONNECTIONS)
            .map(|_| open_reader(path).map(|r| Mutex::new(Some(r))))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(readers = readers.len(), "Reader connections opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoryrankError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoryrankError::Storage(format!("Failed to open in-memory db: {}", e))
        })?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, so everything the
    /// closure does is observed by other callers as a single step.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoryrankError>
    where
        F: FnOnce(&Connection) -> Result<T, StoryrankError>,
    {
        let guard = lock(&self.conn)?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(closed()),
        }
    }

    /// Execute a closure inside a read transaction on a pooled reader.
    ///
    /// Every statement in the closure sees the same committed state, even
    /// while the writer commits. Falls back to the writer connection when
    /// there is no reader pool.
    pub fn with_read_conn<F, T>(&self, f: F) -> Result<T, StoryrankError>
    where
        F: FnOnce(&Connection) -> Result<T, StoryrankError>,
    {
        if self.readers.is_empty() {
            return self.with_conn(f);
        }

        let guard = self.acquire_reader()?;
        let conn = guard.as_ref().ok_or_else(closed)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoryrankError::Storage(format!("Failed to begin read: {}", e)))?;
        let out = f(&*tx)?;
        tx.commit()
            .map_err(|e| StoryrankError::Storage(format!("Failed to end read: {}", e)))?;
        Ok(out)
    }

    /// An idle reader if there is one, otherwise the next in turn.
    fn acquire_reader(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoryrankError> {
        for slot in &self.readers {
            if let Ok(guard) = slot.try_lock() {
                return Ok(guard);
            }
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        lock(&self.readers[idx])
    }

    /// Release every connection. Waits for in-flight calls on each one.
    ///
    /// Calling `close` a second time is a no-op.
    pub fn close(&self) -> Result<(), StoryrankError> {
        for slot in &self.readers {
            if let Some(reader) = lock(slot)?.take() {
                reader.close().map_err(|(_, e)| {
                    StoryrankError::Storage(format!("Failed to close reader: {}", e))
                })?;
            }
        }

        match lock(&self.conn)?.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| {
                    StoryrankError::Storage(format!("Failed to close database: {}", e))
                })?;
                info!("Database closed");
                Ok(())
            }
            None => {
                debug!("Database already closed");
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|c| c.is_none()).unwrap_or(true)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("readers", &self.readers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn open_reader(path: &Path) -> Result<Connection, StoryrankError> {
    let conn = Connection::open(path)
        .map_err(|e| StoryrankError::Storage(format!("Failed to open reader: {}", e)))?;
    conn.execute_batch(
        "PRAGMA query_only = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| StoryrankError::Storage(format!("Failed to set reader pragmas: {}", e)))?;
    Ok(conn)
}

fn lock(slot: &Slot) -> Result<MutexGuard<'_, Option<Connection>>, StoryrankError> {
    slot.lock()
        .map_err(|e| StoryrankError::Storage(format!("Database lock poisoned: {}", e)))
}

fn closed() -> StoryrankError {
    StoryrankError::Storage("Database is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn count_items(db: &Database) -> Result<i64, StoryrankError> {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                .map_err(|e| StoryrankError::Storage(e.to_string()))
        })
    }

    fn insert_raw(db: &Database, id: i64) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO items (id, title, embedding, dimensions, ingested_at)
                 VALUES (?1, 'title', '[1.0]', 1, 0)",
                [id],
            )
            .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_items(&db).unwrap(), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("stories.db");
        let db = Database::open(&path, false).unwrap();

        assert_eq!(count_items(&db).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("wal.db"), false).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reopen_without_reset_keeps_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.db");

        let db = Database::open(&path, false).unwrap();
        insert_raw(&db, 1);
        db.close().unwrap();

        let db = Database::open(&path, false).unwrap();
        assert_eq!(count_items(&db).unwrap(), 1);
    }

    #[test]
    fn test_reopen_with_reset_discards_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reset.db");

        let db = Database::open(&path, false).unwrap();
        insert_raw(&db, 1);
        insert_raw(&db, 2);
        db.close().unwrap();

        let db = Database::open(&path, true).unwrap();
        assert_eq!(count_items(&db).unwrap(), 0);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let db = Database::in_memory().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());

        let err = count_items(&db).unwrap_err();
        assert!(matches!(err, StoryrankError::Storage(_)));
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_read_snapshot_overlaps_write() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("overlap.db"), false).unwrap());
        insert_raw(&db, 1);

        let writer = Arc::clone(&db);
        let (before, after) = db
            .with_read_conn(|conn| {
                let count = |conn: &Connection| -> Result<i64, StoryrankError> {
                    conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                        .map_err(|e| StoryrankError::Storage(e.to_string()))
                };
                let before = count(conn)?;
                // The writer is not blocked by the open read.
                std::thread::spawn(move || insert_raw(&writer, 2))
                    .join()
                    .unwrap();
                let after = count(conn)?;
                Ok((before, after))
            })
            .unwrap();

        assert_eq!((before, after), (1, 1));
        assert_eq!(count_items(&db).unwrap(), 2);
    }

    #[test]
    fn test_readers_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("ro.db"), false).unwrap();
        let err = db
            .with_read_conn(|conn| {
                conn.execute("DELETE FROM items", [])
                    .map_err(|e| StoryrankError::Storage(e.to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, StoryrankError::Storage(_)));
    }

    #[test]
    fn test_reads_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("closed.db"), false).unwrap();
        db.close().unwrap();
        let err = db.with_read_conn(|_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_close_twice_is_noop() {
        let db = Database::in_memory().unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
    }
}
