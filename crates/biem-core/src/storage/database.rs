//! SQLite database handle
//!
//! One writer and one reader connection behind separate mutexes, so reads
//! never queue behind writes and the handle is `Send + Sync` without an
//! outer lock. All statements are short; the mutexes are never held
//! across an await point.

use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BiemError, Result};

// ============================================================================
// DATABASE
// ============================================================================

/// Shared relational backend for the vector rows, crystal tables, and
/// knowledge tables
pub struct Database {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Database {
    /// Apply PRAGMAs and optional encryption to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        // Apply encryption key if SQLCipher is enabled and key is provided
        #[cfg(feature = "encryption")]
        {
            if let Ok(key) = std::env::var("BIEM_ENCRYPTION_KEY") {
                if !key.is_empty() {
                    conn.pragma_update(None, "key", &key)?;
                }
            }
        }

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;
             PRAGMA journal_size_limit = 67108864;",
        )?;

        Ok(())
    }

    /// Resolve the default database path under the platform data directory
    fn default_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("com", "biem", "core")
            .ok_or_else(|| BiemError::Init("could not determine project directories".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        // Restrict directory permissions to owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Ok(data_dir.join("biem.db"))
    }

    /// Open (or create) the database and apply migrations
    pub fn open(db_path: Option<PathBuf>) -> Result<Arc<Self>> {
        let path = match db_path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        let writer_conn = Connection::open(&path)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn)?;

        // Apply migrations on writer only
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Arc::new(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        }))
    }

    /// Lock the writer connection
    pub fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| BiemError::Unavailable("writer lock poisoned".into()))
    }

    /// Lock the reader connection
    pub fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| BiemError::Unavailable("reader lock poisoned".into()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_applies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path().join("test.db"))).unwrap();

        let reader = db.reader().unwrap();
        let count: i64 = reader
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('memory_nodes', 'crystal_facts', 'crystal_links',
                              'knowledge_triples', 'knowledge_history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        drop(Database::open(Some(path.clone())).unwrap());
        let db = Database::open(Some(path)).unwrap();

        let reader = db.reader().unwrap();
        let version: i64 = reader
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(version >= 3);
    }
}
