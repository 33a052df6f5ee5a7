//! Persistent key-value storage shared by the enhancement cache and the
//! built-in command flags.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

/// File name of the database inside the data directory.
pub const DB_FILENAME: &str = "bumpers.db";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("creating {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("opening {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("{operation}: {source}")]
    Query {
        operation: &'static str,
        source: rusqlite::Error,
    },
    #[error("encoding value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal byte-oriented key-value interface.
pub trait KvStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Insert or replace `key` in a single write.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;
    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
    /// Push pending writes to durable storage.
    fn flush(&self) -> StoreResult<()>;
}

/// [`KvStore`] backed by a single SQLite table.
///
/// WAL mode plus a busy timeout lets concurrent sidecar processes share one
/// file: readers proceed in parallel and a writer waits for the lock rather
/// than failing.
pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) `bumpers.db` in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| StoreError::CreateDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let db_path = data_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path).map_err(|source| StoreError::Open {
            path: db_path.clone(),
            source,
        })?;
        let store = Self { conn, db_path };
        store.initialize()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let store = Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> StoreResult<()> {
        // Pragmas are best effort; in-memory databases reject WAL.
        let _ = self.conn.pragma_update(None, "journal_mode", "WAL");
        let _ = self.conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = self.conn.pragma_update(None, "busy_timeout", 5000);

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL
                )",
                [],
            )
            .map_err(|source| StoreError::Query {
                operation: "create kv table",
                source,
            })?;
        Ok(())
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|source| StoreError::Query {
                operation: "get",
                source,
            })
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|source| StoreError::Query {
                operation: "put",
                source,
            })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|source| StoreError::Query {
                operation: "delete",
                source,
            })?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let query_err = |source| StoreError::Query {
            operation: "scan_prefix",
            source,
        };
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn flush(&self) -> StoreResult<()> {
        if self.db_path == Path::new(":memory:") {
            return Ok(());
        }
        self.conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .map_err(|source| StoreError::Query {
                operation: "checkpoint",
                source,
            })
    }
}
