//! SQLite-backed key-value store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::info;

use crate::{KvOp, KvRead, KvStore, StoreError};

/// How long a write waits for another connection's lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File-backed store over a single `kv` table.
///
/// Safe to share between tasks of one process. Several processes may open
/// the same file; writers wait on each other for up to [`BUSY_TIMEOUT`].
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, &path.display().to_string())
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            );
            ",
        )?;

        info!(path = %label, "key-value store initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn()?;
        select(&conn, key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;

        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        apply(&tx, ops)?;
        tx.commit()?;
        Ok(())
    }

    fn update(
        &self,
        plan: &mut dyn FnMut(&dyn KvRead) -> Result<Vec<KvOp>, StoreError>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock before the reads, so other
        // processes sharing the file cannot write in between.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ops = plan(&TxRead(&tx))?;
        apply(&tx, ops)?;
        tx.commit()?;
        Ok(())
    }
}

struct TxRead<'a>(&'a Transaction<'a>);

impl KvRead for TxRead<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        select(self.0, key)
    }
}

fn select(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, Vec<u8>>(0)
        })
        .optional()?;
    Ok(value)
}

fn apply(tx: &Transaction<'_>, ops: Vec<KvOp>) -> Result<(), StoreError> {
    for op in ops {
        match op {
            KvOp::Put { key, value } => {
                tx.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
            }
            KvOp::Delete { key } => {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            }
        }
    }
    Ok(())
}
