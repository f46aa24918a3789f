//! SQLite implementation of [`RecordStore`].
//!
//! [`SqliteStore`] persists records in a single `records` table with WAL
//! mode and automatic schema migrations. Record bodies are stored as JSON
//! TEXT via serde_json.
//!
//! Exclusive sections run inside a `BEGIN IMMEDIATE` transaction, which
//! takes the database write lock up front. That serializes them against
//! sections on other connections to the same file, including other
//! processes, so SQLite serializes more coarsely than per scope.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StorageError;
use crate::traits::{RecordStore, Section};
use crate::types::{admits, Criteria, Record};

/// SQLite-backed implementation of [`RecordStore`].
///
/// `rusqlite::Connection` is `!Sync`, so the connection sits behind a
/// `Mutex`; each trait call holds it for one statement, and an exclusive
/// section holds it for the whole transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = crate::schema::open_database(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite record store");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, relation: &str, key: &str) -> Result<Option<Record>, StorageError> {
        get(&self.conn(), relation, key)
    }

    fn put(&self, relation: &str, key: &str, record: &Record) -> Result<(), StorageError> {
        put(&self.conn(), relation, key, record)
    }

    fn find(
        &self,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<Vec<Record>, StorageError> {
        find(&self.conn(), relation, criteria)
    }

    fn del(&self, relation: &str, key: &str) -> Result<bool, StorageError> {
        del(&self.conn(), relation, key)
    }

    fn exclusive(&self, scope: &str, section: &mut Section<'_>) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tracing::trace!(scope, "began immediate transaction");
        // Dropping `tx` on the error path rolls the section back.
        section(&Locked { conn: &*tx } as &dyn RecordStore)?;
        tx.commit()?;
        Ok(())
    }
}

/// Store view over a connection that is already inside a transaction.
struct Locked<'c> {
    conn: &'c Connection,
}

impl RecordStore for Locked<'_> {
    fn get(&self, relation: &str, key: &str) -> Result<Option<Record>, StorageError> {
        get(self.conn, relation, key)
    }

    fn put(&self, relation: &str, key: &str, record: &Record) -> Result<(), StorageError> {
        put(self.conn, relation, key, record)
    }

    fn find(
        &self,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<Vec<Record>, StorageError> {
        find(self.conn, relation, criteria)
    }

    fn del(&self, relation: &str, key: &str) -> Result<bool, StorageError> {
        del(self.conn, relation, key)
    }

    fn exclusive(&self, _scope: &str, section: &mut Section<'_>) -> Result<(), StorageError> {
        // Already holding the write lock.
        section(self as &dyn RecordStore)
    }
}

fn get(conn: &Connection, relation: &str, key: &str) -> Result<Option<Record>, StorageError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE relation = ?1 AND key = ?2",
            params![relation, key],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b).map_err(StorageError::from))
        .transpose()
}

fn put(conn: &Connection, relation: &str, key: &str, record: &Record) -> Result<(), StorageError> {
    let body = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO records (relation, key, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (relation, key) DO UPDATE SET body = excluded.body",
        params![relation, key, body],
    )?;
    Ok(())
}

fn find(
    conn: &Connection,
    relation: &str,
    criteria: Option<&Criteria>,
) -> Result<Vec<Record>, StorageError> {
    let bodies: Vec<String> = {
        let mut stmt =
            conn.prepare_cached("SELECT body FROM records WHERE relation = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![relation], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let mut records = Vec::with_capacity(bodies.len());
    for body in bodies {
        let record: Record = serde_json::from_str(&body)?;
        if admits(criteria, &record) {
            records.push(record);
        }
    }
    Ok(records)
}

fn del(conn: &Connection, relation: &str, key: &str) -> Result<bool, StorageError> {
    let removed = conn.execute(
        "DELETE FROM records WHERE relation = ?1 AND key = ?2",
        params![relation, key],
    )?;
    Ok(removed > 0)
}
