//! Storage error types for regen-storage.
//!
//! [`StorageError`] covers infrastructure failures only: a backend that
//! cannot be reached, a schema that cannot be migrated, or a record body that
//! cannot be (de)serialized. Absence of a record is never an error; lookups
//! return `Option` and deletions return whether anything was removed.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization of a record body failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported a failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Filesystem access around the store failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An exclusive section bailed out before finishing.
    #[error("exclusive section aborted")]
    Aborted,
}
