//! The [`RecordStore`] trait defining the storage contract.
//!
//! The store is a relation-scoped key-value space: every record lives under a
//! `(relation, key)` pair and is replaced wholesale on `put`. All backends
//! (InMemoryStore, SqliteStore, or anything a host application plugs in)
//! implement this trait, so the pipeline components never know which one
//! they are talking to.

use crate::error::StorageError;
use crate::types::{Criteria, Record};

/// Body of an exclusive section. It receives the store view to read and
/// write through, and returning `Err` discards the section's writes where
/// the backend supports it.
pub type Section<'a> = dyn FnMut(&dyn RecordStore) -> Result<(), StorageError> + 'a;

/// The storage contract for pipeline records.
///
/// Each individual call is atomic with respect to other calls on the same
/// store. Read-modify-write sequences go through [`RecordStore::exclusive`],
/// which serializes them against every other section with the same scope on
/// the same underlying data, including sections run by other handles or
/// other processes where the backend is shared that way.
///
/// Shared handles are `Send + Sync` (see regen-core's `SharedStore`). The
/// view handed to a section may be neither, since it can borrow a live
/// transaction.
///
/// `find` returns records in the order their keys were first inserted.
/// Overwriting a key keeps its position; deleting and re-inserting moves it
/// to the end. Graph traversal tie-breaking depends on this ordering.
pub trait RecordStore {
    /// Retrieves the record stored at `key`, if any.
    fn get(&self, relation: &str, key: &str) -> Result<Option<Record>, StorageError>;

    /// Inserts or fully replaces the record at `key`.
    fn put(&self, relation: &str, key: &str, record: &Record) -> Result<(), StorageError>;

    /// Returns every record in `relation` matching `criteria`.
    fn find(
        &self,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<Vec<Record>, StorageError>;

    /// Removes the record at `key`. Returns whether a record was present.
    fn del(&self, relation: &str, key: &str) -> Result<bool, StorageError>;

    /// Runs `section` with no other section of the same `scope` in flight.
    ///
    /// Backends may serialize more coarsely than per scope. Sections must not
    /// open further sections on the store they were handed.
    fn exclusive(&self, scope: &str, section: &mut Section<'_>) -> Result<(), StorageError>;
}
