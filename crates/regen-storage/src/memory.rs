//! In-memory implementation of [`RecordStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests, one-shot CLI runs
//! and anywhere persistence isn't needed. It keeps one `IndexMap` per
//! relation so `find` preserves first-insertion order, matching the SQLite
//! backend's `seq` ordering. Exclusive sections are serialized per scope
//! within one store value; separate `InMemoryStore`s never share data.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;

use crate::error::StorageError;
use crate::locks::KeyLocks;
use crate::traits::{RecordStore, Section};
use crate::types::{admits, Criteria, Record};

type Relation = IndexMap<String, Record>;

/// In-memory implementation of [`RecordStore`].
///
/// All relations sit behind a single `RwLock`, so every `find` observes one
/// consistent view of a relation.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    relations: RwLock<HashMap<String, Relation>>,
    sections: KeyLocks,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// Number of records currently held in `relation`.
    pub fn len(&self, relation: &str) -> usize {
        self.relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(relation)
            .map_or(0, IndexMap::len)
    }
}

impl RecordStore for InMemoryStore {
    fn get(&self, relation: &str, key: &str) -> Result<Option<Record>, StorageError> {
        let relations = self.relations.read().unwrap_or_else(PoisonError::into_inner);
        Ok(relations
            .get(relation)
            .and_then(|records| records.get(key))
            .cloned())
    }

    fn put(&self, relation: &str, key: &str, record: &Record) -> Result<(), StorageError> {
        let mut relations = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        relations
            .entry(relation.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn find(
        &self,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<Vec<Record>, StorageError> {
        let relations = self.relations.read().unwrap_or_else(PoisonError::into_inner);
        Ok(relations
            .get(relation)
            .map(|records| {
                records
                    .values()
                    .filter(|r| admits(criteria, r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn del(&self, relation: &str, key: &str) -> Result<bool, StorageError> {
        let mut relations = self
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(relations
            .get_mut(relation)
            .and_then(|records| records.shift_remove(key))
            .is_some())
    }

    fn exclusive(&self, scope: &str, section: &mut Section<'_>) -> Result<(), StorageError> {
        self.sections.with_key(scope, || section(self as &dyn RecordStore))
    }
}
