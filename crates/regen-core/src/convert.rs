//! Typed access to the schemaless record store.
//!
//! Components persist their records as serde-derived structs. These helpers
//! convert between those structs and the JSON documents a [`RecordStore`]
//! holds, turning undecodable documents into [`CoreError::CorruptRecord`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use regen_storage::{Criteria, Record, RecordStore, StorageError};

use crate::error::{CoreError, CoreResult};

/// Store handle shared by every component of one pipeline.
pub type SharedStore = Arc<dyn RecordStore + Send + Sync>;

/// Runs `f` as an exclusive section of `store` under `scope` and returns
/// its value.
///
/// Any error from `f` aborts the section, so backends with transactions
/// discard its writes. A storage error keeps its original cause; a
/// [`CoreError::CorruptRecord`] is handed back unchanged.
pub(crate) fn exclusive<T>(
    store: &dyn RecordStore,
    scope: &str,
    f: impl FnOnce(&dyn RecordStore) -> CoreResult<T>,
) -> CoreResult<T> {
    let mut body = Some(f);
    let mut value = None;
    let mut failed = None;

    let ran = store.exclusive(scope, &mut |tx: &dyn RecordStore| {
        let Some(f) = body.take() else {
            return Ok(());
        };
        match f(tx) {
            Ok(v) => {
                value = Some(v);
                Ok(())
            }
            Err(CoreError::Storage(e)) => Err(e),
            Err(e) => {
                failed = Some(e);
                Err(StorageError::Aborted)
            }
        }
    });

    if let Some(e) = failed {
        return Err(e);
    }
    ran?;
    value.ok_or(CoreError::Storage(StorageError::Aborted))
}

pub(crate) fn decode<T: DeserializeOwned>(
    relation: &'static str,
    key: &str,
    record: Record,
) -> CoreResult<T> {
    serde_json::from_value(record).map_err(|e| CoreError::CorruptRecord {
        relation,
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn load<T: DeserializeOwned>(
    store: &dyn RecordStore,
    relation: &'static str,
    key: &str,
) -> CoreResult<Option<T>> {
    store
        .get(relation, key)?
        .map(|record| decode(relation, key, record))
        .transpose()
}

pub(crate) fn load_all<T: DeserializeOwned>(
    store: &dyn RecordStore,
    relation: &'static str,
    criteria: Option<&Criteria>,
) -> CoreResult<Vec<T>> {
    store
        .find(relation, criteria)?
        .into_iter()
        .map(|record| decode(relation, "*", record))
        .collect()
}

pub(crate) fn save<T: Serialize>(
    store: &dyn RecordStore,
    relation: &'static str,
    key: &str,
    value: &T,
) -> CoreResult<()> {
    let record = serde_json::to_value(value).map_err(StorageError::from)?;
    store.put(relation, key, &record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regen_storage::InMemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        step_key: String,
        hits: u32,
    }

    #[test]
    fn save_then_load() {
        let store = InMemoryStore::new();
        let sample = Sample {
            step_key: "a".into(),
            hits: 2,
        };
        save(&store, "sample", "a", &sample).unwrap();

        let raw = store.get("sample", "a").unwrap().unwrap();
        assert_eq!(raw, json!({"stepKey": "a", "hits": 2}));
        assert_eq!(load::<Sample>(&store, "sample", "a").unwrap(), Some(sample));
    }

    #[test]
    fn exclusive_returns_the_section_value() {
        let store = InMemoryStore::new();
        let n = exclusive(&store, "sample/a", |tx| {
            save(tx, "sample", "a", &Sample { step_key: "a".into(), hits: 1 })?;
            Ok(7)
        })
        .unwrap();
        assert_eq!(n, 7);
        assert!(store.get("sample", "a").unwrap().is_some());
    }

    #[test]
    fn exclusive_hands_back_domain_errors_and_rolls_back() {
        let store = regen_storage::SqliteStore::in_memory().unwrap();
        store.put("sample", "a", &json!({"stepKey": 5})).unwrap();

        let err = exclusive(&store, "sample/a", |tx| {
            save(tx, "sample", "b", &Sample { step_key: "b".into(), hits: 0 })?;
            load::<Sample>(tx, "sample", "a")
        })
        .unwrap_err();

        assert!(matches!(err, CoreError::CorruptRecord { relation: "sample", .. }));
        assert!(store.get("sample", "b").unwrap().is_none());
    }

    #[test]
    fn undecodable_record_is_corrupt() {
        let store = InMemoryStore::new();
        store.put("sample", "a", &json!({"stepKey": 5})).unwrap();

        let err = load::<Sample>(&store, "sample", "a").unwrap_err();
        assert!(matches!(
            err,
            CoreError::CorruptRecord { relation: "sample", ref key, .. } if key == "a"
        ));
    }
}
