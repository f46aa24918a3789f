//! Resource tracking by content digest.
//!
//! [`ResourceTracker`] records the latest known digest of every external
//! input, keyed by its locator, and classifies each update as newly seen,
//! changed or unchanged. Digests are opaque: the tracker compares them, it
//! never computes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use regen_storage::Criteria;

use crate::convert::{exclusive, load, load_all, save, SharedStore};
use crate::error::CoreResult;
use crate::id::ResourceId;

pub(crate) const RESOURCES: &str = "resource";

/// A tracked external input. Only the latest state is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub locator: String,
    pub kind: String,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// One observation of an input, as reported by whoever hashed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub locator: String,
    pub kind: String,
    pub digest: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl ResourceUpdate {
    pub fn new(
        locator: impl Into<String>,
        kind: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        ResourceUpdate {
            locator: locator.into(),
            kind: kind.into(),
            digest: digest.into(),
            last_modified: None,
            size: None,
        }
    }

    pub fn last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn size(mut self, bytes: u64) -> Self {
        self.size = Some(bytes);
        self
    }
}

/// Outcome of [`ResourceTracker::upsert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum UpsertOutcome {
    /// First time this locator was seen.
    Created { resource: ResourceId },
    /// The digest differs from the stored one.
    #[serde(rename_all = "camelCase")]
    Changed {
        resource: ResourceId,
        previous_digest: String,
    },
    /// Same digest as stored; nothing was written.
    Unchanged { resource: ResourceId },
}

impl UpsertOutcome {
    pub fn resource(&self) -> ResourceId {
        match self {
            UpsertOutcome::Created { resource }
            | UpsertOutcome::Changed { resource, .. }
            | UpsertOutcome::Unchanged { resource } => *resource,
        }
    }
}

/// Outcome of [`ResourceTracker::get`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum GetOutcome {
    Ok {
        id: ResourceId,
        kind: String,
        digest: String,
    },
    NotFound {
        locator: String,
    },
}

/// Outcome of [`ResourceTracker::remove`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum RemoveOutcome {
    Ok { id: ResourceId },
    NotFound { locator: String },
}

/// Outcome of [`ResourceTracker::diff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum DiffOutcome {
    /// No kind-specific differ is available for this resource.
    Unknown { message: String },
}

/// Exclusive-section scope guarding one locator.
fn scope(locator: &str) -> String {
    format!("{RESOURCES}/{locator}")
}

/// Tracks external inputs by locator.
///
/// Upserts and removals of one locator are serialized through the store, so
/// trackers over the same data never both report `Created`.
pub struct ResourceTracker {
    store: SharedStore,
}

impl ResourceTracker {
    pub fn new(store: SharedStore) -> Self {
        ResourceTracker { store }
    }

    /// Records the current digest of a resource.
    ///
    /// Optional fields missing from `update` keep their stored values when
    /// the digest changed.
    pub fn upsert(&self, update: ResourceUpdate) -> CoreResult<UpsertOutcome> {
        self.upsert_replacing(update).map(|(outcome, _)| outcome)
    }

    /// Like [`upsert`](Self::upsert), also returning the record as it was
    /// before the update.
    pub(crate) fn upsert_replacing(
        &self,
        update: ResourceUpdate,
    ) -> CoreResult<(UpsertOutcome, Option<Resource>)> {
        let locator = update.locator.clone();
        exclusive(&*self.store, &scope(&locator), |tx| {
            let existing: Option<Resource> = load(tx, RESOURCES, &locator)?;

            let outcome = match existing.clone() {
                None => {
                    let resource = Resource {
                        id: ResourceId::new(),
                        locator: update.locator,
                        kind: update.kind,
                        digest: update.digest,
                        last_modified: update.last_modified,
                        size: update.size,
                    };
                    save(tx, RESOURCES, &locator, &resource)?;
                    tracing::debug!(%locator, id = %resource.id, "resource created");
                    UpsertOutcome::Created {
                        resource: resource.id,
                    }
                }
                Some(stored) if stored.digest == update.digest => {
                    UpsertOutcome::Unchanged { resource: stored.id }
                }
                Some(stored) => {
                    let previous_digest = stored.digest.clone();
                    let resource = Resource {
                        id: stored.id,
                        locator: stored.locator,
                        kind: update.kind,
                        digest: update.digest,
                        last_modified: update.last_modified.or(stored.last_modified),
                        size: update.size.or(stored.size),
                    };
                    save(tx, RESOURCES, &locator, &resource)?;
                    tracing::debug!(
                        %locator,
                        previous = %previous_digest,
                        current = %resource.digest,
                        "resource changed"
                    );
                    UpsertOutcome::Changed {
                        resource: resource.id,
                        previous_digest,
                    }
                }
            };
            Ok((outcome, existing))
        })
    }

    pub fn get(&self, locator: &str) -> CoreResult<GetOutcome> {
        Ok(match self.lookup(locator)? {
            Some(r) => GetOutcome::Ok {
                id: r.id,
                kind: r.kind,
                digest: r.digest,
            },
            None => GetOutcome::NotFound {
                locator: locator.to_string(),
            },
        })
    }

    /// Full stored record for `locator`.
    pub fn lookup(&self, locator: &str) -> CoreResult<Option<Resource>> {
        load(&*self.store, RESOURCES, locator)
    }

    /// All tracked resources, optionally restricted to one kind.
    pub fn list(&self, kind: Option<&str>) -> CoreResult<Vec<Resource>> {
        let criteria = kind.map(|k| Criteria::new().with("kind", k));
        load_all(&*self.store, RESOURCES, criteria.as_ref())
    }

    pub fn remove(&self, locator: &str) -> CoreResult<RemoveOutcome> {
        exclusive(&*self.store, &scope(locator), |tx| {
            let Some(stored) = load::<Resource>(tx, RESOURCES, locator)? else {
                return Ok(RemoveOutcome::NotFound {
                    locator: locator.to_string(),
                });
            };
            tx.del(RESOURCES, locator)?;
            tracing::debug!(%locator, id = %stored.id, "resource removed");
            Ok(RemoveOutcome::Ok { id: stored.id })
        })
    }

    /// Content-level diff between two digests of a resource.
    ///
    /// Kind-specific differs plug in above this layer; the tracker itself
    /// only knows digests and so never claims to know what changed.
    pub fn diff(&self, locator: &str, old_digest: &str, new_digest: &str) -> DiffOutcome {
        DiffOutcome::Unknown {
            message: format!(
                "no differ registered for '{locator}' ({old_digest} -> {new_digest})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use regen_storage::InMemoryStore;

    fn tracker() -> ResourceTracker {
        ResourceTracker::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn first_upsert_creates() {
        let t = tracker();
        let out = t
            .upsert(ResourceUpdate::new("file:///a.md", "markdown", "d1").size(10))
            .unwrap();
        assert!(matches!(out, UpsertOutcome::Created { .. }));
    }

    #[test]
    fn same_digest_is_unchanged_and_keeps_identity() {
        let t = tracker();
        let created = t
            .upsert(ResourceUpdate::new("a", "markdown", "d1"))
            .unwrap();
        let again = t
            .upsert(ResourceUpdate::new("a", "markdown", "d1"))
            .unwrap();
        assert_eq!(
            again,
            UpsertOutcome::Unchanged {
                resource: created.resource()
            }
        );
    }

    #[test]
    fn changed_digest_reports_previous_and_keeps_identity() {
        let t = tracker();
        let created = t.upsert(ResourceUpdate::new("a", "markdown", "d1")).unwrap();
        let changed = t.upsert(ResourceUpdate::new("a", "markdown", "d2")).unwrap();

        assert_eq!(
            changed,
            UpsertOutcome::Changed {
                resource: created.resource(),
                previous_digest: "d1".into(),
            }
        );
        match t.get("a").unwrap() {
            GetOutcome::Ok { digest, .. } => assert_eq!(digest, "d2"),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn change_without_optionals_keeps_stored_ones() {
        let t = tracker();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        t.upsert(
            ResourceUpdate::new("a", "markdown", "d1")
                .size(42)
                .last_modified(at),
        )
        .unwrap();
        t.upsert(ResourceUpdate::new("a", "html", "d2")).unwrap();

        let stored = t.lookup("a").unwrap().unwrap();
        assert_eq!(stored.kind, "html");
        assert_eq!(stored.size, Some(42));
        assert_eq!(stored.last_modified, Some(at));
    }

    #[test]
    fn replacing_upsert_returns_the_prior_record() {
        let t = tracker();
        let (_, before) = t
            .upsert_replacing(ResourceUpdate::new("a", "markdown", "d1"))
            .unwrap();
        assert!(before.is_none());

        let (out, before) = t
            .upsert_replacing(ResourceUpdate::new("a", "html", "d2"))
            .unwrap();
        assert!(matches!(out, UpsertOutcome::Changed { .. }));
        assert_eq!(before.unwrap().kind, "markdown");
    }

    #[test]
    fn trackers_sharing_a_store_agree_on_identity() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let first = ResourceTracker::new(Arc::clone(&store));
        let second = ResourceTracker::new(store);

        let created = first.upsert(ResourceUpdate::new("a", "markdown", "d1")).unwrap();
        assert_eq!(
            second.upsert(ResourceUpdate::new("a", "markdown", "d1")).unwrap(),
            UpsertOutcome::Unchanged {
                resource: created.resource()
            }
        );
    }

    #[test]
    fn unchanged_does_not_rewrite_kind() {
        let t = tracker();
        t.upsert(ResourceUpdate::new("a", "markdown", "d1")).unwrap();
        t.upsert(ResourceUpdate::new("a", "html", "d1")).unwrap();
        assert_eq!(t.lookup("a").unwrap().unwrap().kind, "markdown");
    }

    #[test]
    fn get_missing_is_not_found() {
        assert_eq!(
            tracker().get("nope").unwrap(),
            GetOutcome::NotFound {
                locator: "nope".into()
            }
        );
    }

    #[test]
    fn list_filters_by_kind() {
        let t = tracker();
        t.upsert(ResourceUpdate::new("a", "markdown", "1")).unwrap();
        t.upsert(ResourceUpdate::new("b", "csv", "2")).unwrap();
        t.upsert(ResourceUpdate::new("c", "markdown", "3")).unwrap();

        assert_eq!(t.list(None).unwrap().len(), 3);
        let md: Vec<_> = t
            .list(Some("markdown"))
            .unwrap()
            .into_iter()
            .map(|r| r.locator)
            .collect();
        assert_eq!(md, vec!["a", "c"]);
    }

    #[test]
    fn remove_deletes_and_reports() {
        let t = tracker();
        let created = t.upsert(ResourceUpdate::new("a", "markdown", "1")).unwrap();
        assert_eq!(
            t.remove("a").unwrap(),
            RemoveOutcome::Ok {
                id: created.resource()
            }
        );
        assert!(matches!(
            t.remove("a").unwrap(),
            RemoveOutcome::NotFound { .. }
        ));
        // A later upsert is a brand-new resource.
        let again = t.upsert(ResourceUpdate::new("a", "markdown", "1")).unwrap();
        assert!(matches!(again, UpsertOutcome::Created { .. }));
        assert_ne!(again.resource(), created.resource());
    }

    #[test]
    fn diff_is_always_unknown() {
        let t = tracker();
        assert!(matches!(
            t.diff("a", "d1", "d1"),
            DiffOutcome::Unknown { .. }
        ));
        assert!(matches!(t.diff("a", "", "d2"), DiffOutcome::Unknown { .. }));
    }

    #[test]
    fn outcome_serializes_with_variant_tag() {
        let out = UpsertOutcome::Changed {
            resource: ResourceId::new(),
            previous_digest: "d1".into(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["variant"], "changed");
        assert_eq!(json["previousDigest"], "d1");
    }
}
