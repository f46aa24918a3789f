//! Memoization of generation steps.
//!
//! [`BuildCache`] keeps one [`CacheEntry`] per step key and answers whether a
//! step must re-run: a step is reusable only when it is deterministic, its
//! entry is not stale and the stored input hash equals the new one.
//! Invalidation flags entries stale and never deletes them.
//!
//! Every read-modify-write on an entry runs as an exclusive section of the
//! store scoped to its step key. Batch invalidations scan the relation once,
//! then re-read each candidate in its own section before flagging it, so a
//! concurrent `record` is never overwritten with the fields it just
//! replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::convert::{exclusive, load, load_all, save, SharedStore};
use crate::error::CoreResult;
use crate::id::EntryId;

pub(crate) const ENTRIES: &str = "entry";

/// Cache behavior switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// When set, `invalidate_by_kind` only matches entries whose stored kind
    /// equals the requested one. When clear, entries recorded without a kind
    /// also match if their step key contains the kind name.
    pub strict_kind_matching: bool,
}

/// Memoized result of one generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: EntryId,
    pub step_key: String,
    pub input_hash: String,
    pub output_hash: String,
    #[serde(default)]
    pub output_ref: Option<String>,
    #[serde(default)]
    pub source_locator: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    pub deterministic: bool,
    pub last_run: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

/// The outcome of running a step, as handed to [`BuildCache::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step_key: String,
    pub input_hash: String,
    pub output_hash: String,
    pub output_ref: Option<String>,
    pub source_locator: Option<String>,
    pub kind: Option<String>,
    pub deterministic: bool,
}

impl StepRecord {
    pub fn new(
        step_key: impl Into<String>,
        input_hash: impl Into<String>,
        output_hash: impl Into<String>,
    ) -> Self {
        StepRecord {
            step_key: step_key.into(),
            input_hash: input_hash.into(),
            output_hash: output_hash.into(),
            output_ref: None,
            source_locator: None,
            kind: None,
            deterministic: true,
        }
    }

    pub fn output_ref(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }

    pub fn source(mut self, locator: impl Into<String>) -> Self {
        self.source_locator = Some(locator.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum CheckOutcome {
    /// The stored output can be reused.
    #[serde(rename_all = "camelCase")]
    Unchanged {
        last_run: DateTime<Utc>,
        output_ref: Option<String>,
    },
    /// The step must re-run. `previous_hash` is the stored input hash, if any.
    #[serde(rename_all = "camelCase")]
    Changed { previous_hash: Option<String> },
}

impl CheckOutcome {
    pub fn must_rerun(&self) -> bool {
        matches!(self, CheckOutcome::Changed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum InvalidateOutcome {
    Ok,
    #[serde(rename_all = "camelCase")]
    NotFound { step_key: String },
}

/// One row of [`BuildCache::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStatus {
    pub step_key: String,
    pub input_hash: String,
    pub last_run: DateTime<Utc>,
    pub stale: bool,
}

impl From<CacheEntry> for EntryStatus {
    fn from(entry: CacheEntry) -> Self {
        EntryStatus {
            step_key: entry.step_key,
            input_hash: entry.input_hash,
            last_run: entry.last_run,
            stale: entry.stale,
        }
    }
}

/// Per-step memoization store.
pub struct BuildCache {
    store: SharedStore,
    config: CacheConfig,
}

/// Exclusive-section scope guarding one step key.
fn scope(step_key: &str) -> String {
    format!("{ENTRIES}/{step_key}")
}

impl BuildCache {
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: SharedStore, config: CacheConfig) -> Self {
        BuildCache { store, config }
    }

    /// Decides whether `step_key` must re-run for `input_hash`.
    pub fn check(
        &self,
        step_key: &str,
        input_hash: &str,
        deterministic: bool,
    ) -> CoreResult<CheckOutcome> {
        // A single read; nothing to serialize.
        let Some(entry) = self.entry(step_key)? else {
            return Ok(CheckOutcome::Changed {
                previous_hash: None,
            });
        };

        let reason = if !deterministic {
            Some("non-deterministic")
        } else if entry.stale {
            Some("stale")
        } else if entry.input_hash != input_hash {
            Some("input changed")
        } else {
            None
        };

        Ok(match reason {
            Some(reason) => {
                tracing::debug!(step = step_key, reason, "cache miss");
                CheckOutcome::Changed {
                    previous_hash: Some(entry.input_hash),
                }
            }
            None => {
                tracing::debug!(step = step_key, "cache hit");
                CheckOutcome::Unchanged {
                    last_run: entry.last_run,
                    output_ref: entry.output_ref,
                }
            }
        })
    }

    /// Stores the result of a run. The entry id survives updates; the stale
    /// flag is cleared and `last_run` set to now.
    pub fn record(&self, step: StepRecord) -> CoreResult<EntryId> {
        let key = step.step_key.clone();
        exclusive(&*self.store, &scope(&key), |tx| {
            let id = load::<CacheEntry>(tx, ENTRIES, &key)?
                .map(|existing| existing.id)
                .unwrap_or_default();
            let entry = CacheEntry {
                id,
                step_key: step.step_key,
                input_hash: step.input_hash,
                output_hash: step.output_hash,
                output_ref: step.output_ref,
                source_locator: step.source_locator,
                kind: step.kind,
                deterministic: step.deterministic,
                last_run: Utc::now(),
                stale: false,
            };
            save(tx, ENTRIES, &key, &entry)?;
            tracing::debug!(step = %key, %id, "step recorded");
            Ok(id)
        })
    }

    /// Flags one entry stale.
    pub fn invalidate(&self, step_key: &str) -> CoreResult<InvalidateOutcome> {
        exclusive(&*self.store, &scope(step_key), |tx| {
            let Some(mut entry) = load::<CacheEntry>(tx, ENTRIES, step_key)? else {
                return Ok(InvalidateOutcome::NotFound {
                    step_key: step_key.to_string(),
                });
            };
            entry.stale = true;
            save(tx, ENTRIES, step_key, &entry)?;
            Ok(InvalidateOutcome::Ok)
        })
    }

    /// Flags every entry recorded against exactly `locator`.
    pub fn invalidate_by_source(&self, locator: &str) -> CoreResult<Vec<String>> {
        let flagged = self.invalidate_matching(|entry| {
            entry.source_locator.as_deref() == Some(locator)
        })?;
        if !flagged.is_empty() {
            tracing::info!(%locator, count = flagged.len(), "invalidated by source");
        }
        Ok(step_keys(flagged))
    }

    /// Flags every entry of `kind`.
    ///
    /// Entries recorded without a kind match when their step key contains
    /// `kind`, unless [`CacheConfig::strict_kind_matching`] is set.
    pub fn invalidate_by_kind(&self, kind: &str) -> CoreResult<Vec<String>> {
        let strict = self.config.strict_kind_matching;
        let flagged = self.invalidate_matching(|entry| match entry.kind.as_deref() {
            Some(stored) => stored == kind,
            None => !strict && entry.step_key.contains(kind),
        })?;
        for entry in flagged.iter().filter(|e| e.kind.is_none()) {
            tracing::warn!(
                step = %entry.step_key,
                kind,
                "entry has no recorded kind; matched by step key substring"
            );
        }
        if !flagged.is_empty() {
            tracing::info!(kind, count = flagged.len(), "invalidated by kind");
        }
        Ok(step_keys(flagged))
    }

    /// Flags every entry stale and returns how many there were.
    pub fn invalidate_all(&self) -> CoreResult<usize> {
        let cleared = self.invalidate_matching(|_| true)?.len();
        tracing::info!(cleared, "invalidated all entries");
        Ok(cleared)
    }

    pub fn status(&self) -> CoreResult<Vec<EntryStatus>> {
        Ok(self.entries()?.into_iter().map(EntryStatus::from).collect())
    }

    pub fn stale_steps(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.stale)
            .map(|e| e.step_key)
            .collect())
    }

    /// Full stored entry for `step_key`.
    pub fn entry(&self, step_key: &str) -> CoreResult<Option<CacheEntry>> {
        load(&*self.store, ENTRIES, step_key)
    }

    pub fn entries(&self) -> CoreResult<Vec<CacheEntry>> {
        load_all(&*self.store, ENTRIES, None)
    }

    /// Flags every entry satisfying `matches` and returns them as saved.
    fn invalidate_matching(
        &self,
        matches: impl Fn(&CacheEntry) -> bool,
    ) -> CoreResult<Vec<CacheEntry>> {
        let candidates: Vec<String> = self
            .entries()?
            .into_iter()
            .filter(|e| matches(e))
            .map(|e| e.step_key)
            .collect();

        let mut invalidated = Vec::with_capacity(candidates.len());
        for key in candidates {
            let flagged = exclusive(&*self.store, &scope(&key), |tx| {
                let Some(mut current) = load::<CacheEntry>(tx, ENTRIES, &key)? else {
                    return Ok(None);
                };
                if !matches(&current) {
                    return Ok(None);
                }
                current.stale = true;
                save(tx, ENTRIES, &key, &current)?;
                Ok(Some(current))
            })?;
            invalidated.extend(flagged);
        }
        Ok(invalidated)
    }
}

fn step_keys(entries: Vec<CacheEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.step_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use regen_storage::InMemoryStore;

    fn cache() -> BuildCache {
        BuildCache::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn unseen_step_is_changed_without_previous() {
        assert_eq!(
            cache().check("s", "h", true).unwrap(),
            CheckOutcome::Changed {
                previous_hash: None
            }
        );
    }

    #[test]
    fn record_then_check() {
        let c = cache();
        c.record(StepRecord::new("s", "h1", "o1").output_ref("out/s"))
            .unwrap();

        match c.check("s", "h1", true).unwrap() {
            CheckOutcome::Unchanged { output_ref, .. } => {
                assert_eq!(output_ref.as_deref(), Some("out/s"));
            }
            other => panic!("expected Unchanged, got {other:?}"),
        }
        assert_eq!(
            c.check("s", "h2", true).unwrap(),
            CheckOutcome::Changed {
                previous_hash: Some("h1".into())
            }
        );
    }

    #[test]
    fn non_deterministic_always_reruns() {
        let c = cache();
        c.record(StepRecord::new("s", "h1", "o1").deterministic(false))
            .unwrap();
        assert_eq!(
            c.check("s", "h1", false).unwrap(),
            CheckOutcome::Changed {
                previous_hash: Some("h1".into())
            }
        );
    }

    #[test]
    fn invalidate_forces_rerun_until_recorded_again() {
        let c = cache();
        let id = c.record(StepRecord::new("s", "h1", "o1")).unwrap();

        assert_eq!(c.invalidate("s").unwrap(), InvalidateOutcome::Ok);
        assert!(c.check("s", "h1", true).unwrap().must_rerun());
        assert_eq!(c.stale_steps().unwrap(), vec!["s"]);

        let again = c.record(StepRecord::new("s", "h1", "o1")).unwrap();
        assert_eq!(again, id);
        assert!(!c.check("s", "h1", true).unwrap().must_rerun());
        assert!(c.stale_steps().unwrap().is_empty());
    }

    #[test]
    fn invalidate_missing_is_not_found() {
        assert_eq!(
            cache().invalidate("ghost").unwrap(),
            InvalidateOutcome::NotFound {
                step_key: "ghost".into()
            }
        );
    }

    #[test]
    fn invalidate_by_source_is_exact() {
        let c = cache();
        c.record(StepRecord::new("a", "h", "o").source("docs/a.md"))
            .unwrap();
        c.record(StepRecord::new("b", "h", "o").source("docs/a.md.bak"))
            .unwrap();
        c.record(StepRecord::new("c", "h", "o")).unwrap();

        assert_eq!(c.invalidate_by_source("docs/a.md").unwrap(), vec!["a"]);
        assert_eq!(c.stale_steps().unwrap(), vec!["a"]);
    }

    #[test]
    fn invalidate_by_kind_exact_and_fallback() {
        let c = cache();
        c.record(StepRecord::new("render-1", "h", "o").kind("html"))
            .unwrap();
        c.record(StepRecord::new("render-2", "h", "o").kind("pdf"))
            .unwrap();
        c.record(StepRecord::new("html:legacy", "h", "o")).unwrap();

        let mut hit = c.invalidate_by_kind("html").unwrap();
        hit.sort();
        assert_eq!(hit, vec!["html:legacy", "render-1"]);
    }

    #[test]
    fn strict_kind_matching_skips_fallback() {
        let c = BuildCache::with_config(
            Arc::new(InMemoryStore::new()),
            CacheConfig {
                strict_kind_matching: true,
            },
        );
        c.record(StepRecord::new("html:legacy", "h", "o")).unwrap();
        assert!(c.invalidate_by_kind("html").unwrap().is_empty());
    }

    #[test]
    fn stored_kind_is_not_substring_matched() {
        let c = cache();
        c.record(StepRecord::new("html-step", "h", "o").kind("pdf"))
            .unwrap();
        assert!(c.invalidate_by_kind("html").unwrap().is_empty());
    }

    #[test]
    fn invalidate_all_counts_and_keeps_entries() {
        let c = cache();
        for k in ["a", "b", "c"] {
            c.record(StepRecord::new(k, "h", "o")).unwrap();
        }
        assert_eq!(c.invalidate_all().unwrap(), 3);
        let status = c.status().unwrap();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| s.stale));
    }

    #[test]
    fn status_reports_every_entry() {
        let c = cache();
        c.record(StepRecord::new("a", "h1", "o")).unwrap();
        c.record(StepRecord::new("b", "h2", "o")).unwrap();
        c.invalidate("b").unwrap();

        let status = c.status().unwrap();
        assert_eq!(status[0].step_key, "a");
        assert_eq!(status[0].input_hash, "h1");
        assert!(!status[0].stale);
        assert!(status[1].stale);
    }

    #[test]
    fn check_outcome_serializes_camel_case() {
        let json = serde_json::to_value(CheckOutcome::Changed {
            previous_hash: None,
        })
        .unwrap();
        assert_eq!(json["variant"], "changed");
        assert!(json["previousHash"].is_null());
    }
}
