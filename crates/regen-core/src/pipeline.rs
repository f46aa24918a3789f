//! Cascading invalidation across the three components.
//!
//! A [`Pipeline`] owns a [`ResourceTracker`], a [`KindGraph`] and a
//! [`BuildCache`] over one shared store. When an observed resource changes,
//! every cache entry recorded against its locator and every entry of a kind
//! downstream of the resource's kind is flagged stale. A change that also
//! moves the resource to another kind cascades from both kinds.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::cache::{BuildCache, CacheConfig, CheckOutcome};
use crate::convert::SharedStore;
use crate::error::CoreResult;
use crate::kind::KindGraph;
use crate::resource::{RemoveOutcome, ResourceTracker, ResourceUpdate, UpsertOutcome};
use crate::topology::Topology;

/// What [`Pipeline::observe`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserveReport {
    pub outcome: UpsertOutcome,
    /// Kinds downstream of the resource's kind, and of its previous kind
    /// when the update moved it. Empty unless it changed.
    pub affected_kinds: Vec<String>,
    /// Step keys flagged stale, sorted and de-duplicated.
    pub invalidated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetReport {
    pub outcome: RemoveOutcome,
    pub invalidated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindChangeReport {
    pub affected_kinds: Vec<String>,
    pub invalidated: Vec<String>,
}

/// A step the caller is about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub step_key: String,
    pub input_hash: String,
    pub deterministic: bool,
}

impl Candidate {
    pub fn new(step_key: impl Into<String>, input_hash: impl Into<String>) -> Self {
        Candidate {
            step_key: step_key.into(),
            input_hash: input_hash.into(),
            deterministic: true,
        }
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }
}

/// Candidates split by whether they must run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub rerun: Vec<String>,
    pub cached: Vec<String>,
}

pub struct Pipeline {
    resources: ResourceTracker,
    kinds: KindGraph,
    cache: BuildCache,
}

impl Pipeline {
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: SharedStore, config: CacheConfig) -> Self {
        Pipeline {
            resources: ResourceTracker::new(store.clone()),
            kinds: KindGraph::new(store.clone()),
            cache: BuildCache::with_config(store, config),
        }
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    pub fn kinds(&self) -> &KindGraph {
        &self.kinds
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Records a resource observation and cascades a digest change.
    pub fn observe(&self, update: ResourceUpdate) -> CoreResult<ObserveReport> {
        let locator = update.locator.clone();
        let kind = update.kind.clone();
        let (outcome, previous) = self.resources.upsert_replacing(update)?;

        if !matches!(outcome, UpsertOutcome::Changed { .. }) {
            return Ok(ObserveReport {
                outcome,
                affected_kinds: Vec::new(),
                invalidated: Vec::new(),
            });
        }

        let mut invalidated: BTreeSet<String> =
            self.cache.invalidate_by_source(&locator)?.into_iter().collect();
        let topo = self.kinds.topology()?;
        let mut affected_kinds = downstream_of(&topo, &kind);
        if let Some(previous) = previous.filter(|p| p.kind != kind) {
            for k in downstream_of(&topo, &previous.kind) {
                if !affected_kinds.contains(&k) {
                    affected_kinds.push(k);
                }
            }
        }
        for downstream in &affected_kinds {
            invalidated.extend(self.cache.invalidate_by_kind(downstream)?);
        }

        tracing::info!(
            %locator,
            kinds = affected_kinds.len(),
            steps = invalidated.len(),
            "resource change cascaded"
        );
        Ok(ObserveReport {
            outcome,
            affected_kinds,
            invalidated: invalidated.into_iter().collect(),
        })
    }

    /// Stops tracking a resource and invalidates what was built from it.
    pub fn forget(&self, locator: &str) -> CoreResult<ForgetReport> {
        let outcome = self.resources.remove(locator)?;
        let invalidated = match outcome {
            RemoveOutcome::Ok { .. } => {
                let mut keys = self.cache.invalidate_by_source(locator)?;
                keys.sort();
                keys
            }
            RemoveOutcome::NotFound { .. } => Vec::new(),
        };
        Ok(ForgetReport {
            outcome,
            invalidated,
        })
    }

    /// Invalidates `kind` and every kind downstream of it.
    ///
    /// `kind` may be a name or a kind id. An undefined reference is used as
    /// given, so entries recorded under it still get flagged.
    pub fn kind_changed(&self, kind: &str) -> CoreResult<KindChangeReport> {
        let topo = self.kinds.topology()?;
        let kind = topo.canonical(kind).unwrap_or(kind);
        let downstream = topo.downstream(kind);
        let mut invalidated: BTreeSet<String> =
            self.cache.invalidate_by_kind(kind)?.into_iter().collect();
        for k in &downstream {
            invalidated.extend(self.cache.invalidate_by_kind(k)?);
        }

        let mut affected_kinds = Vec::with_capacity(downstream.len() + 1);
        affected_kinds.push(kind.to_string());
        affected_kinds.extend(downstream);
        Ok(KindChangeReport {
            affected_kinds,
            invalidated: invalidated.into_iter().collect(),
        })
    }

    /// Checks each candidate and splits them into rerun and cached, keeping
    /// input order within each side.
    pub fn plan(&self, candidates: &[Candidate]) -> CoreResult<Plan> {
        let mut plan = Plan::default();
        for c in candidates {
            match self.cache.check(&c.step_key, &c.input_hash, c.deterministic)? {
                CheckOutcome::Changed { .. } => plan.rerun.push(c.step_key.clone()),
                CheckOutcome::Unchanged { .. } => plan.cached.push(c.step_key.clone()),
            }
        }
        Ok(plan)
    }
}

/// Kinds downstream of a kind given by name or id.
fn downstream_of(topo: &Topology, kind: &str) -> Vec<String> {
    topo.canonical(kind)
        .map(|k| topo.downstream(k))
        .unwrap_or_default()
}
