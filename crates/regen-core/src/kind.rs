//! The kind graph: artifact kinds and the legal transforms between them.
//!
//! [`KindGraph`] owns the `kind` and `edge` relations. Edges form a DAG over
//! kind names; `connect` refuses any edge that would close a cycle, and the
//! check-then-insert sequence runs as one exclusive section of the store, so
//! two connects can never jointly sneak a cycle in, even from separate
//! graphs or processes sharing the data. Queries load one [`Topology`]
//! snapshot per call inside the same scope.
//!
//! Every operation accepts a kind either by name or by id and canonicalizes
//! it to the name once, at the boundary.

use regen_storage::RecordStore;
use serde::{Deserialize, Serialize};

use crate::convert::{exclusive, load, load_all, save, SharedStore};
use crate::error::{CoreError, CoreResult};
use crate::id::KindId;
use crate::topology::Topology;

pub(crate) const KINDS: &str = "kind";
pub(crate) const EDGES: &str = "edge";

/// Exclusive-section scope covering the whole graph.
const GRAPH_SCOPE: &str = "kind/*";

/// A named category of intermediate representation or artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kind {
    pub id: KindId,
    pub name: String,
    pub category: String,
}

/// A declared conversion from one kind to another, keyed by `(from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default)]
    pub transform: Option<String>,
}

/// One step of a route: the kind arrived at and the edge used to get there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteHop {
    pub kind: String,
    pub relation: String,
    pub transform: Option<String>,
}

impl From<&TransformEdge> for RouteHop {
    fn from(edge: &TransformEdge) -> Self {
        RouteHop {
            kind: edge.to.clone(),
            relation: edge.relation.clone(),
            transform: edge.transform.clone(),
        }
    }
}

/// A direct incoming transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub from_kind: String,
    pub transform_name: Option<String>,
}

/// A direct outgoing transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub to_kind: String,
    pub transform_name: Option<String>,
}

/// Full picture of the graph for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub kinds: Vec<Kind>,
    pub edges: Vec<TransformEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum DefineOutcome {
    Ok { id: KindId },
    /// Already defined; the stored category is left as it was.
    Exists { id: KindId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum ConnectOutcome {
    Ok,
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum RouteOutcome {
    Ok { path: Vec<RouteHop> },
    Unreachable { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum ValidateOutcome {
    Ok,
    Invalid {
        message: String,
        /// Kinds `from` can be transformed into directly.
        suggestions: Vec<String>,
    },
}

/// The DAG of kinds and transform edges.
pub struct KindGraph {
    store: SharedStore,
}

fn edge_key(from: &str, to: &str) -> String {
    // JSON keeps the pair unambiguous whatever characters names contain.
    serde_json::json!([from, to]).to_string()
}

impl KindGraph {
    pub fn new(store: SharedStore) -> Self {
        KindGraph { store }
    }

    /// A consistent snapshot of the whole graph.
    pub fn topology(&self) -> CoreResult<Topology> {
        exclusive(&*self.store, GRAPH_SCOPE, load_topology)
    }

    /// Defines a kind. Idempotent: a repeat definition reports `Exists`.
    pub fn define(&self, name: &str, category: &str) -> CoreResult<DefineOutcome> {
        exclusive(&*self.store, GRAPH_SCOPE, |tx| {
            if let Some(existing) = load::<Kind>(tx, KINDS, name)? {
                return Ok(DefineOutcome::Exists { id: existing.id });
            }
            let kind = Kind {
                id: KindId::new(),
                name: name.to_string(),
                category: category.to_string(),
            };
            save(tx, KINDS, name, &kind)?;
            tracing::info!(kind = name, category, id = %kind.id, "kind defined");
            Ok(DefineOutcome::Ok { id: kind.id })
        })
    }

    /// Declares a transform from `from` to `to`.
    ///
    /// Rejects undefined kinds and any edge that would close a cycle,
    /// including self-loops. A second connect of the same pair replaces the
    /// earlier edge.
    pub fn connect(
        &self,
        from: &str,
        to: &str,
        relation: &str,
        transform: Option<&str>,
    ) -> CoreResult<ConnectOutcome> {
        exclusive(&*self.store, GRAPH_SCOPE, |tx| {
            connect_in(tx, from, to, relation, transform)
        })
    }

    /// Shortest transform route from `from` to `to`.
    pub fn route(&self, from: &str, to: &str) -> CoreResult<RouteOutcome> {
        let topo = self.topology()?;
        let (Some(src), Some(dst)) = (topo.canonical(from), topo.canonical(to)) else {
            return Ok(RouteOutcome::Unreachable {
                message: format!("no path from '{from}' to '{to}': kind not defined"),
            });
        };
        Ok(match topo.shortest_route(src, dst) {
            Some(path) => RouteOutcome::Ok { path },
            None => RouteOutcome::Unreachable {
                message: format!("no path from '{src}' to '{dst}'"),
            },
        })
    }

    /// Ok only when a direct edge `from -> to` exists.
    pub fn validate(&self, from: &str, to: &str) -> CoreResult<ValidateOutcome> {
        let topo = self.topology()?;
        let src = topo.canonical(from);
        let dst = topo.canonical(to);

        if let (Some(s), Some(d)) = (src, dst) {
            if topo.has_edge(s, d) {
                return Ok(ValidateOutcome::Ok);
            }
        }

        let suggestions = src
            .map(|s| topo.outgoing(s).map(|e| e.to.clone()).collect())
            .unwrap_or_default();
        let message = match (src, dst) {
            (None, _) => format!("kind '{from}' is not defined"),
            (_, None) => format!("kind '{to}' is not defined"),
            (Some(s), Some(d)) => format!("no direct transform from '{s}' to '{d}'"),
        };
        Ok(ValidateOutcome::Invalid {
            message,
            suggestions,
        })
    }

    /// Every kind transitively downstream of `kind`.
    pub fn dependents(&self, kind: &str) -> CoreResult<Vec<String>> {
        let topo = self.topology()?;
        Ok(topo
            .canonical(kind)
            .map(|k| topo.downstream(k))
            .unwrap_or_default())
    }

    /// Direct incoming transforms of `kind`.
    pub fn producers(&self, kind: &str) -> CoreResult<Vec<Producer>> {
        let topo = self.topology()?;
        let Some(k) = topo.canonical(kind) else {
            return Ok(Vec::new());
        };
        Ok(topo
            .incoming(k)
            .map(|e| Producer {
                from_kind: e.from.clone(),
                transform_name: e.transform.clone(),
            })
            .collect())
    }

    /// Direct outgoing transforms of `kind`.
    pub fn consumers(&self, kind: &str) -> CoreResult<Vec<Consumer>> {
        let topo = self.topology()?;
        let Some(k) = topo.canonical(kind) else {
            return Ok(Vec::new());
        };
        Ok(topo
            .outgoing(k)
            .map(|e| Consumer {
                to_kind: e.to.clone(),
                transform_name: e.transform.clone(),
            })
            .collect())
    }

    pub fn graph(&self) -> CoreResult<GraphSnapshot> {
        let topo = self.topology()?;
        Ok(GraphSnapshot {
            kinds: topo.kinds().cloned().collect(),
            edges: topo.edges().to_vec(),
        })
    }

    /// All kinds in an order where every transform points forward.
    ///
    /// Stored edges that form a cycle can only come from writes that went
    /// around [`connect`](Self::connect) and are reported as corrupt.
    pub fn build_order(&self) -> CoreResult<Vec<String>> {
        self.topology()?
            .topological_order()
            .ok_or_else(|| CoreError::CorruptRecord {
                relation: EDGES,
                key: "*".to_string(),
                reason: "stored transform edges contain a cycle".to_string(),
            })
    }
}

fn load_topology(store: &dyn RecordStore) -> CoreResult<Topology> {
    let kinds: Vec<Kind> = load_all(store, KINDS, None)?;
    let edges: Vec<TransformEdge> = load_all(store, EDGES, None)?;
    Ok(Topology::build(kinds, edges))
}

fn connect_in(
    tx: &dyn RecordStore,
    from: &str,
    to: &str,
    relation: &str,
    transform: Option<&str>,
) -> CoreResult<ConnectOutcome> {
    let topo = load_topology(tx)?;

    let (from, to) = match (topo.canonical(from), topo.canonical(to)) {
        (Some(f), Some(t)) => (f, t),
        (f, _) => {
            let missing = if f.is_none() { from } else { to };
            return Ok(ConnectOutcome::Invalid {
                message: format!("kind '{missing}' is not defined"),
            });
        }
    };

    if topo.would_cycle(from, to) {
        tracing::debug!(from, to, "connect rejected: cycle");
        let message = if from == to {
            format!("self-loop on '{from}' is not allowed")
        } else {
            format!("edge '{from}' -> '{to}' would create a cycle")
        };
        return Ok(ConnectOutcome::Invalid { message });
    }

    let edge = TransformEdge {
        from: from.to_string(),
        to: to.to_string(),
        relation: relation.to_string(),
        transform: transform.map(str::to_string),
    };
    save(tx, EDGES, &edge_key(from, to), &edge)?;
    tracing::info!(from, to, relation, "transform edge connected");
    Ok(ConnectOutcome::Ok)
}
