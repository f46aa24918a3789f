//! In-memory snapshot of the kind graph.
//!
//! A [`Topology`] is built once per [`KindGraph`](crate::kind::KindGraph)
//! query from the full kind and edge relations, then traversed without
//! touching the store again. It keeps two views of the same edges:
//!
//! - an adjacency list in edge insertion order, used wherever traversal
//!   order is observable (shortest routes break ties by it);
//! - a petgraph `DiGraph`, used for order-insensitive questions
//!   (reachability, downstream closure, topological order).

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::kind::{Kind, RouteHop, TransformEdge};

/// Immutable view of every kind and transform edge at one point in time.
#[derive(Debug, Clone)]
pub struct Topology {
    kinds: IndexMap<String, Kind>,
    edges: Vec<TransformEdge>,
    /// Outgoing edge indices per source kind, in insertion order.
    outgoing: HashMap<String, Vec<usize>>,
    graph: DiGraph<String, usize>,
    nodes: HashMap<String, NodeIndex>,
}

impl Topology {
    /// Builds a snapshot. `edges` must be in insertion order.
    pub fn build(kinds: Vec<Kind>, edges: Vec<TransformEdge>) -> Self {
        let kinds: IndexMap<String, Kind> =
            kinds.into_iter().map(|k| (k.name.clone(), k)).collect();

        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for name in kinds.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            let from = *nodes
                .entry(edge.from.clone())
                .or_insert_with(|| graph.add_node(edge.from.clone()));
            let to = *nodes
                .entry(edge.to.clone())
                .or_insert_with(|| graph.add_node(edge.to.clone()));
            graph.add_edge(from, to, idx);
            outgoing.entry(edge.from.clone()).or_default().push(idx);
        }

        Topology {
            kinds,
            edges,
            outgoing,
            graph,
            nodes,
        }
    }

    /// Resolves a kind reference given either as a name or as a kind id.
    ///
    /// Names win: a kind literally named like another kind's id resolves to
    /// itself.
    pub fn canonical(&self, reference: &str) -> Option<&str> {
        if let Some((name, _)) = self.kinds.get_key_value(reference) {
            return Some(name.as_str());
        }
        self.kinds
            .values()
            .find(|k| k.id.to_string() == reference)
            .map(|k| k.name.as_str())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.kinds.values()
    }

    pub fn edges(&self) -> &[TransformEdge] {
        &self.edges
    }

    /// Outgoing edges of `name`, in insertion order.
    pub fn outgoing(&self, name: &str) -> impl Iterator<Item = &TransformEdge> {
        self.outgoing
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }

    /// Incoming edges of `name`, in insertion order.
    pub fn incoming<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TransformEdge> {
        self.edges.iter().filter(move |e| e.to == name)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.outgoing(from).any(|e| e.to == to)
    }

    /// True if a directed path of zero or more edges leads from `from` to `to`.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => from == to,
        }
    }

    /// Whether adding `from -> to` would close a cycle.
    pub fn would_cycle(&self, from: &str, to: &str) -> bool {
        from == to || self.reaches(to, from)
    }

    /// Shortest hop sequence from `from` to `to` by breadth-first search.
    ///
    /// Among equally short routes the one whose edges were inserted first at
    /// each branching kind wins. Returns an empty path when `from == to`.
    pub fn shortest_route(&self, from: &str, to: &str) -> Option<Vec<RouteHop>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut via: HashMap<&str, &TransformEdge> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = Vec::new();
                let mut cursor = to;
                while let Some(&edge) = via.get(cursor) {
                    path.push(RouteHop::from(edge));
                    cursor = edge.from.as_str();
                }
                path.reverse();
                return Some(path);
            }
            for edge in self.outgoing(current) {
                if visited.insert(edge.to.as_str()) {
                    via.insert(edge.to.as_str(), edge);
                    queue.push_back(edge.to.as_str());
                }
            }
        }
        None
    }

    /// Every kind transitively reachable from `name`, excluding `name`.
    pub fn downstream(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(nx) = dfs.next(&self.graph) {
            if nx != start {
                out.push(self.graph[nx].clone());
            }
        }
        out
    }

    /// All kinds ordered so every edge points forward.
    ///
    /// `None` only if the stored edges already contain a cycle, which
    /// `connect` never lets happen.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        toposort(&self.graph, None)
            .ok()
            .map(|order| order.into_iter().map(|nx| self.graph[nx].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::KindId;

    fn kind(name: &str) -> Kind {
        Kind {
            id: KindId::new(),
            name: name.into(),
            category: "test".into(),
        }
    }

    fn edge(from: &str, to: &str, relation: &str) -> TransformEdge {
        TransformEdge {
            from: from.into(),
            to: to.into(),
            relation: relation.into(),
            transform: None,
        }
    }

    fn diamond() -> Topology {
        // a -> b -> d, a -> c -> d
        Topology::build(
            ["a", "b", "c", "d"].into_iter().map(kind).collect(),
            vec![
                edge("a", "b", "r1"),
                edge("a", "c", "r2"),
                edge("b", "d", "r3"),
                edge("c", "d", "r4"),
            ],
        )
    }

    #[test]
    fn canonical_accepts_name_or_id() {
        let topo = diamond();
        let id = topo.kinds().find(|k| k.name == "c").unwrap().id.to_string();
        assert_eq!(topo.canonical("c"), Some("c"));
        assert_eq!(topo.canonical(&id), Some("c"));
        assert_eq!(topo.canonical("zzz"), None);
    }

    #[test]
    fn route_prefers_first_inserted_branch() {
        let topo = diamond();
        let path = topo.shortest_route("a", "d").unwrap();
        let relations: Vec<_> = path.iter().map(|h| h.relation.as_str()).collect();
        assert_eq!(relations, vec!["r1", "r3"]);
    }

    #[test]
    fn route_is_shortest_by_hops() {
        // a -> b -> c -> d inserted first, then shortcut a -> d.
        let topo = Topology::build(
            ["a", "b", "c", "d"].into_iter().map(kind).collect(),
            vec![
                edge("a", "b", "x"),
                edge("b", "c", "x"),
                edge("c", "d", "x"),
                edge("a", "d", "shortcut"),
            ],
        );
        let path = topo.shortest_route("a", "d").unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].relation, "shortcut");
    }

    #[test]
    fn route_against_direction_is_none() {
        assert!(diamond().shortest_route("d", "a").is_none());
    }

    #[test]
    fn downstream_closure() {
        let topo = diamond();
        let mut down = topo.downstream("a");
        down.sort();
        assert_eq!(down, vec!["b", "c", "d"]);
        assert_eq!(topo.downstream("b"), vec!["d"]);
        assert!(topo.downstream("d").is_empty());
        assert!(topo.downstream("zzz").is_empty());
    }

    #[test]
    fn cycle_detection() {
        let topo = diamond();
        assert!(topo.would_cycle("d", "a"));
        assert!(topo.would_cycle("b", "b"));
        assert!(!topo.would_cycle("a", "d"));
        assert!(!topo.would_cycle("b", "c"));
    }

    #[test]
    fn topological_order_respects_edges() {
        let topo = diamond();
        let order = topo.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|k| k == n).unwrap();
        for e in topo.edges() {
            assert!(pos(&e.from) < pos(&e.to), "{} before {}", e.from, e.to);
        }
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn incoming_and_outgoing() {
        let topo = diamond();
        let into_d: Vec<_> = topo.incoming("d").map(|e| e.from.as_str()).collect();
        assert_eq!(into_d, vec!["b", "c"]);
        let out_a: Vec<_> = topo.outgoing("a").map(|e| e.to.as_str()).collect();
        assert_eq!(out_a, vec!["b", "c"]);
        assert!(topo.has_edge("a", "b"));
        assert!(!topo.has_edge("a", "d"));
    }
}
