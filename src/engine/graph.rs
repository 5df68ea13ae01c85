//! Reference resolution.
//!
//! Builds the directed reference graph of a [`Library`] snapshot and checks it.
//! The graph is arena + index style: nodes live in a `Vec` sorted by document
//! ID, edges are adjacency lists of node indices. Index order therefore equals
//! ID order, which is what makes every traversal below deterministic without
//! extra sorting.
//!
//! ```text
//!   repo-root ──▶ base-backup        nodes: [base-backup, naming, repo-root]
//!       │                              edges: 0: []  1: []  2: [0, 1]
//!       └──────▶ naming
//! ```
//!
//! Problems are collected, never thrown: a single run reports every dangling
//! edge and every cycle. The dependency order (leaves first) only covers nodes
//! that are neither on a cycle nor depend on one.

use crate::{Document, DocumentId, Library, ResolveError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DocumentGraph {
    nodes: Vec<Arc<Document>>,
    index: HashMap<DocumentId, usize>,
    /// Outbound edges, sorted and deduplicated.
    edges: Vec<Vec<usize>>,
    /// Optional references whose target is not loaded: `(source, target)`.
    unresolved_optional: Vec<(DocumentId, DocumentId)>,
}

impl DocumentGraph {
    fn build(library: &Library) -> (DocumentGraph, Vec<ResolveError>) {
        let nodes: Vec<Arc<Document>> = library.documents().cloned().collect();
        let index: HashMap<DocumentId, usize> = nodes.iter().enumerate().map(|(i, d)| (d.id.clone(), i)).collect();
        let mut edges = Vec::with_capacity(nodes.len());
        let mut unresolved_optional = Vec::new();
        let mut errors = Vec::new();

        for doc in &nodes {
            let mut out = Vec::new();
            for (target, optional) in doc.referenced_documents() {
                match index.get(target) {
                    Some(&t) => out.push(t),
                    None if optional => unresolved_optional.push((doc.id.clone(), target.clone())),
                    None => errors
                        .push(ResolveError::UnresolvedReference { document: doc.id.clone(), target: target.clone() }),
                }
            }
            out.sort_unstable();
            out.dedup();
            edges.push(out);
        }

        (DocumentGraph { nodes, index, edges, unresolved_optional }, errors)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Arc<Document>> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.index.contains_key(id)
    }

    /// Resolved outbound references of `id`, in ID order.
    pub fn references(&self, id: &DocumentId) -> Vec<&DocumentId> {
        self.index.get(id).map(|&i| self.edges[i].iter().map(|&t| &self.nodes[t].id).collect()).unwrap_or_default()
    }

    /// External resources referenced by `id`. They are leaves and never expanded.
    pub fn externals(&self, id: &DocumentId) -> Vec<&str> {
        self.document(id)
            .map(|doc| {
                doc.references
                    .iter()
                    .filter_map(|r| match &r.target {
                        crate::ReferenceTarget::External(uri) => Some(uri.as_str()),
                        crate::ReferenceTarget::Document(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unresolved_optional(&self) -> &[(DocumentId, DocumentId)] {
        &self.unresolved_optional
    }

    /// Every document reachable from `id`, `id` included, in ID order.
    pub fn closure(&self, id: &DocumentId) -> Vec<DocumentId> {
        match self.index.get(id) {
            Some(&i) => self.closure_of(i).into_iter().map(|n| self.nodes[n].id.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Whether `to` is reachable from `from` (a node reaches itself).
    pub fn reaches(&self, from: &DocumentId, to: &DocumentId) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&f), Some(&t)) => self.closure_of(f).contains(&t),
            _ => false,
        }
    }

    pub(crate) fn closure_of(&self, start: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.edges[node].iter().copied().filter(|t| !seen.contains(t)));
            }
        }
        seen
    }

    pub(crate) fn index_of(&self, id: &DocumentId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn node(&self, i: usize) -> &Arc<Document> {
        &self.nodes[i]
    }

    /// Depth-first traversal with an explicit recursion stack. Each back edge
    /// yields one cycle, rotated so its smallest node comes first.
    fn cycles(&self) -> Vec<Vec<usize>> {
        const UNVISITED: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        let mut state = vec![UNVISITED; self.nodes.len()];
        let mut found: BTreeSet<Vec<usize>> = BTreeSet::new();

        for root in 0..self.nodes.len() {
            if state[root] != UNVISITED {
                continue;
            }
            // (node, next edge to follow)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            state[root] = ON_STACK;

            while let Some(&(node, cursor)) = stack.last() {
                let Some(&next) = self.edges[node].get(cursor) else {
                    state[node] = DONE;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match state[next] {
                    UNVISITED => {
                        state[next] = ON_STACK;
                        stack.push((next, 0));
                    }
                    ON_STACK => {
                        if let Some(pos) = stack.iter().position(|&(n, _)| n == next) {
                            let mut cycle: Vec<usize> = stack[pos..].iter().map(|&(n, _)| n).collect();
                            if let Some(min_pos) = cycle.iter().enumerate().min_by_key(|(_, n)| **n).map(|(i, _)| i) {
                                cycle.rotate_left(min_pos);
                            }
                            found.insert(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        found.into_iter().collect()
    }

    /// Kahn's algorithm over out-degree: a node is ready once everything it
    /// references has been emitted. Ready ties go to the smallest ID.
    fn dependency_order(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = self.edges.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (source, targets) in self.edges.iter().enumerate() {
            for &target in targets {
                dependents[target].push(source);
            }
        }

        let mut ready: BTreeSet<usize> = pending.iter().enumerate().filter(|(_, p)| **p == 0).map(|(i, _)| i).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &dependents[node] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }
}

/// Graph, dependency order and every problem found while building them.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub graph: DocumentGraph,
    /// Dependency order: every document appears after all documents it
    /// references. Documents on or above a cycle are absent.
    pub order: Vec<DocumentId>,
    pub errors: Vec<ResolveError>,
}

impl Resolution {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Reverse of [`Resolution::order`]: every edge source precedes its target.
    pub fn inclusion_order(&self) -> Vec<DocumentId> {
        self.order.iter().rev().cloned().collect()
    }

    /// Errors that break the subgraph reachable from `root`.
    pub fn errors_affecting(&self, root: &DocumentId) -> Vec<ResolveError> {
        let Some(start) = self.graph.index_of(root) else {
            return Vec::new();
        };
        let closure = self.graph.closure_of(start);
        self.errors
            .iter()
            .filter(|err| {
                err.documents().into_iter().any(|d| self.graph.index_of(d).is_some_and(|i| closure.contains(&i)))
            })
            .cloned()
            .collect()
    }
}

/// Build and check the reference graph of `library`.
pub(crate) fn resolve(library: &Library) -> Resolution {
    let (graph, mut errors) = DocumentGraph::build(library);

    for cycle in graph.cycles() {
        errors.push(ResolveError::CircularReference { path: cycle.into_iter().map(|n| graph.nodes[n].id.clone()).collect() });
    }

    let order: Vec<DocumentId> = graph.dependency_order().into_iter().map(|n| graph.nodes[n].id.clone()).collect();

    for err in &errors {
        tracing::debug!(%err, "reference problem");
    }
    tracing::debug!(
        documents = graph.len(),
        edges = graph.edges.iter().map(Vec::len).sum::<usize>(),
        ordered = order.len(),
        errors = errors.len(),
        "resolved library"
    );

    Resolution { graph, order, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse;
    use proptest::prelude::*;

    fn doc(id: &str, refs: &[&str]) -> Document {
        let mut raw = format!("## Must Have\n- {id}-1: rule of {id}\n");
        if !refs.is_empty() {
            raw.push_str("## References\n");
            for r in refs {
                raw.push_str(&format!("- {r}\n"));
            }
        }
        parse(&raw, DocumentId::new(id)).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<DocumentId> {
        names.iter().map(|n| DocumentId::new(*n)).collect()
    }

    #[test]
    fn order_is_leaves_first_with_id_tie_break() {
        let library = Library::new([doc("root", &["b", "a"]), doc("a", &["leaf"]), doc("b", &[]), doc("leaf", &[])]);
        let res = resolve(&library);

        assert!(res.is_ok());
        assert_eq!(res.order, ids(&["b", "leaf", "a", "root"]));
        assert_eq!(res.inclusion_order(), ids(&["root", "a", "leaf", "b"]));
        assert_eq!(res.graph.closure(&DocumentId::new("a")), ids(&["a", "leaf"]));
        assert!(res.graph.reaches(&DocumentId::new("root"), &DocumentId::new("leaf")));
        assert!(!res.graph.reaches(&DocumentId::new("b"), &DocumentId::new("a")));
    }

    #[test]
    fn two_node_cycle_is_reported_once() {
        let library = Library::new([doc("x", &["y"]), doc("y", &["x"])]);
        let res = resolve(&library);

        assert_eq!(res.errors, vec![ResolveError::CircularReference { path: ids(&["x", "y"]) }]);
        assert!(res.order.is_empty());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let library = Library::new([doc("solo", &["solo"]), doc("other", &[])]);
        let res = resolve(&library);

        assert_eq!(res.errors, vec![ResolveError::CircularReference { path: ids(&["solo"]) }]);
        assert_eq!(res.order, ids(&["other"]));
    }

    #[test]
    fn longer_cycle_names_every_node_from_the_smallest() {
        let library = Library::new([doc("c", &["a"]), doc("a", &["b"]), doc("b", &["c"]), doc("top", &["b"])]);
        let res = resolve(&library);

        assert_eq!(res.errors, vec![ResolveError::CircularReference { path: ids(&["a", "b", "c"]) }]);
        assert!(res.order.is_empty());
        assert_eq!(res.errors_affecting(&DocumentId::new("top")).len(), 1);
    }

    #[test]
    fn dangling_references_are_all_collected() {
        let library = Library::new([
            doc("a", &["missing-1"]),
            doc("b", &["missing-2", "a"]),
            doc("c", &["[Later](future-doc) (optional)", "https://example.com/guide"]),
        ]);
        let res = resolve(&library);

        assert_eq!(
            res.errors,
            vec![
                ResolveError::UnresolvedReference { document: DocumentId::new("a"), target: DocumentId::new("missing-1") },
                ResolveError::UnresolvedReference { document: DocumentId::new("b"), target: DocumentId::new("missing-2") },
            ]
        );
        assert_eq!(res.graph.unresolved_optional(), &[(DocumentId::new("c"), DocumentId::new("future-doc"))]);
        assert_eq!(res.graph.externals(&DocumentId::new("c")), vec!["https://example.com/guide"]);
        assert_eq!(res.order, ids(&["a", "b", "c"]));
        assert!(res.errors_affecting(&DocumentId::new("c")).is_empty());
        assert_eq!(res.errors_affecting(&DocumentId::new("b")).len(), 2);
    }

    proptest! {
        #[test]
        fn acyclic_graphs_order_every_edge(
            (names, edges) in (2usize..10).prop_flat_map(|n| {
                let names = Just((0..n).map(|i| format!("doc-{i:02}")).collect::<Vec<_>>()).prop_shuffle();
                let edges = prop::collection::vec((0..n, 0..n), 0..(n * 2));
                (names, edges)
            })
        ) {
            // Edges only go from a higher position to a lower one, so the
            // graph is acyclic whatever the shuffled names are.
            let n = names.len();
            let mut refs: Vec<Vec<&str>> = vec![Vec::new(); n];
            for (a, b) in &edges {
                if a > b {
                    refs[*a].push(names[*b].as_str());
                }
            }
            let library = Library::new((0..n).map(|i| doc(&names[i], &refs[i])));
            let res = resolve(&library);

            prop_assert!(res.is_ok());
            prop_assert_eq!(res.order.len(), n);
            let inclusion = res.inclusion_order();
            let position = |id: &str| inclusion.iter().position(|d| d.as_str() == id);
            for (source, targets) in refs.iter().enumerate() {
                for target in targets {
                    prop_assert!(position(&names[source]) < position(target));
                }
            }
        }
    }
}
