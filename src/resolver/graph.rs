// src/resolver/graph.rs

//! Package dependency graph for build ordering
//!
//! A directed graph of packages where an edge `a -> b` means `a` depends on
//! `b`. Build order comes from Kahn's algorithm with a lexical tie-break, so
//! the same graph always yields the same order.
//!
//! # Example
//!
//! ```
//! use formulary::recipe::EdgeKind;
//! use formulary::resolver::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_edge("wireshark", "glib", EdgeKind::Required);
//! graph.add_edge("wireshark", "pkg-config", EdgeKind::Build);
//! graph.add_edge("glib", "pkg-config", EdgeKind::Build);
//!
//! let order = graph.topological_sort().unwrap();
//! assert_eq!(order, vec!["pkg-config", "glib", "wireshark"]);
//! ```

use crate::error::{Error, Result};
use crate::recipe::EdgeKind;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A directed graph of package dependencies tagged with edge kinds
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Key: package, Value: packages it depends on and the edge kind
    edges: BTreeMap<String, BTreeMap<String, EdgeKind>>,
    /// Key: package, Value: packages that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package with no edges (no-op if present)
    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();
    }

    /// Add an edge `from -> to`
    ///
    /// When the pair is declared more than once, a runtime kind takes
    /// precedence over a build-only one.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) {
        self.add_node(from);
        self.add_node(to);

        if let Some(deps) = self.edges.get_mut(from) {
            deps.entry(to.to_string())
                .and_modify(|existing| {
                    if *existing == EdgeKind::Build {
                        *existing = kind;
                    }
                })
                .or_insert(kind);
        }
        if let Some(dependents) = self.reverse_edges.get_mut(to) {
            dependents.insert(from.to_string());
        }
    }

    /// Number of packages in the graph
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// All packages, in lexical order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Direct dependencies of a package with their edge kinds
    pub fn dependencies(&self, name: &str) -> Option<&BTreeMap<String, EdgeKind>> {
        self.edges.get(name)
    }

    /// Packages that directly depend on this one
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Kind of the edge `from -> to`, if present
    pub fn edge_kind(&self, from: &str, to: &str) -> Option<EdgeKind> {
        self.edges.get(from).and_then(|deps| deps.get(to)).copied()
    }

    /// Topological sort using Kahn's algorithm
    ///
    /// Returns packages in build order (dependencies before dependents). Among
    /// packages that are ready at the same time, the lexically smallest goes
    /// first. A cycle fails with [`Error::Cycle`] naming one offending cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        // In-degree of a node is the number of its unbuilt prerequisites
        let mut in_degrees: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = ready.pop_first() {
            result.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            let cycle = self.find_cycles().into_iter().next().unwrap_or_else(|| {
                // Unreachable for a consistent graph; name what is left
                self.edges
                    .keys()
                    .filter(|k| !result.contains(*k))
                    .cloned()
                    .collect()
            });
            return Err(Error::Cycle { cycle });
        }

        Ok(result)
    }

    /// Find cycles in the graph
    ///
    /// Each cycle is returned as a closed path, e.g. `["a", "b", "a"]`.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if !visited.contains(start.as_str()) {
                self.find_cycles_dfs(start, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn find_cycles_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        rec_stack: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps.keys() {
                if !visited.contains(dep.as_str()) {
                    self.find_cycles_dfs(dep, visited, rec_stack, path, cycles);
                } else if rec_stack.contains(dep.as_str())
                    && let Some(start) = path.iter().position(|x| *x == dep.as_str())
                {
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    cycles.push(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
    }

    /// Packages reachable from `root`, including `root`
    pub fn reachable_from(&self, root: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root.to_string()]);

        while let Some(node) = queue.pop_front() {
            if !self.contains(&node) || !seen.insert(node.clone()) {
                continue;
            }
            if let Some(deps) = self.edges.get(&node) {
                queue.extend(deps.keys().filter(|d| !seen.contains(*d)).cloned());
            }
        }

        seen
    }

    /// Subgraph induced by a set of packages
    pub fn restricted_to(&self, keep: &BTreeSet<String>) -> Self {
        let mut graph = Self::new();
        for name in keep.iter().filter(|n| self.contains(n)) {
            graph.add_node(name);
        }
        for (from, deps) in self.edges.iter().filter(|(n, _)| keep.contains(*n)) {
            for (to, kind) in deps.iter().filter(|(d, _)| keep.contains(*d)) {
                graph.add_edge(from, to, *kind);
            }
        }
        graph
    }

    /// All packages that transitively depend on `name`
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut dependents = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        if let Some(direct) = self.reverse_edges.get(name) {
            queue.extend(direct.iter().cloned());
        }

        while let Some(dep) = queue.pop_front() {
            if dependents.insert(dep.clone())
                && let Some(indirect) = self.reverse_edges.get(&dep)
            {
                queue.extend(indirect.iter().filter(|i| !dependents.contains(*i)).cloned());
            }
        }

        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (from, to) in edges {
            graph.add_edge(from, to, EdgeKind::Required);
        }
        graph
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.topological_sort().unwrap().is_empty());
    }

    #[test]
    fn test_dependencies_come_first() {
        let graph = graph(&[
            ("gcc", "glibc"),
            ("gcc", "binutils"),
            ("binutils", "glibc"),
            ("glibc", "linux-headers"),
        ]);
        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), 4);

        for (from, deps) in &graph.edges {
            for to in deps.keys() {
                assert!(position(&order, to) < position(&order, from));
            }
        }
    }

    #[test]
    fn test_lexical_tie_break() {
        let graph = graph(&[("app", "zlib"), ("app", "bzip2"), ("app", "openssl")]);
        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["bzip2", "openssl", "zlib", "app"]
        );
    }

    #[test]
    fn test_order_is_deterministic() {
        let a = graph(&[("c", "a"), ("c", "b"), ("b", "a"), ("d", "a")]);
        let b = graph(&[("d", "a"), ("b", "a"), ("c", "b"), ("c", "a")]);
        assert_eq!(a.topological_sort().unwrap(), b.topological_sort().unwrap());
    }

    #[test]
    fn test_cycle_is_named() {
        let graph = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("d", "a")]);
        match graph.topological_sort() {
            Err(Error::Cycle { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                for name in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|n| n == name));
                }
                assert!(!cycle.iter().any(|n| n == "d"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_find_cycles_acyclic() {
        let graph = graph(&[("a", "b"), ("b", "c")]);
        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_runtime_kind_wins_over_build() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b", EdgeKind::Build);
        graph.add_edge("a", "b", EdgeKind::Required);
        graph.add_edge("a", "c", EdgeKind::Recommended);
        graph.add_edge("a", "c", EdgeKind::Build);
        assert_eq!(graph.edge_kind("a", "b"), Some(EdgeKind::Required));
        assert_eq!(graph.edge_kind("a", "c"), Some(EdgeKind::Recommended));
    }

    #[test]
    fn test_reachable_and_restricted() {
        let graph = graph(&[("root", "a"), ("a", "b"), ("orphan", "b")]);
        let reachable = graph.reachable_from("root");
        assert_eq!(
            reachable.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b", "root"]
        );

        let pruned = graph.restricted_to(&reachable);
        assert_eq!(pruned.len(), 3);
        assert!(!pruned.contains("orphan"));
        assert_eq!(pruned.dependents("b").unwrap().len(), 1);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = graph(&[("a", "b"), ("b", "c"), ("d", "c")]);
        let dependents = graph.transitive_dependents("c");
        assert_eq!(dependents.len(), 3);
        assert!(graph.transitive_dependents("a").is_empty());
    }
}
