//! Directed dependency graph over service units.
//!
//! Edges point from a dependency to its dependent, so a topological order is
//! an order in which units can be applied.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Members of a dependency cycle, sorted
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cycle<T>(pub Vec<T>);

#[derive(Debug, Clone)]
pub(crate) struct DependencyGraph<T>
where
    T: Clone + Eq + Hash + Ord,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Insertion order for deterministic tie-breaking in toposort.
    insertion_order: Vec<NodeIndex>,
}

impl<T> DependencyGraph<T>
where
    T: Clone + Eq + Hash + Ord,
{
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Adds a node; existing nodes are returned unchanged.
    pub fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Adds an edge `dependency -> dependent`.
    pub fn add_dependency(&mut self, dependency: &T, dependent: &T) {
        let from = self.add_node(dependency.clone());
        let to = self.add_node(dependent.clone());
        self.graph.update_edge(from, to, ());
    }

    /// Every strongly connected component that forms a cycle, including
    /// single-node self loops. Members and components are sorted.
    pub fn cycles(&self) -> Vec<Cycle<T>> {
        let mut cycles: Vec<Cycle<T>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|scc| {
                let mut members: Vec<T> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect();
                members.sort();
                Cycle(members)
            })
            .collect();
        cycles.sort_by(|a, b| a.0.cmp(&b.0));
        cycles
    }

    /// Kahn's algorithm; zero in-degree ties are broken by insertion order.
    pub fn toposort(&self) -> Result<Vec<T>, Cycle<T>> {
        let node_count = self.graph.node_count();

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let position: HashMap<NodeIndex, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            if let Some(node) = self.graph.node_weight(idx) {
                result.push(node.clone());
            }

            let mut neighbors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            neighbors.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));

            for neighbor in neighbors {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            return Err(self
                .cycles()
                .into_iter()
                .next()
                .unwrap_or(Cycle(Vec::new())));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toposort_respects_edges_and_insertion_order() {
        let mut g = DependencyGraph::new();
        for n in ["c", "a", "b"] {
            g.add_node(n);
        }
        g.add_dependency(&"a", &"b");
        g.add_dependency(&"b", &"c");

        assert_eq!(g.toposort().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_reports_every_member() {
        let mut g = DependencyGraph::new();
        g.add_dependency(&"a", &"b");
        g.add_dependency(&"b", &"c");
        g.add_dependency(&"c", &"a");
        g.add_dependency(&"c", &"d");

        assert_eq!(g.cycles(), vec![Cycle(vec!["a", "b", "c"])]);
        assert_eq!(g.toposort().unwrap_err(), Cycle(vec!["a", "b", "c"]));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut g = DependencyGraph::new();
        g.add_dependency(&"a", &"a");
        assert_eq!(g.cycles(), vec![Cycle(vec!["a"])]);
    }
}
