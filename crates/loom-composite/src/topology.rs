//! Topology - the shape of a composite's connection graph
//!
//! One graph per connection kind. Ordered maps keep traversal and
//! topological order deterministic for a given set of edges.

use std::collections::{BTreeMap, BTreeSet};

use loom_core::ComponentId;

/// Directed graph over component ids
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    /// All nodes in the graph
    nodes: BTreeSet<ComponentId>,

    /// Edges: from_node -> to_nodes, in insertion order
    edges: BTreeMap<ComponentId, Vec<ComponentId>>,

    /// Reverse edges: to_node -> from_nodes
    reverse_edges: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a node set and an edge list
    pub fn from_edges<N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = ComponentId>,
        E: IntoIterator<Item = (ComponentId, ComponentId)>,
    {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    pub fn add_node(&mut self, node: ComponentId) {
        self.nodes.insert(node);
    }

    /// Remove a node and all its edges
    pub fn remove_node(&mut self, node: ComponentId) {
        self.nodes.remove(&node);
        self.edges.remove(&node);

        for targets in self.edges.values_mut() {
            targets.retain(|t| *t != node);
        }

        self.reverse_edges.remove(&node);
        for sources in self.reverse_edges.values_mut() {
            sources.remove(&node);
        }
    }

    pub fn add_edge(&mut self, from: ComponentId, to: ComponentId) {
        self.nodes.insert(from);
        self.nodes.insert(to);

        self.edges.entry(from).or_default().push(to);
        self.reverse_edges.entry(to).or_default().insert(from);
    }

    pub fn downstream(&self, node: ComponentId) -> &[ComponentId] {
        self.edges.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn upstream(&self, node: ComponentId) -> Vec<ComponentId> {
        self.reverse_edges
            .get(&node)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes with no incoming edge
    pub fn sources(&self) -> Vec<ComponentId> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| self.reverse_edges.get(n).map_or(true, |s| s.is_empty()))
            .collect()
    }

    /// Nodes with no outgoing edge
    pub fn sinks(&self) -> Vec<ComponentId> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| self.edges.get(n).map_or(true, |t| t.is_empty()))
            .collect()
    }

    /// Whether `to` is reachable from `from` (a node reaches itself)
    pub fn reaches(&self, from: ComponentId, to: ComponentId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.downstream(node).iter().copied());
            }
        }
        false
    }

    /// Adding `from -> to` would close a cycle
    pub fn would_create_cycle(&self, from: ComponentId, to: ComponentId) -> bool {
        self.reaches(to, from)
    }

    /// Kahn's algorithm, smallest ready id first. `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<ComponentId>> {
        let mut in_degree: BTreeMap<ComponentId, usize> =
            self.nodes.iter().map(|n| (*n, 0)).collect();
        for targets in self.edges.values() {
            for target in targets {
                *in_degree.entry(*target).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<ComponentId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for target in self.downstream(node) {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*target);
                    }
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn has_node(&self, node: ComponentId) -> bool {
        self.nodes.contains(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> ComponentId {
        ComponentId::new(n)
    }

    #[test]
    fn test_chain_order_sources_sinks() {
        let graph = FlowGraph::from_edges([id(3), id(1), id(2)], [(id(3), id(1)), (id(1), id(2))]);
        assert_eq!(graph.topological_order(), Some(vec![id(3), id(1), id(2)]));
        assert_eq!(graph.sources(), vec![id(3)]);
        assert_eq!(graph.sinks(), vec![id(2)]);
        assert_eq!(graph.upstream(id(2)), vec![id(1)]);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = FlowGraph::from_edges([id(1), id(2), id(3)], [(id(1), id(2)), (id(2), id(3))]);
        assert!(graph.would_create_cycle(id(3), id(1)));
        assert!(graph.would_create_cycle(id(2), id(2)));
        assert!(!graph.would_create_cycle(id(1), id(3)));
    }

    #[test]
    fn test_cyclic_graph_has_no_order() {
        let graph = FlowGraph::from_edges([id(1), id(2)], [(id(1), id(2)), (id(2), id(1))]);
        assert_eq!(graph.topological_order(), None);
    }

    #[test]
    fn test_isolated_node_is_source_and_sink() {
        let mut graph = FlowGraph::new();
        graph.add_node(id(7));
        assert_eq!(graph.sources(), vec![id(7)]);
        assert_eq!(graph.sinks(), vec![id(7)]);
    }

    #[test]
    fn test_remove_node() {
        let mut graph =
            FlowGraph::from_edges([id(1), id(2), id(3)], [(id(1), id(2)), (id(2), id(3))]);
        graph.remove_node(id(2));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.reaches(id(1), id(3)));
    }
}
