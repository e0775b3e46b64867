//! Compact adjacency-list graph.

use crate::utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors};

/// A rooted directed graph stored as forward and backward adjacency lists.
///
/// Nodes are the dense range `0..node_count`. Parallel edges are kept, which matters for
/// switch terminators that list the same target more than once.
///
/// # Examples
///
/// ```rust
/// use irprobe::utils::graph::{AdjacencyGraph, NodeId, Successors};
///
/// let mut graph = AdjacencyGraph::new(3, NodeId::new(0));
/// graph.add_edge(NodeId::new(0), NodeId::new(1));
/// graph.add_edge(NodeId::new(1), NodeId::new(2));
///
/// assert_eq!(graph.successors(NodeId::new(0)).count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct AdjacencyGraph {
    entry: NodeId,
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
}

impl AdjacencyGraph {
    /// Creates a graph with `node_count` isolated nodes.
    #[must_use]
    pub fn new(node_count: usize, entry: NodeId) -> Self {
        Self {
            entry,
            succs: vec![Vec::new(); node_count],
            preds: vec![Vec::new(); node_count],
        }
    }

    /// Adds a directed edge `from -> to`.
    ///
    /// Edges referencing nodes outside the graph are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from.index() >= self.succs.len() || to.index() >= self.succs.len() {
            return;
        }
        self.succs[from.index()].push(to);
        self.preds[to.index()].push(from);
    }

    /// Builds a graph from an edge list.
    #[must_use]
    pub fn from_edges(node_count: usize, entry: NodeId, edges: &[(usize, usize)]) -> Self {
        let mut graph = Self::new(node_count, entry);
        for &(from, to) in edges {
            graph.add_edge(NodeId::new(from), NodeId::new(to));
        }
        graph
    }
}

impl GraphBase for AdjacencyGraph {
    fn node_count(&self) -> usize {
        self.succs.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.succs.len()).map(NodeId::new)
    }
}

impl Successors for AdjacencyGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.succs
            .get(node.index())
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }
}

impl Predecessors for AdjacencyGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds
            .get(node.index())
            .into_iter()
            .flat_map(|p| p.iter().copied())
    }
}

impl RootedGraph for AdjacencyGraph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_edges_are_kept() {
        let graph = AdjacencyGraph::from_edges(2, NodeId::new(0), &[(0, 1), (0, 1)]);
        assert_eq!(graph.successors(NodeId::new(0)).count(), 2);
        assert_eq!(graph.predecessors(NodeId::new(1)).count(), 2);
    }

    #[test]
    fn test_out_of_range_edges_ignored() {
        let mut graph = AdjacencyGraph::new(2, NodeId::new(0));
        graph.add_edge(NodeId::new(0), NodeId::new(5));
        assert_eq!(graph.successors(NodeId::new(0)).count(), 0);
        assert_eq!(graph.successors(NodeId::new(9)).count(), 0);
    }
}
