//! Trait definitions for graph abstractions.
//!
//! The hierarchy is minimal and composable:
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - forward edge traversal
//! - [`Predecessors`] - backward edge traversal
//! - [`RootedGraph`] - graphs with a designated entry node (for dominator computation)
//!
//! All adjacency queries return iterators rather than collections.

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers in ascending index order.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the direct successors of `node`.
    ///
    /// Parallel edges may yield the same successor more than once.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the direct predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a single designated entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}
