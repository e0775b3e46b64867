//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` passes
//! through `d`. The **immediate dominator** of `n` is the unique strict dominator of `n`
//! that does not strictly dominate any other dominator of `n`. Making each node's
//! immediate dominator its parent yields the dominator tree, rooted at the entry.
//!
//! # Algorithm
//!
//! The iterative data-flow formulation by Cooper, Harvey and Kennedy: nodes are processed in
//! reverse post-order and each immediate dominator is refined by intersecting the dominator
//! chains of already-processed predecessors until a fixed point is reached. For the
//! reducible, mostly-acyclic graphs produced by compilers this converges in two or three
//! passes.
//!
//! # Unreachable Nodes
//!
//! Nodes that cannot be reached from the entry have no immediate dominator. They neither
//! dominate nor are dominated by any other node, which keeps queries total instead of
//! relying on sentinel indices.

use crate::utils::graph::{
    algorithms::traversal::reverse_postorder, NodeId, Predecessors, RootedGraph, Successors,
};

/// Dominator tree of a rooted graph.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    node_count: usize,
}

impl DominatorTree {
    /// Returns the entry node (root of the tree).
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of `node`.
    ///
    /// `None` for the entry node and for unreachable nodes.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            None
        } else {
            self.idom.get(node.index()).copied().flatten()
        }
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[inline]
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        node == self.entry || self.idom.get(node.index()).is_some_and(Option::is_some)
    }

    /// Returns `true` if `a` dominates `b`.
    ///
    /// Every reachable node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        if a == b {
            return true;
        }

        let mut current = b;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the dominator chain of `node`, from `node` up to the entry.
    #[must_use]
    pub fn dominators(&self, node: NodeId) -> Vec<NodeId> {
        if !self.is_reachable(node) {
            return Vec::new();
        }
        let mut chain = vec![node];
        let mut current = node;
        while let Some(idom) = self.immediate_dominator(current) {
            chain.push(idom);
            current = idom;
        }
        chain
    }

    /// Returns the depth of `node` in the tree (entry has depth 0).
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).len().saturating_sub(1)
    }

    /// Returns the nodes whose immediate dominator is `node`.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.node_count)
            .map(NodeId::new)
            .filter(|&n| self.immediate_dominator(n) == Some(node))
            .collect()
    }

    /// Returns the number of nodes covered by the tree.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Predecessors + Successors,
{
    let node_count = graph.node_count();
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];

    if entry.index() >= node_count {
        return DominatorTree {
            entry,
            idom,
            node_count,
        };
    }

    let order = reverse_postorder(graph, entry);
    let mut rpo_number = vec![usize::MAX; node_count];
    for (i, node) in order.iter().enumerate() {
        rpo_number[node.index()] = i;
    }

    idom[entry.index()] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in order.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &rpo_number, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree {
        entry,
        idom,
        node_count,
    }
}

/// Computes the dominator tree of a rooted graph from its own entry.
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

fn intersect(
    idom: &[Option<NodeId>],
    rpo_number: &[usize],
    mut a: NodeId,
    mut b: NodeId,
) -> NodeId {
    while a != b {
        while rpo_number[a.index()] > rpo_number[b.index()] {
            match idom[a.index()] {
                Some(next) => a = next,
                None => return b,
            }
        }
        while rpo_number[b.index()] > rpo_number[a.index()] {
            match idom[b.index()] {
                Some(next) => b = next,
                None => return a,
            }
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::AdjacencyGraph;

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_diamond() {
        let graph = AdjacencyGraph::from_edges(4, n(0), &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(0)), None);
        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(2)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(3)), Some(n(0)));
        assert!(dom.dominates(n(0), n(3)));
        assert!(!dom.dominates(n(1), n(3)));
        assert!(dom.dominates(n(3), n(3)));
        assert!(!dom.strictly_dominates(n(3), n(3)));
    }

    #[test]
    fn test_loop_header_dominates_body() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let graph = AdjacencyGraph::from_edges(4, n(0), &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let dom = compute_dominators_rooted(&graph);

        assert!(dom.dominates(n(1), n(2)));
        assert!(dom.dominates(n(1), n(3)));
        assert!(!dom.dominates(n(2), n(1)));
        assert_eq!(dom.depth(n(2)), 2);
        assert_eq!(dom.dominators(n(2)), vec![n(2), n(1), n(0)]);
        assert_eq!(dom.children(n(1)), vec![n(2), n(3)]);
    }

    #[test]
    fn test_irreducible_region() {
        // 0 -> 1, 0 -> 2, 1 <-> 2: neither 1 nor 2 dominates the other
        let graph = AdjacencyGraph::from_edges(3, n(0), &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let dom = compute_dominators_rooted(&graph);

        assert_eq!(dom.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom.immediate_dominator(n(2)), Some(n(0)));
    }

    #[test]
    fn test_unreachable_nodes() {
        let graph = AdjacencyGraph::from_edges(3, n(0), &[(0, 1), (2, 1)]);
        let dom = compute_dominators_rooted(&graph);

        assert!(!dom.is_reachable(n(2)));
        assert!(!dom.dominates(n(2), n(1)));
        assert!(!dom.dominates(n(0), n(2)));
        assert_eq!(dom.immediate_dominator(n(2)), None);
        assert!(dom.dominators(n(2)).is_empty());
    }
}
