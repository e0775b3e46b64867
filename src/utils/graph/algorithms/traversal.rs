//! Graph traversal algorithms.
//!
//! - [`postorder`] - depth-first search with post-order visitation
//! - [`reverse_postorder`] - reverse post-order, the iteration order of the dominator solver

use crate::utils::graph::{NodeId, Successors};

/// Returns the nodes reachable from `start` in depth-first post-order.
///
/// Each node appears after all of its DFS-tree descendants.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();

    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];

    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;

                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if succ.index() < node_count && !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => {
                result.push(node);
            }
        }
    }

    result
}

/// Returns the nodes reachable from `start` in reverse post-order.
///
/// Every node appears before its successors, except along back edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::AdjacencyGraph;

    fn diamond() -> AdjacencyGraph {
        AdjacencyGraph::from_edges(4, NodeId::new(0), &[(0, 1), (0, 2), (1, 3), (2, 3)])
    }

    #[test]
    fn test_postorder_children_first() {
        let graph = diamond();
        let order = postorder(&graph, NodeId::new(0));
        assert_eq!(order.len(), 4);
        assert_eq!(order.last(), Some(&NodeId::new(0)));

        let pos = |n: usize| order.iter().position(|x| x.index() == n).unwrap();
        assert!(pos(3) < pos(1));
        assert!(pos(3) < pos(2));
    }

    #[test]
    fn test_reverse_postorder_with_cycle() {
        let graph = AdjacencyGraph::from_edges(3, NodeId::new(0), &[(0, 1), (1, 2), (2, 1)]);
        let order = reverse_postorder(&graph, NodeId::new(0));
        assert_eq!(order, vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_invalid_start() {
        let graph = diamond();
        assert!(postorder(&graph, NodeId::new(10)).is_empty());
    }
}
