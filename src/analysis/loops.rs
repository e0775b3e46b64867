//! Natural loop analysis.
//!
//! Loops are found through dominance-based back edges. Each [`LoopInfo`] records the
//! structure the instrumentation engine attaches to:
//!
//! ```text
//!     [preheader]     <- Single entry predecessor (optional, may need insertion)
//!          |
//!          v
//!     [header] <------+  <- Single entry point, dominates all loop nodes
//!          |          |
//!          v          |
//!     [body ...]      |  <- Loop body nodes
//!          |          |
//!          v          |
//!     [latch] --------+  <- Back edge source(s)
//!          |
//!          v
//!     [exit ...]         <- Exit blocks (outside loop, have predecessor in loop)
//! ```
//!
//! [`detect_loops`] works on any graph implementing `GraphBase + Successors +
//! Predecessors`; the induction variable scan works on [`Function`] bodies.

use std::collections::{BTreeSet, HashMap};

use crate::{
    ir::{BinaryOp, BlockId, Function, Op, ValueId},
    utils::graph::{algorithms::DominatorTree, GraphBase, NodeId, Predecessors, Successors},
};

/// Exit edge information for a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoopExit {
    /// The block inside the loop that branches out.
    pub exiting_block: NodeId,
    /// The block outside the loop that is the exit target.
    pub exit_block: NodeId,
}

/// Classification of induction variable update operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InductionUpdateKind {
    /// `i = i + stride`
    Add,
    /// `i = i - stride`
    Sub,
    /// Unknown or complex update pattern
    Unknown,
}

/// An induction variable: a header phi merging an initial value from outside the loop
/// with an update computed inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductionVar {
    /// The phi result at the loop header.
    pub phi_result: ValueId,
    /// The initial value.
    pub init_value: ValueId,
    /// The block providing the initial value.
    pub init_block: BlockId,
    /// The updated value.
    pub update_value: ValueId,
    /// The block providing the updated value.
    pub update_block: BlockId,
    /// The type of update operation.
    pub update_kind: InductionUpdateKind,
    /// The constant stride, if known. Negative for decrements.
    pub stride: Option<i64>,
}

/// Structural information about one natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// The header block (single entry point, dominates all loop nodes).
    pub header: NodeId,

    /// All blocks in the loop body (including header).
    pub body: BTreeSet<NodeId>,

    /// Back edge sources.
    pub latches: Vec<NodeId>,

    /// The single out-of-loop predecessor of the header, when that predecessor branches
    /// only to the header.
    pub preheader: Option<NodeId>,

    /// Exit edges from the loop, deduplicated and sorted.
    pub exits: Vec<LoopExit>,

    /// Loop nesting depth (0 = outermost).
    pub depth: usize,

    /// Parent loop header, if this loop is nested.
    pub parent: Option<NodeId>,

    /// Immediate child loop headers.
    pub children: Vec<NodeId>,
}

impl LoopInfo {
    /// Creates a new `LoopInfo` with the given header.
    #[must_use]
    pub fn new(header: NodeId) -> Self {
        let mut body = BTreeSet::new();
        body.insert(header);
        Self {
            header,
            body,
            latches: Vec::new(),
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Returns the header as a block handle.
    #[must_use]
    pub fn header_block(&self) -> BlockId {
        self.header.into()
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.contains(block.into())
    }

    /// Returns the number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns true if the loop has a preheader.
    #[must_use]
    pub fn has_preheader(&self) -> bool {
        self.preheader.is_some()
    }

    /// Returns true if this is an outermost loop (no parent).
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns all exit blocks, possibly with repeats.
    pub fn exit_blocks(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.exits.iter().map(|e| e.exit_block)
    }

    /// Identifies induction variables of this loop in `func`.
    ///
    /// A header phi qualifies when exactly one incoming edge comes from outside the loop.
    /// The update kind and stride are read off the defining instruction of the first
    /// in-loop incoming value.
    #[must_use]
    pub fn find_induction_vars(&self, func: &Function) -> Vec<InductionVar> {
        let mut induction_vars = Vec::new();

        for phi in func.phis(self.header_block()) {
            let Some(Op::Phi { dest, incoming }) = func.op(phi) else {
                continue;
            };
            if incoming.len() < 2 {
                continue;
            }

            let (inside, outside): (Vec<&(BlockId, ValueId)>, Vec<&(BlockId, ValueId)>) = incoming
                .iter()
                .partition(|(pred, _)| self.contains_block(*pred));

            if outside.len() == 1 && !inside.is_empty() {
                let (init_block, init_value) = *outside[0];
                let (update_block, update_value) = *inside[0];
                let (update_kind, stride) = analyze_update(func, update_value, *dest);

                induction_vars.push(InductionVar {
                    phi_result: *dest,
                    init_value,
                    init_block,
                    update_value,
                    update_block,
                    update_kind,
                    stride,
                });
            }
        }

        induction_vars
    }
}

/// Recognizes `phi + c`, `c + phi` and `phi - c`.
fn analyze_update(
    func: &Function,
    update: ValueId,
    phi_result: ValueId,
) -> (InductionUpdateKind, Option<i64>) {
    let Some(Op::Binary {
        op, left, right, ..
    }) = func.defining_inst(update).and_then(|i| func.op(i))
    else {
        return (InductionUpdateKind::Unknown, None);
    };

    match op {
        BinaryOp::Add if *left == phi_result || *right == phi_result => {
            let other = if *left == phi_result { *right } else { *left };
            (InductionUpdateKind::Add, func.as_const_int(other))
        }
        BinaryOp::Sub if *left == phi_result => (
            InductionUpdateKind::Sub,
            func.as_const_int(*right).and_then(i64::checked_neg),
        ),
        _ => (InductionUpdateKind::Unknown, None),
    }
}

/// Loop forest containing all loops in a function.
#[derive(Debug, Clone)]
pub struct LoopForest {
    /// All loops, sorted by header.
    loops: Vec<LoopInfo>,
    /// Map from block to the innermost loop containing it.
    block_to_loop: Vec<Option<usize>>,
}

impl LoopForest {
    /// Creates an empty loop forest.
    #[must_use]
    pub fn new(block_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            block_to_loop: vec![None; block_count],
        }
    }

    /// Adds a loop to the forest.
    pub fn add_loop(&mut self, loop_info: LoopInfo) {
        let loop_idx = self.loops.len();

        for &block in &loop_info.body {
            let Some(slot) = self.block_to_loop.get_mut(block.index()) else {
                continue;
            };
            match *slot {
                Some(existing) if self.loops[existing].depth >= loop_info.depth => {}
                _ => *slot = Some(loop_idx),
            }
        }

        self.loops.push(loop_info);
    }

    /// Returns all loops in the forest.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Returns the innermost loop containing the given block.
    #[must_use]
    pub fn innermost_loop(&self, block: NodeId) -> Option<&LoopInfo> {
        self.block_to_loop
            .get(block.index())
            .copied()
            .flatten()
            .map(|idx| &self.loops[idx])
    }

    /// Returns the loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: NodeId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }

    /// Returns the loop depth for a block (0 if not in any loop).
    #[must_use]
    pub fn loop_depth(&self, block: NodeId) -> usize {
        self.innermost_loop(block).map_or(0, |l| l.depth + 1)
    }

    /// Iterates over all loops in the forest.
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter()
    }

    /// Returns loop headers in preorder: each loop before the loops nested in it,
    /// siblings by ascending header.
    #[must_use]
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.loops.len());
        let mut stack: Vec<NodeId> = self
            .loops
            .iter()
            .filter(|l| l.is_outermost())
            .map(|l| l.header)
            .rev()
            .collect();
        while let Some(header) = stack.pop() {
            order.push(header);
            if let Some(info) = self.loop_for_header(header) {
                let mut children = info.children.clone();
                children.sort();
                stack.extend(children.into_iter().rev());
            }
        }
        order
    }
}

/// Detects all natural loops in a graph using dominance-based back edge detection.
///
/// # Algorithm
///
/// 1. Finds back edges using dominance (n → h where h dominates n)
/// 2. For each back edge, computes the natural loop body
/// 3. Computes preheaders and exits
/// 4. Establishes nesting relationships
#[must_use]
pub fn detect_loops<G>(graph: &G, dominators: &DominatorTree) -> LoopForest
where
    G: GraphBase + Successors + Predecessors,
{
    let mut forest = LoopForest::new(graph.node_count());
    let mut loops_by_header: HashMap<NodeId, LoopInfo> = HashMap::new();

    for node in graph.node_ids() {
        for succ in graph.successors(node) {
            if dominators.dominates(succ, node) {
                let loop_info = loops_by_header
                    .entry(succ)
                    .or_insert_with(|| LoopInfo::new(succ));

                if !loop_info.latches.contains(&node) {
                    loop_info.latches.push(node);
                }
                expand_loop_body(graph, loop_info, node);
            }
        }
    }

    for loop_info in loops_by_header.values_mut() {
        loop_info.latches.sort();
        compute_preheader(graph, loop_info);
        compute_exits(graph, loop_info);
    }

    let mut loops: Vec<LoopInfo> = loops_by_header.into_values().collect();
    loops.sort_by_key(|l| l.header.index());
    compute_nesting(&mut loops);

    for loop_info in loops {
        forest.add_loop(loop_info);
    }

    forest
}

/// Expands the loop body to include all nodes that can reach the latch without passing
/// through the header.
fn expand_loop_body<G>(graph: &G, loop_info: &mut LoopInfo, latch: NodeId)
where
    G: Predecessors,
{
    if loop_info.body.contains(&latch) {
        return;
    }

    let mut worklist = vec![latch];

    while let Some(node) = worklist.pop() {
        if loop_info.body.insert(node) {
            for pred in graph.predecessors(node) {
                if pred != loop_info.header && !loop_info.body.contains(&pred) {
                    worklist.push(pred);
                }
            }
        }
    }
}

/// Identifies the preheader for a loop.
///
/// The header must have exactly one predecessor outside the loop, and every edge leaving
/// that predecessor must go to the header.
fn compute_preheader<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Successors + Predecessors,
{
    let outside: BTreeSet<NodeId> = graph
        .predecessors(loop_info.header)
        .filter(|pred| !loop_info.body.contains(pred))
        .collect();

    loop_info.preheader = match outside.first() {
        Some(&pred) if outside.len() == 1 => graph
            .successors(pred)
            .all(|succ| succ == loop_info.header)
            .then_some(pred),
        _ => None,
    };
}

/// Computes exit edges for a loop.
fn compute_exits<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Successors,
{
    let exits: BTreeSet<LoopExit> = loop_info
        .body
        .iter()
        .flat_map(|&block| {
            graph
                .successors(block)
                .filter(|succ| !loop_info.body.contains(succ))
                .map(move |succ| LoopExit {
                    exiting_block: block,
                    exit_block: succ,
                })
                .collect::<Vec<_>>()
        })
        .collect();
    loop_info.exits = exits.into_iter().collect();
}

/// Computes loop nesting relationships and depths.
fn compute_nesting(loops: &mut [LoopInfo]) {
    let n = loops.len();

    let header_to_idx: HashMap<NodeId, usize> = loops
        .iter()
        .enumerate()
        .map(|(i, l)| (l.header, i))
        .collect();

    // Parent is the smallest other loop containing this header
    for i in 0..n {
        let header = loops[i].header;
        let parent = (0..n)
            .filter(|&j| j != i && loops[j].body.contains(&header))
            .min_by_key(|&j| loops[j].size())
            .map(|j| loops[j].header);
        loops[i].parent = parent;
    }

    for i in 0..n {
        if let Some(parent_header) = loops[i].parent {
            if let Some(&parent_idx) = header_to_idx.get(&parent_header) {
                let child = loops[i].header;
                loops[parent_idx].children.push(child);
            }
        }
    }

    for i in 0..n {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(parent_header) = current {
            depth += 1;
            match header_to_idx.get(&parent_header) {
                Some(&parent_idx) if depth <= n => current = loops[parent_idx].parent,
                _ => break,
            }
        }
        loops[i].depth = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::{algorithms::compute_dominators, AdjacencyGraph};

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    fn analyze(count: usize, edges: &[(usize, usize)]) -> LoopForest {
        let graph = AdjacencyGraph::from_edges(count, n(0), edges);
        let dom = compute_dominators(&graph, n(0));
        detect_loops(&graph, &dom)
    }

    #[test]
    fn test_loop_info_creation() {
        let loop_info = LoopInfo::new(n(0));
        assert!(loop_info.contains(n(0)));
        assert_eq!(loop_info.size(), 1);
        assert!(!loop_info.has_preheader());
    }

    #[test]
    fn test_simple_loop() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let forest = analyze(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        assert_eq!(forest.len(), 1);
        let l = &forest.loops()[0];
        assert_eq!(l.header, n(1));
        assert_eq!(l.latches, vec![n(2)]);
        assert_eq!(l.preheader, Some(n(0)));
        assert_eq!(
            l.exits,
            vec![LoopExit {
                exiting_block: n(1),
                exit_block: n(3)
            }]
        );
    }

    #[test]
    fn test_guard_is_not_preheader() {
        // 0 branches to the header and around the loop
        let forest = analyze(4, &[(0, 1), (0, 3), (1, 2), (2, 1), (2, 3)]);
        assert_eq!(forest.loops()[0].preheader, None);
    }

    #[test]
    fn test_entry_header_has_no_preheader() {
        let forest = analyze(2, &[(0, 0), (0, 1)]);
        let l = &forest.loops()[0];
        assert_eq!(l.header, n(0));
        assert_eq!(l.latches, vec![n(0)]);
        assert_eq!(l.preheader, None);
    }

    #[test]
    fn test_nesting_and_preorder() {
        // outer: 1..4, inner: 2..3, sibling: 5..6
        let forest = analyze(
            8,
            &[
                (0, 1),
                (1, 2),
                (2, 3),
                (3, 2),
                (3, 4),
                (4, 1),
                (1, 5),
                (5, 6),
                (6, 5),
                (6, 7),
            ],
        );
        assert_eq!(forest.len(), 3);
        let inner = forest.loop_for_header(n(2)).unwrap();
        assert_eq!(inner.parent, Some(n(1)));
        assert_eq!(inner.depth, 1);
        assert_eq!(forest.loop_depth(n(3)), 2);
        assert_eq!(forest.loop_depth(n(5)), 1);
        assert_eq!(forest.loop_depth(n(0)), 0);
        assert_eq!(forest.preorder(), vec![n(1), n(2), n(5)]);
    }

    #[test]
    fn test_duplicate_exit_edges_collapse() {
        // 1 branches to 2 on both arms
        let forest = analyze(3, &[(0, 1), (1, 1), (1, 2), (1, 2)]);
        assert_eq!(forest.loops()[0].exits.len(), 1);
    }
}
