//! Control-flow graph view of a function and instruction-level dominance.

use crate::{
    ir::{BlockId, Function, InstId, ValueDef, ValueId},
    utils::graph::{
        algorithms::{compute_dominators_rooted, DominatorTree},
        AdjacencyGraph, GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
};

/// Snapshot of a function's block graph.
///
/// The snapshot does not track later edits; rebuild it after control-flow surgery.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    graph: AdjacencyGraph,
}

impl ControlFlowGraph {
    /// Builds the graph of `func`. Declarations yield an empty graph.
    #[must_use]
    pub fn new(func: &Function) -> Self {
        let entry = func.entry().map_or(NodeId::new(0), NodeId::from);
        let mut graph = AdjacencyGraph::new(func.block_count(), entry);
        for block in func.blocks() {
            for succ in func.successors(block.id()) {
                graph.add_edge(block.id().into(), succ.into());
            }
        }
        Self { graph }
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.graph.entry().into()
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.graph.node_ids()
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.successors(node)
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.predecessors(node)
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        self.graph.entry()
    }
}

/// Dominance information for one function.
///
/// Combines the block dominator tree with the in-block instruction order so that the
/// materializer can ask whether a value is available at an insertion point.
#[derive(Debug, Clone)]
pub struct Dominance {
    tree: DominatorTree,
}

impl Dominance {
    /// Computes dominance over a CFG snapshot.
    #[must_use]
    pub fn new(cfg: &ControlFlowGraph) -> Self {
        Self {
            tree: compute_dominators_rooted(cfg),
        }
    }

    /// Builds the CFG and computes dominance in one step.
    #[must_use]
    pub fn of(func: &Function) -> Self {
        Self::new(&ControlFlowGraph::new(func))
    }

    /// Returns the underlying block dominator tree.
    #[must_use]
    pub fn tree(&self) -> &DominatorTree {
        &self.tree
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.tree.is_reachable(block.into())
    }

    /// Returns `true` if block `a` dominates block `b`.
    #[must_use]
    pub fn block_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.dominates(a.into(), b.into())
    }

    /// Returns `true` if instruction `a` executes before `b` on every path reaching `b`.
    #[must_use]
    pub fn inst_dominates(&self, func: &Function, a: InstId, b: InstId) -> bool {
        let (Some((block_a, idx_a)), Some((block_b, idx_b))) = (func.position(a), func.position(b))
        else {
            return false;
        };
        if block_a == block_b {
            return idx_a < idx_b && self.is_reachable(block_a);
        }
        self.block_dominates(block_a, block_b)
    }

    /// Returns `true` if `value` is available immediately before instruction `at`.
    ///
    /// Arguments, constants and symbol addresses are available everywhere. Instruction
    /// results must be defined by a placed instruction dominating `at`.
    #[must_use]
    pub fn value_dominates(&self, func: &Function, value: ValueId, at: InstId) -> bool {
        match func.value_def(value) {
            Some(ValueDef::Inst(def)) => self.inst_dominates(func, def, at),
            Some(_) => true,
            None => false,
        }
    }

    /// Returns `true` if `value` is available at the end of `block`.
    #[must_use]
    pub fn value_available_at_end(&self, func: &Function, value: ValueId, block: BlockId) -> bool {
        match func.value_def(value) {
            Some(ValueDef::Inst(def)) => match func.position(def) {
                Some((def_block, _)) => self.block_dominates(def_block, block),
                None => false,
            },
            Some(_) => true,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, CmpPred, FunctionType, IrType, Origin};

    fn diamond() -> (Function, [BlockId; 4], ValueId) {
        let mut func = Function::new("d", FunctionType::new(IrType::Void, vec![IrType::I32]));
        let x = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let left = b.create_block(Origin::User);
        let right = b.create_block(Origin::User);
        let join = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let zero = b.iconst(32, 0);
        let c = b.cmp(CmpPred::Slt, x, zero, Origin::User).unwrap();
        b.branch(c, left, right, Origin::User).unwrap();
        b.switch_to_block(left);
        let v = b.add(x, x, Origin::User).unwrap();
        b.jump(join, Origin::User).unwrap();
        b.switch_to_block(right);
        b.jump(join, Origin::User).unwrap();
        b.switch_to_block(join);
        b.ret(None, Origin::User).unwrap();
        (func, [entry, left, right, join], v)
    }

    #[test]
    fn test_cfg_shape() {
        let (func, [entry, left, _, join], _) = diamond();
        let cfg = ControlFlowGraph::new(&func);
        assert_eq!(cfg.node_count(), 4);
        assert_eq!(cfg.entry_block(), entry);
        assert_eq!(cfg.successors(entry.into()).count(), 2);
        assert!(cfg.predecessors(join.into()).any(|p| p == NodeId::from(left)));
    }

    #[test]
    fn test_value_dominance() {
        let (func, [entry, left, right, join], v) = diamond();
        let dom = Dominance::of(&func);
        assert!(dom.block_dominates(entry, join));
        assert!(!dom.block_dominates(left, join));

        let ret = func.terminator(join).unwrap();
        let left_jump = func.terminator(left).unwrap();
        assert!(!dom.value_dominates(&func, v, ret));
        assert!(dom.value_dominates(&func, v, left_jump));
        assert!(dom.value_dominates(&func, func.param(0).unwrap(), ret));
        assert!(!dom.value_available_at_end(&func, v, right));
        assert!(dom.value_available_at_end(&func, v, left));
    }

    #[test]
    fn test_same_block_order() {
        let (func, [_, left, _, _], v) = diamond();
        let dom = Dominance::of(&func);
        let add = func.defining_inst(v).unwrap();
        let jump = func.terminator(left).unwrap();
        assert!(dom.inst_dominates(&func, add, jump));
        assert!(!dom.inst_dominates(&func, jump, add));
        assert!(!dom.inst_dominates(&func, add, add));
    }
}
