//! Interfaces to the analyses the instrumentation engine consumes.
//!
//! The engine never decides on its own what a loop's bounds are or which memory an
//! instruction touches. It asks an [`AnalysisProvider`], which bundles four narrow
//! interfaces: [`RegionInfo`], [`CanonicalLoopInfo`], [`MemoryAccessClassifier`] and
//! [`DebugInfoLookup`].
//!
//! [`BasicAnalyses`] is a self-contained implementation over the IR. It recognizes
//! counted loops with a simple induction-variable matcher and accepts explicit
//! per-loop overrides, which is what tests and tools use to model the results of a
//! stronger analysis.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::{
    analysis::{LoopInfo, SymbolicExpr},
    ir::{BlockId, DebugLoc, DiVariable, FuncId, Function, Global, InstId, IrType, Op, ValueDef, ValueId},
};

/// The analysis region of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Function containing the loop.
    pub func: FuncId,
    /// Loop header.
    pub header: BlockId,
}

/// Loop bound description produced by a canonical-loop analysis.
///
/// `start` and `end` are the values the induction variable starts from and is compared
/// against; `step` is the per-iteration increment. Any of them may be unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLoop {
    /// Initial value of the induction variable.
    pub start: Option<ValueId>,
    /// Value the induction variable is compared against on exit.
    pub end: Option<ValueId>,
    /// Per-iteration step.
    pub step: Option<SymbolicExpr>,
    /// Set when the step is fixed and the end bound does not change across iterations.
    pub canonical: bool,
}

/// Maps loops to analysis regions.
pub trait RegionInfo {
    /// Returns the region of a loop, or `None` if the loop is not covered.
    fn region_of(&self, func_id: FuncId, func: &Function, loop_info: &LoopInfo) -> Option<Region>;
}

/// Answers canonical-loop queries.
pub trait CanonicalLoopInfo {
    /// Returns the bound description of the loop forming `region`.
    fn canonical_loop(
        &self,
        region: &Region,
        func: &Function,
        loop_info: &LoopInfo,
    ) -> Option<CanonicalLoop>;
}

bitflags! {
    /// Direction of a memory access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u8 {
        /// The instruction reads the location.
        const READ = 0b01;
        /// The instruction writes the location.
        const WRITE = 0b10;
    }
}

/// One memory location touched by an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Accessed address.
    pub addr: ValueId,
    /// Type of the accessed value.
    pub ty: IrType,
    /// Read and write flags.
    pub flags: AccessFlags,
}

/// Classification of an instruction's memory behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessClass {
    /// No memory access the engine instruments.
    None,
    /// Accesses to known locations.
    Accesses(Vec<MemoryAccess>),
    /// The instruction touches memory in a way the engine cannot describe.
    Unsupported,
}

/// Classifies instructions by the memory they access.
pub trait MemoryAccessClassifier {
    /// Classifies one instruction.
    fn classify(&self, func: &Function, inst: InstId) -> AccessClass;
}

/// Looks up source-level debug information.
pub trait DebugInfoLookup {
    /// Returns the source variable backing a function-local value.
    fn variable(&self, func: &Function, value: ValueId) -> Option<DiVariable>;

    /// Returns the source variable of a global.
    fn global_variable(&self, global: &Global) -> Option<DiVariable>;

    /// Returns the source positions where a loop starts and ends.
    fn loop_range(&self, func: &Function, loop_info: &LoopInfo) -> (Option<DebugLoc>, Option<DebugLoc>);
}

/// Everything the instrumentation engine consumes from upstream analyses.
pub trait AnalysisProvider:
    RegionInfo + CanonicalLoopInfo + MemoryAccessClassifier + DebugInfoLookup
{
}

impl<T> AnalysisProvider for T where
    T: RegionInfo + CanonicalLoopInfo + MemoryAccessClassifier + DebugInfoLookup
{
}

/// Reference analyses computed directly from the IR.
#[derive(Debug, Clone, Default)]
pub struct BasicAnalyses {
    overrides: HashMap<Region, Option<CanonicalLoop>>,
}

impl BasicAnalyses {
    /// Creates the analyses with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the canonical-loop answer for one loop.
    ///
    /// `None` marks the loop as not canonical-analyzable at all.
    pub fn set_canonical(&mut self, func: FuncId, header: BlockId, info: Option<CanonicalLoop>) {
        self.overrides.insert(Region { func, header }, info);
    }

    /// Builder-style variant of [`BasicAnalyses::set_canonical`].
    #[must_use]
    pub fn with_canonical(mut self, func: FuncId, header: BlockId, info: Option<CanonicalLoop>) -> Self {
        self.set_canonical(func, header, info);
        self
    }

    /// Recognizes `for (i = start; i <cmp> end; i += step)` shaped loops.
    ///
    /// The induction variable is a header phi with a constant stride. The exit test is a
    /// comparison of the phi or its update against `end` feeding a branch that leaves the
    /// loop. The loop is canonical when `end` does not depend on in-loop state.
    #[must_use]
    pub fn recognize(func: &Function, loop_info: &LoopInfo) -> Option<CanonicalLoop> {
        let ivs = loop_info.find_induction_vars(func);
        for iv in &ivs {
            let Some(stride) = iv.stride else {
                continue;
            };
            let Some(bits) = func.value_type(iv.phi_result).and_then(IrType::int_bits) else {
                continue;
            };
            let Some(end) = find_exit_bound(func, loop_info, iv.phi_result, iv.update_value)
            else {
                continue;
            };
            return Some(CanonicalLoop {
                start: Some(iv.init_value),
                end: Some(end),
                step: Some(SymbolicExpr::constant(stride, bits)),
                canonical: is_loop_invariant(func, loop_info, end, 0),
            });
        }
        None
    }
}

/// Finds the value an exiting branch compares the induction variable against.
fn find_exit_bound(
    func: &Function,
    loop_info: &LoopInfo,
    phi: ValueId,
    update: ValueId,
) -> Option<ValueId> {
    for exit in &loop_info.exits {
        let Some(Op::Branch { cond, .. }) = func
            .terminator(exit.exiting_block.into())
            .and_then(|t| func.op(t))
        else {
            continue;
        };
        let Some(Op::Cmp { left, right, .. }) = func.defining_inst(*cond).and_then(|i| func.op(i))
        else {
            continue;
        };
        let is_iv = |v: &ValueId| *v == phi || *v == update;
        if is_iv(left) && !is_iv(right) {
            return Some(*right);
        }
        if is_iv(right) && !is_iv(left) {
            return Some(*left);
        }
    }
    None
}

const MAX_INVARIANCE_DEPTH: usize = 32;

/// Returns `true` if `value` is computed only from values defined outside the loop.
fn is_loop_invariant(func: &Function, loop_info: &LoopInfo, value: ValueId, depth: usize) -> bool {
    let Some(ValueDef::Inst(inst)) = func.value_def(value) else {
        return true;
    };
    let Some((block, _)) = func.position(inst) else {
        return false;
    };
    if !loop_info.contains_block(block) {
        return true;
    }
    if depth >= MAX_INVARIANCE_DEPTH {
        return false;
    }
    match func.op(inst) {
        Some(op) if op.is_replayable() => op
            .uses()
            .into_iter()
            .all(|v| is_loop_invariant(func, loop_info, v, depth + 1)),
        _ => false,
    }
}

impl RegionInfo for BasicAnalyses {
    fn region_of(&self, func_id: FuncId, _func: &Function, loop_info: &LoopInfo) -> Option<Region> {
        Some(Region {
            func: func_id,
            header: loop_info.header_block(),
        })
    }
}

impl CanonicalLoopInfo for BasicAnalyses {
    fn canonical_loop(
        &self,
        region: &Region,
        func: &Function,
        loop_info: &LoopInfo,
    ) -> Option<CanonicalLoop> {
        match self.overrides.get(region) {
            Some(info) => info.clone(),
            None => Self::recognize(func, loop_info),
        }
    }
}

impl MemoryAccessClassifier for BasicAnalyses {
    fn classify(&self, func: &Function, inst: InstId) -> AccessClass {
        let Some(op) = func.op(inst) else {
            return AccessClass::None;
        };
        let value_ty = |v: &ValueId| func.value_type(*v).cloned().unwrap_or(IrType::Void);
        match op {
            Op::Load { addr, ty, .. } => AccessClass::Accesses(vec![MemoryAccess {
                addr: *addr,
                ty: ty.clone(),
                flags: AccessFlags::READ,
            }]),
            Op::Store { addr, value } => AccessClass::Accesses(vec![MemoryAccess {
                addr: *addr,
                ty: value_ty(value),
                flags: AccessFlags::WRITE,
            }]),
            Op::AtomicRmw { addr, value, .. } => AccessClass::Accesses(vec![MemoryAccess {
                addr: *addr,
                ty: value_ty(value),
                flags: AccessFlags::READ | AccessFlags::WRITE,
            }]),
            Op::CmpXchg { addr, expected, .. } => AccessClass::Accesses(vec![MemoryAccess {
                addr: *addr,
                ty: value_ty(expected),
                flags: AccessFlags::READ | AccessFlags::WRITE,
            }]),
            Op::Opaque {
                touches_memory: true,
                ..
            } => AccessClass::Unsupported,
            _ => AccessClass::None,
        }
    }
}

impl DebugInfoLookup for BasicAnalyses {
    fn variable(&self, func: &Function, value: ValueId) -> Option<DiVariable> {
        func.debug_var(value).cloned()
    }

    fn global_variable(&self, global: &Global) -> Option<DiVariable> {
        global.debug.clone()
    }

    fn loop_range(&self, func: &Function, loop_info: &LoopInfo) -> (Option<DebugLoc>, Option<DebugLoc>) {
        let located = |block: BlockId| {
            func.block(block).and_then(|b| {
                b.insts()
                    .iter()
                    .filter_map(|&i| func.inst(i))
                    .find(|i| !i.origin.is_instrumentation() && i.loc.is_some())
                    .and_then(|i| i.loc.clone())
            })
        };
        let start = located(loop_info.header_block());
        let end = loop_info
            .latches
            .iter()
            .rev()
            .find_map(|&latch| {
                let term = func.terminator(latch.into())?;
                func.inst(term)?.loc.clone()
            })
            .or_else(|| start.clone());
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{detect_loops, ControlFlowGraph, Dominance},
        ir::{Builder, CmpPred, FunctionType, Origin},
    };

    /// `for (i = 1; i < n - 1; ++i) {}` with the bound optionally recomputed from memory
    /// inside the body.
    fn counted_loop(bound_in_body: bool) -> (Function, BlockId) {
        let mut func = Function::new(
            "f",
            FunctionType::new(IrType::Void, vec![IrType::I32, IrType::Ptr]),
        );
        let n = func.param(0).unwrap();
        let p = func.param(1).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let header = b.create_block(Origin::User);
        let body = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);

        b.switch_to_block(entry);
        let one = b.iconst(32, 1);
        let end = b.sub(n, one, Origin::User).unwrap();
        b.jump(header, Origin::User).unwrap();

        b.switch_to_block(body);
        let next_placeholder = b.iconst(32, 0);
        b.jump(header, Origin::User).unwrap();

        b.switch_to_block(header);
        let i = b
            .phi(IrType::I32, vec![(entry, one), (body, next_placeholder)], Origin::User)
            .unwrap();
        let bound = if bound_in_body {
            b.load(IrType::I32, p, Origin::User).unwrap()
        } else {
            end
        };
        let c = b.cmp(CmpPred::Slt, i, bound, Origin::User).unwrap();
        b.branch(c, body, exit, Origin::User).unwrap();

        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();

        // i.next = i + 1 in the body, before its jump
        let jump = func.terminator(body).unwrap();
        let (_, next) = func
            .insert_value(
                crate::ir::InsertPoint::Before(jump),
                IrType::I32,
                Origin::User,
                None,
                |dest| Op::Binary {
                    dest,
                    op: crate::ir::BinaryOp::Add,
                    left: i,
                    right: one,
                },
            )
            .unwrap();
        let phi = func.defining_inst(i).unwrap();
        if let Some(Op::Phi { incoming, .. }) = func.inst_mut(phi).map(|x| &mut x.op) {
            incoming[1].1 = next;
        }
        (func, header)
    }

    fn loop_of(func: &Function) -> LoopInfo {
        let cfg = ControlFlowGraph::new(func);
        let dom = Dominance::new(&cfg);
        detect_loops(&cfg, dom.tree()).loops()[0].clone()
    }

    #[test]
    fn test_recognize_counted_loop() {
        let (func, header) = counted_loop(false);
        let l = loop_of(&func);
        assert_eq!(l.header_block(), header);
        let info = BasicAnalyses::recognize(&func, &l).unwrap();
        assert!(info.canonical);
        assert_eq!(info.step.unwrap().as_constant(), Some(1));
        assert_eq!(func.as_const_int(info.start.unwrap()), Some(1));
        assert!(info.end.is_some());
    }

    #[test]
    fn test_bound_loaded_in_loop_is_not_canonical() {
        let (func, _) = counted_loop(true);
        let l = loop_of(&func);
        let info = BasicAnalyses::recognize(&func, &l).unwrap();
        assert!(!info.canonical);
        assert!(info.start.is_some());
    }

    #[test]
    fn test_override_wins() {
        let (func, header) = counted_loop(false);
        let l = loop_of(&func);
        let analyses = BasicAnalyses::new().with_canonical(FuncId::new(0), header, None);
        let region = analyses.region_of(FuncId::new(0), &func, &l).unwrap();
        assert!(analyses.canonical_loop(&region, &func, &l).is_none());
    }

    #[test]
    fn test_classify_memory() {
        let mut func = Function::new("g", FunctionType::new(IrType::Void, vec![IrType::Ptr]));
        let p = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let v = b.load(IrType::I32, p, Origin::User).unwrap();
        b.store(v, p, Origin::User).unwrap();
        b.opaque("asm", vec![p], true, Origin::User).unwrap();
        b.ret(None, Origin::User).unwrap();

        let insts = func.block(entry).unwrap().insts().to_vec();
        let analyses = BasicAnalyses::new();
        match analyses.classify(&func, insts[0]) {
            AccessClass::Accesses(a) => assert_eq!(a[0].flags, AccessFlags::READ),
            other => panic!("unexpected {other:?}"),
        }
        match analyses.classify(&func, insts[1]) {
            AccessClass::Accesses(a) => {
                assert_eq!(a[0].flags, AccessFlags::WRITE);
                assert_eq!(a[0].ty, IrType::I32);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(analyses.classify(&func, insts[2]), AccessClass::Unsupported);
        assert_eq!(analyses.classify(&func, insts[3]), AccessClass::None);
    }
}
