//! Control-flow normalization around loops.
//!
//! Loop instrumentation needs two shapes: a unique preheader whose only successor is the
//! header (where `loopBegin` goes) and a dedicated block on every edge leaving the loop (where
//! `loopEnd` goes without affecting other exits or other loops sharing the same successor).
//! Every block synthesized here is tagged [`Origin::Instrumentation`].

use crate::{
    analysis::LoopInfo,
    ir::{BlockId, Function, InsertPoint, InstId, Instruction, IrType, Op, Origin},
    Result,
};

/// Result of [`ensure_preheader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preheader {
    /// The preheader block.
    pub block: BlockId,
    /// Set when the block was synthesized.
    pub inserted: bool,
}

/// Returns the loop's preheader, synthesizing one when the loop has none.
///
/// A synthesized preheader receives every edge that entered the header from outside the
/// loop. Header phis are rewired: a single outside predecessor is renamed, several are merged
/// by a new phi in the preheader. When the header is the function entry, the preheader
/// becomes the new entry.
pub fn ensure_preheader(func: &mut Function, loop_info: &LoopInfo) -> Result<Preheader> {
    if let Some(block) = loop_info.preheader {
        return Ok(Preheader {
            block: block.into(),
            inserted: false,
        });
    }
    let header = loop_info.header_block();
    let outside: Vec<BlockId> = func
        .predecessors(header)
        .into_iter()
        .filter(|&p| !loop_info.contains_block(p))
        .collect();

    let pre = func.add_block(Origin::Instrumentation);
    for &pred in &outside {
        func.redirect_edge(pred, header, pre);
    }
    if func.entry() == Some(header) {
        func.set_entry(pre)?;
    }

    for phi in func.phis(header) {
        let Some(Op::Phi { incoming, .. }) = func.op(phi).cloned() else {
            continue;
        };
        let (entering, staying): (Vec<_>, Vec<_>) =
            incoming.into_iter().partition(|(b, _)| outside.contains(b));
        if entering.is_empty() {
            continue;
        }
        let merged = if let [(_, value)] = entering.as_slice() {
            *value
        } else {
            let ty = phi_type(func, phi)?;
            let (_, value) = func.insert_value(
                InsertPoint::End(pre),
                ty,
                Origin::Instrumentation,
                None,
                |dest| Op::Phi {
                    dest,
                    incoming: entering.clone(),
                },
            )?;
            value
        };
        let mut rewired = staying;
        rewired.insert(0, (pre, merged));
        if let Some(Op::Phi { incoming, .. }) = func.inst_mut(phi).map(|i| &mut i.op) {
            *incoming = rewired;
        }
    }

    func.insert(
        InsertPoint::End(pre),
        Instruction::synthetic(Op::Jump { target: header }),
    )?;
    tracing::debug!("insert preheader {} for loop at {}", pre, header);
    Ok(Preheader {
        block: pre,
        inserted: true,
    })
}

fn phi_type(func: &Function, phi: InstId) -> Result<IrType> {
    func.op(phi)
        .and_then(Op::dest)
        .and_then(|v| func.value_type(v).cloned())
        .ok_or_else(|| malformed_error!("phi {} has no typed result", phi))
}

/// Places a dedicated block on every edge leaving the loop and returns the new blocks.
///
/// Each exiting block gets its own block per exit target, even when several exiting blocks
/// share the target. Phis in the exit target are rewired to the new block.
pub fn split_exits(func: &mut Function, loop_info: &LoopInfo) -> Result<Vec<BlockId>> {
    let mut created = Vec::with_capacity(loop_info.exits.len());
    for exit in &loop_info.exits {
        let exiting: BlockId = exit.exiting_block.into();
        let target: BlockId = exit.exit_block.into();
        let block = func.add_block(Origin::Instrumentation);
        func.insert(
            InsertPoint::End(block),
            Instruction::synthetic(Op::Jump { target }),
        )?;
        if !func.redirect_edge(exiting, target, block) {
            return Err(malformed_error!(
                "{} has no edge to {} in {}",
                exiting,
                target,
                func.name
            ));
        }
        func.redirect_phi_block(target, exiting, block);
        tracing::debug!("insert exit block {} on {} -> {}", block, exiting, target);
        created.push(block);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{detect_loops, verify_unit, ControlFlowGraph, Dominance},
        ir::{Builder, CmpPred, FunctionType, Unit},
    };

    fn loop_of(func: &Function) -> LoopInfo {
        let cfg = ControlFlowGraph::new(func);
        let dom = Dominance::new(&cfg);
        detect_loops(&cfg, dom.tree()).loops()[0].clone()
    }

    fn verified(func: Function) {
        let mut unit = Unit::new("u", "u.c");
        unit.add_function(func);
        let result = verify_unit(&unit);
        assert!(result.is_ok(), "{result}");
    }

    /// Two entries into the header: `a -> header`, `b -> header`, plus `header -> header`.
    fn two_entry_loop() -> (Function, BlockId) {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![IrType::I1]));
        let flag = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let left = b.create_block(Origin::User);
        let right = b.create_block(Origin::User);
        let header = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);
        b.switch_to_block(entry);
        b.branch(flag, left, right, Origin::User).unwrap();
        b.switch_to_block(left);
        b.jump(header, Origin::User).unwrap();
        b.switch_to_block(right);
        b.jump(header, Origin::User).unwrap();
        b.switch_to_block(header);
        let zero = b.iconst(32, 0);
        let one = b.iconst(32, 1);
        let i = b
            .phi(
                IrType::I32,
                vec![(left, zero), (right, one), (header, zero)],
                Origin::User,
            )
            .unwrap();
        let next = b.add(i, one, Origin::User).unwrap();
        let c = b.cmp(CmpPred::Slt, next, one, Origin::User).unwrap();
        b.branch(c, header, exit, Origin::User).unwrap();
        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();
        let phi = func.defining_inst(i).unwrap();
        if let Some(Op::Phi { incoming, .. }) = func.inst_mut(phi).map(|x| &mut x.op) {
            incoming[2].1 = next;
        }
        (func, header)
    }

    #[test]
    fn test_existing_preheader_is_reused() {
        let mut func = Function::new("g", FunctionType::new(IrType::Void, vec![IrType::I1]));
        let flag = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let header = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);
        b.switch_to_block(entry);
        b.jump(header, Origin::User).unwrap();
        b.switch_to_block(header);
        b.branch(flag, header, exit, Origin::User).unwrap();
        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();

        let l = loop_of(&func);
        let pre = ensure_preheader(&mut func, &l).unwrap();
        assert_eq!(pre, Preheader { block: entry, inserted: false });
        assert_eq!(func.block_count(), 3);
    }

    #[test]
    fn test_preheader_merges_entering_phis() {
        let (mut func, header) = two_entry_loop();
        let l = loop_of(&func);
        let pre = ensure_preheader(&mut func, &l).unwrap();
        assert!(pre.inserted);
        assert_eq!(func.predecessors(header).len(), 2);
        assert_eq!(func.phis(pre.block).len(), 1);
        assert!(func
            .block(pre.block)
            .unwrap()
            .origin
            .is_instrumentation());

        let relooped = loop_of(&func);
        assert_eq!(relooped.preheader.map(BlockId::from), Some(pre.block));
        verified(func);
    }

    #[test]
    fn test_entry_header_gets_new_entry() {
        let mut func = Function::new("h", FunctionType::new(IrType::Void, vec![IrType::I1]));
        let flag = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let header = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);
        b.switch_to_block(header);
        b.branch(flag, header, exit, Origin::User).unwrap();
        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();

        let l = loop_of(&func);
        let pre = ensure_preheader(&mut func, &l).unwrap();
        assert_eq!(func.entry(), Some(pre.block));
        assert_eq!(func.successors(pre.block), vec![header]);
        verified(func);
    }

    #[test]
    fn test_split_exits_rewires_phis() {
        let (mut func, header) = two_entry_loop();
        let l = loop_of(&func);
        ensure_preheader(&mut func, &l).unwrap();
        let l = loop_of(&func);
        let exits = split_exits(&mut func, &l).unwrap();
        assert_eq!(exits.len(), 1);
        assert!(func.successors(header).contains(&exits[0]));
        assert_eq!(func.predecessors(exits[0]), vec![header]);
        verified(func);
    }
}
