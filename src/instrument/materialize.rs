//! Dominance-preserving materialization of symbolic values.
//!
//! A [`Materializer`] produces, at one fixed insertion point, concrete values for loop bounds
//! and steps. Operands that already dominate the insertion point are reused. Operands that do
//! not are cloned: the defining chain is copied depth-first and re-inserted immediately before
//! the insertion point in def-use order, leaving the originals untouched. A chain containing
//! an operation that cannot be replayed (a phi, a load, a call) makes the whole request fail.
//!
//! Clones that end up unused are erased by [`Materializer::finish`].

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{Dominance, SymbolicExpr},
    ir::{CastKind, Function, InsertPoint, InstId, IrType, Op, Origin, ValueId},
    Result,
};

/// Expands values at a fixed insertion point.
pub struct Materializer<'a> {
    func: &'a mut Function,
    dom: &'a Dominance,
    at: InstId,
    bits: u16,
    cloned: HashMap<ValueId, ValueId>,
    visiting: HashSet<ValueId>,
    created: Vec<InstId>,
}

impl<'a> Materializer<'a> {
    /// Creates a materializer inserting before `at` and producing `bits`-wide integers.
    pub fn new(func: &'a mut Function, dom: &'a Dominance, at: InstId, bits: u16) -> Self {
        Self {
            func,
            dom,
            at,
            bits,
            cloned: HashMap::new(),
            visiting: HashSet::new(),
            created: Vec::new(),
        }
    }

    /// Returns the function being modified.
    pub fn func(&mut self) -> &mut Function {
        &mut *self.func
    }

    /// Returns the instructions inserted so far.
    #[must_use]
    pub fn created(&self) -> &[InstId] {
        &self.created
    }

    /// Makes an existing integer value available at the insertion point, extended to the
    /// target width.
    ///
    /// Returns `None` when the value is not an integer, is wider than the target, or depends
    /// on an operation that cannot be replayed.
    pub fn value(&mut self, value: ValueId, signed: bool) -> Result<Option<ValueId>> {
        let Some(bits) = self.func.value_type(value).and_then(IrType::int_bits) else {
            return Ok(None);
        };
        if bits > self.bits {
            return Ok(None);
        }
        if let Some(c) = self.func.as_const_int(value) {
            return Ok(Some(self.constant(c, bits, signed)));
        }
        let Some(available) = self.available(value)? else {
            return Ok(None);
        };
        self.widen(available, bits, signed).map(Some)
    }

    /// Expands a symbolic expression at the insertion point, extended to the target width.
    ///
    /// Returns `None` if the expression is wider than the target or any leaf cannot be made
    /// available.
    pub fn expr(&mut self, expr: &SymbolicExpr, signed: bool) -> Result<Option<ValueId>> {
        let bits = expr.bit_width();
        if bits > self.bits {
            return Ok(None);
        }
        if let Some(c) = expr.as_constant() {
            return Ok(Some(self.constant(c, bits, signed)));
        }
        let Some(value) = self.expand(expr)? else {
            return Ok(None);
        };
        self.widen(value, bits, signed).map(Some)
    }

    /// Erases created instructions whose results ended up unused.
    ///
    /// Returns the number of erased instructions.
    pub fn finish(self) -> Result<usize> {
        let mut erased = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for &inst in self.created.iter().rev() {
                let live = self.func.inst(inst).is_some_and(|i| i.is_live());
                let dest = self.func.op(inst).and_then(Op::dest);
                if let (true, Some(dest)) = (live, dest) {
                    if !self.func.has_users(dest) {
                        self.func.erase(inst)?;
                        erased += 1;
                        changed = true;
                    }
                }
            }
        }
        Ok(erased)
    }

    fn constant(&mut self, value: i64, from_bits: u16, signed: bool) -> ValueId {
        let value = if signed || from_bits >= 64 {
            value
        } else {
            value & ((1i64 << from_bits) - 1)
        };
        self.func.const_int(self.bits, value)
    }

    fn widen(&mut self, value: ValueId, from_bits: u16, signed: bool) -> Result<ValueId> {
        if from_bits == self.bits {
            return Ok(value);
        }
        let kind = if signed { CastKind::SExt } else { CastKind::ZExt };
        let to = IrType::Int(self.bits);
        self.emit(to.clone(), |dest| Op::Cast {
            dest,
            kind,
            operand: value,
            to,
        })
    }

    fn emit(&mut self, ty: IrType, make: impl FnOnce(ValueId) -> Op) -> Result<ValueId> {
        let (inst, value) = self.func.insert_value(
            InsertPoint::Before(self.at),
            ty,
            Origin::Instrumentation,
            None,
            make,
        )?;
        self.created.push(inst);
        Ok(value)
    }

    fn expand(&mut self, expr: &SymbolicExpr) -> Result<Option<ValueId>> {
        match expr {
            SymbolicExpr::Constant { value, bits } => Ok(Some(self.func.const_int(*bits, *value))),
            SymbolicExpr::Value { value, .. } => self.available(*value),
            SymbolicExpr::Binary { op, left, right } => {
                let (Some(l), Some(r)) = (self.expand(left)?, self.expand(right)?) else {
                    return Ok(None);
                };
                let ty = IrType::Int(left.bit_width());
                let op = *op;
                self.emit(ty, |dest| Op::Binary {
                    dest,
                    op,
                    left: l,
                    right: r,
                })
                .map(Some)
            }
            SymbolicExpr::Extend { expr, bits, signed } => {
                let Some(inner) = self.expand(expr)? else {
                    return Ok(None);
                };
                if expr.bit_width() >= *bits {
                    return Ok(Some(inner));
                }
                let kind = if *signed { CastKind::SExt } else { CastKind::ZExt };
                self.emit(IrType::Int(*bits), |dest| Op::Cast {
                    dest,
                    kind,
                    operand: inner,
                    to: IrType::Int(*bits),
                })
                .map(Some)
            }
            SymbolicExpr::Truncate { expr, bits } => {
                let Some(inner) = self.expand(expr)? else {
                    return Ok(None);
                };
                if expr.bit_width() <= *bits {
                    return Ok(Some(inner));
                }
                self.emit(IrType::Int(*bits), |dest| Op::Cast {
                    dest,
                    kind: CastKind::Trunc,
                    operand: inner,
                    to: IrType::Int(*bits),
                })
                .map(Some)
            }
        }
    }

    /// Returns `value` itself if it dominates the insertion point, otherwise a clone of its
    /// defining chain.
    fn available(&mut self, value: ValueId) -> Result<Option<ValueId>> {
        if let Some(&clone) = self.cloned.get(&value) {
            return Ok(Some(clone));
        }
        if self.dom.value_dominates(self.func, value, self.at) {
            return Ok(Some(value));
        }
        let Some(def) = self.func.defining_inst(value) else {
            return Ok(None);
        };
        let Some(mut op) = self.func.op(def).cloned() else {
            return Ok(None);
        };
        if !op.is_replayable() || !self.visiting.insert(value) {
            return Ok(None);
        }
        for operand in op.uses() {
            let Some(replacement) = self.available(operand)? else {
                self.visiting.remove(&value);
                return Ok(None);
            };
            if replacement != operand {
                op.replace_uses(operand, replacement);
            }
        }
        self.visiting.remove(&value);

        let ty = self
            .func
            .value_type(value)
            .cloned()
            .ok_or_else(|| malformed_error!("unknown value {}", value))?;
        let clone = self.emit(ty, move |dest| {
            op.set_dest(dest);
            op
        })?;
        tracing::trace!("clone {} as {}", value, clone);
        self.cloned.insert(value, clone);
        Ok(Some(clone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::verify_unit,
        ir::{BinaryOp, Builder, CmpPred, FunctionType, Unit},
    };

    /// entry -> header -> (body -> header | exit); `n1 = n - 1` lives in the header.
    fn function() -> (Function, InstId, ValueId, ValueId, ValueId) {
        let mut func = Function::new(
            "f",
            FunctionType::new(IrType::Void, vec![IrType::I32, IrType::Ptr]),
        );
        let n = func.param(0).unwrap();
        let p = func.param(1).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let header = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let jump = b.jump(header, Origin::User).unwrap();
        b.switch_to_block(header);
        let one = b.iconst(32, 1);
        let n1 = b.sub(n, one, Origin::User).unwrap();
        let loaded = b.load(IrType::I32, p, Origin::User).unwrap();
        let c = b.cmp(CmpPred::Slt, n1, loaded, Origin::User).unwrap();
        b.branch(c, header, exit, Origin::User).unwrap();
        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();
        (func, jump, n, n1, loaded)
    }

    #[test]
    fn test_dominating_value_is_reused_and_widened() {
        let (mut func, jump, n, _, _) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 64);
        let wide = m.value(n, true).unwrap().unwrap();
        assert_ne!(wide, n);
        assert_eq!(m.created().len(), 1);
        let def = func.defining_inst(wide).unwrap();
        assert!(matches!(
            func.op(def),
            Some(Op::Cast {
                kind: CastKind::SExt,
                ..
            })
        ));
    }

    #[test]
    fn test_non_dominating_chain_is_cloned() {
        let (mut func, jump, _, n1, _) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 32);
        let clone = m.value(n1, true).unwrap().unwrap();
        assert_ne!(clone, n1);
        let def = func.defining_inst(clone).unwrap();
        let (block, _) = func.position(def).unwrap();
        assert_eq!(Some(block), func.entry());
        assert!(func.inst(def).unwrap().origin.is_instrumentation());
        // the original stays where it was
        assert!(func.defining_inst(n1).is_some_and(|i| func.inst(i).unwrap().is_live()));
    }

    #[test]
    fn test_unreplayable_chain_fails() {
        let (mut func, jump, _, _, loaded) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 64);
        assert_eq!(m.value(loaded, true).unwrap(), None);
        assert!(m.created().is_empty());
    }

    #[test]
    fn test_too_wide_value_fails() {
        let (mut func, jump, n, _, _) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 16);
        assert_eq!(m.value(n, true).unwrap(), None);
    }

    #[test]
    fn test_expression_expansion_and_cleanup() {
        let (mut func, jump, n, n1, _) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 64);
        let expr = SymbolicExpr::binary(
            BinaryOp::Mul,
            SymbolicExpr::value(n1, 32),
            SymbolicExpr::value(n, 32),
        );
        let value = m.expr(&expr, false).unwrap().unwrap();
        // sub clone, mul, zext
        assert_eq!(m.created().len(), 3);
        assert_eq!(m.finish().unwrap(), 3);
        assert!(!func.has_users(value));

        let mut unit = Unit::new("u", "u.c");
        unit.add_function(func);
        assert!(verify_unit(&unit).is_ok());
    }

    #[test]
    fn test_constant_expression_folds() {
        let (mut func, jump, _, _, _) = function();
        let dom = Dominance::of(&func);
        let mut m = Materializer::new(&mut func, &dom, jump, 64);
        let step = m.expr(&SymbolicExpr::constant(-1, 32), false).unwrap().unwrap();
        assert!(m.created().is_empty());
        assert_eq!(func.as_const_int(step), Some(0xffff_ffff));
    }
}
