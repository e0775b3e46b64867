//! Builder API for constructing and extending functions.
//!
//! Origin is mandatory on every instruction the builder emits.

use crate::{
    ir::{
        BinaryOp, BlockId, Callee, CastKind, CmpPred, DebugLoc, Function, InsertPoint, InstId,
        Instruction, IrType, Op, Origin, ValueId,
    },
    Result,
};

/// Cursor-based instruction builder over one function.
///
/// Consecutive instructions land in program order whatever the cursor kind: after placing
/// at [`InsertPoint::After`] or [`InsertPoint::Start`], the cursor moves past the new
/// instruction.
pub struct Builder<'a> {
    func: &'a mut Function,
    cursor: Option<InsertPoint>,
    loc: Option<DebugLoc>,
}

impl<'a> Builder<'a> {
    /// Creates a builder with no cursor.
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            cursor: None,
            loc: None,
        }
    }

    /// Creates a builder positioned at `at`.
    pub fn at(func: &'a mut Function, at: InsertPoint) -> Self {
        Self {
            func,
            cursor: Some(at),
            loc: None,
        }
    }

    /// Returns the function being built.
    pub fn func(&mut self) -> &mut Function {
        &mut *self.func
    }

    /// Creates a new basic block.
    pub fn create_block(&mut self, origin: Origin) -> BlockId {
        self.func.add_block(origin)
    }

    /// Appends subsequent instructions to the end of `block`.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.cursor = Some(InsertPoint::End(block));
    }

    /// Moves the cursor.
    pub fn position(&mut self, at: InsertPoint) {
        self.cursor = Some(at);
    }

    /// Sets the source position attached to subsequent instructions.
    pub fn set_loc(&mut self, loc: Option<DebugLoc>) {
        self.loc = loc;
    }

    fn cursor(&self) -> Result<InsertPoint> {
        self.cursor
            .ok_or_else(|| malformed_error!("builder for {} has no insertion point", self.func.name))
    }

    fn advance(&mut self, placed: InstId) {
        if matches!(
            self.cursor,
            Some(InsertPoint::After(_) | InsertPoint::Start(_))
        ) {
            self.cursor = Some(InsertPoint::After(placed));
        }
    }

    fn push_value(
        &mut self,
        ty: IrType,
        origin: Origin,
        make: impl FnOnce(ValueId) -> Op,
    ) -> Result<ValueId> {
        let at = self.cursor()?;
        let (inst, value) = self
            .func
            .insert_value(at, ty, origin, self.loc.clone(), make)?;
        self.advance(inst);
        Ok(value)
    }

    fn push(&mut self, op: Op, origin: Origin) -> Result<InstId> {
        let at = self.cursor()?;
        let inst = self.func.insert(
            at,
            Instruction {
                origin,
                ..Instruction::new(op)
            }
            .with_loc(self.loc.clone()),
        )?;
        self.advance(inst);
        Ok(inst)
    }

    /// Integer constant; constants are interned and emit no instruction.
    pub fn iconst(&mut self, bits: u16, value: i64) -> ValueId {
        self.func.const_int(bits, value)
    }

    /// Binary arithmetic. The result has the type of `left`.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        left: ValueId,
        right: ValueId,
        origin: Origin,
    ) -> Result<ValueId> {
        let ty = self
            .func
            .value_type(left)
            .cloned()
            .ok_or_else(|| malformed_error!("unknown value {}", left))?;
        self.push_value(ty, origin, |dest| Op::Binary {
            dest,
            op,
            left,
            right,
        })
    }

    /// Integer addition.
    pub fn add(&mut self, left: ValueId, right: ValueId, origin: Origin) -> Result<ValueId> {
        self.binary(BinaryOp::Add, left, right, origin)
    }

    /// Integer subtraction.
    pub fn sub(&mut self, left: ValueId, right: ValueId, origin: Origin) -> Result<ValueId> {
        self.binary(BinaryOp::Sub, left, right, origin)
    }

    /// Integer multiplication.
    pub fn mul(&mut self, left: ValueId, right: ValueId, origin: Origin) -> Result<ValueId> {
        self.binary(BinaryOp::Mul, left, right, origin)
    }

    /// Integer comparison producing an `i1`.
    pub fn cmp(
        &mut self,
        pred: CmpPred,
        left: ValueId,
        right: ValueId,
        origin: Origin,
    ) -> Result<ValueId> {
        self.push_value(IrType::I1, origin, |dest| Op::Cmp {
            dest,
            pred,
            left,
            right,
        })
    }

    /// Type conversion.
    pub fn cast(
        &mut self,
        kind: CastKind,
        operand: ValueId,
        to: IrType,
        origin: Origin,
    ) -> Result<ValueId> {
        self.push_value(to.clone(), origin, |dest| Op::Cast {
            dest,
            kind,
            operand,
            to,
        })
    }

    /// Stack slot holding one `ty`.
    pub fn alloca(&mut self, ty: IrType, origin: Origin) -> Result<ValueId> {
        self.push_value(IrType::Ptr, origin, |dest| Op::Alloca { dest, ty })
    }

    /// Memory read.
    pub fn load(&mut self, ty: IrType, addr: ValueId, origin: Origin) -> Result<ValueId> {
        self.push_value(ty.clone(), origin, |dest| Op::Load { dest, addr, ty })
    }

    /// Memory write.
    pub fn store(&mut self, value: ValueId, addr: ValueId, origin: Origin) -> Result<InstId> {
        self.push(Op::Store { addr, value }, origin)
    }

    /// Atomic read-modify-write returning the previous value.
    pub fn atomic_rmw(
        &mut self,
        op: BinaryOp,
        addr: ValueId,
        value: ValueId,
        origin: Origin,
    ) -> Result<ValueId> {
        let ty = self
            .func
            .value_type(value)
            .cloned()
            .ok_or_else(|| malformed_error!("unknown value {}", value))?;
        self.push_value(ty, origin, |dest| Op::AtomicRmw {
            dest,
            op,
            addr,
            value,
        })
    }

    /// Address arithmetic.
    pub fn element_ptr(
        &mut self,
        elem_ty: IrType,
        base: ValueId,
        indices: Vec<ValueId>,
        origin: Origin,
    ) -> Result<ValueId> {
        self.push_value(IrType::Ptr, origin, |dest| Op::ElementPtr {
            dest,
            base,
            elem_ty,
            indices,
        })
    }

    /// Function call. Returns the result for non-void `ret`.
    pub fn call(
        &mut self,
        callee: Callee,
        ret: IrType,
        args: Vec<ValueId>,
        origin: Origin,
    ) -> Result<Option<ValueId>> {
        if ret == IrType::Void {
            self.push(
                Op::Call {
                    dest: None,
                    callee,
                    args,
                },
                origin,
            )?;
            return Ok(None);
        }
        self.push_value(ret, origin, |dest| Op::Call {
            dest: Some(dest),
            callee,
            args,
        })
        .map(Some)
    }

    /// Operation the engine has no model for.
    pub fn opaque(
        &mut self,
        name: impl Into<String>,
        operands: Vec<ValueId>,
        touches_memory: bool,
        origin: Origin,
    ) -> Result<InstId> {
        self.push(
            Op::Opaque {
                dest: None,
                name: name.into(),
                operands,
                touches_memory,
            },
            origin,
        )
    }

    /// Phi node; place the cursor at the start of the block first.
    pub fn phi(
        &mut self,
        ty: IrType,
        incoming: Vec<(BlockId, ValueId)>,
        origin: Origin,
    ) -> Result<ValueId> {
        self.push_value(ty, origin, |dest| Op::Phi { dest, incoming })
    }

    /// Unconditional branch.
    pub fn jump(&mut self, target: BlockId, origin: Origin) -> Result<InstId> {
        self.push(Op::Jump { target }, origin)
    }

    /// Conditional branch.
    pub fn branch(
        &mut self,
        cond: ValueId,
        true_target: BlockId,
        false_target: BlockId,
        origin: Origin,
    ) -> Result<InstId> {
        self.push(
            Op::Branch {
                cond,
                true_target,
                false_target,
            },
            origin,
        )
    }

    /// Multi-way branch.
    pub fn switch(
        &mut self,
        value: ValueId,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
        origin: Origin,
    ) -> Result<InstId> {
        self.push(
            Op::Switch {
                value,
                default,
                cases,
            },
            origin,
        )
    }

    /// Return from the function.
    pub fn ret(&mut self, value: Option<ValueId>, origin: Origin) -> Result<InstId> {
        self.push(Op::Return { value }, origin)
    }

    /// Marks the end of a path control never reaches.
    pub fn unreachable(&mut self, origin: Origin) -> Result<InstId> {
        self.push(Op::Unreachable, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionType;

    #[test]
    fn test_build_counted_loop() {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![IrType::I32]));
        let n = func.param(0).unwrap();
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::User);
        let header = b.create_block(Origin::User);
        let exit = b.create_block(Origin::User);

        b.switch_to_block(entry);
        let zero = b.iconst(32, 0);
        let one = b.iconst(32, 1);
        b.jump(header, Origin::User).unwrap();

        b.switch_to_block(header);
        let i = b.phi(IrType::I32, vec![(entry, zero)], Origin::User).unwrap();
        let next = b.add(i, one, Origin::User).unwrap();
        let c = b.cmp(CmpPred::Slt, next, n, Origin::User).unwrap();
        b.branch(c, header, exit, Origin::User).unwrap();

        b.switch_to_block(exit);
        b.ret(None, Origin::User).unwrap();

        assert_eq!(func.successors(header), vec![header, exit]);
        assert_eq!(func.block(header).unwrap().len(), 4);
        assert_eq!(func.value_type(c), Some(&IrType::I1));
    }

    #[test]
    fn test_cursor_keeps_program_order() {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![]));
        let entry = func.add_block(Origin::User);
        let mut b = Builder::new(&mut func);
        b.switch_to_block(entry);
        b.ret(None, Origin::User).unwrap();

        b.position(InsertPoint::Start(entry));
        let one = b.iconst(64, 1);
        let a = b.add(one, one, Origin::Instrumentation).unwrap();
        let m = b.mul(a, a, Origin::Instrumentation).unwrap();

        let first = func.defining_inst(a).unwrap();
        let second = func.defining_inst(m).unwrap();
        assert_eq!(func.position(first), Some((entry, 0)));
        assert_eq!(func.position(second), Some((entry, 1)));
        assert!(func.inst(second).unwrap().origin.is_instrumentation());
    }

    #[test]
    fn test_void_call_has_no_result() {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![]));
        let entry = func.add_block(Origin::User);
        let mut b = Builder::at(&mut func, InsertPoint::End(entry));
        let r = b
            .call(Callee::Direct(crate::ir::FuncId::new(0)), IrType::Void, vec![], Origin::User)
            .unwrap();
        assert!(r.is_none());
        let r = b
            .call(Callee::Direct(crate::ir::FuncId::new(0)), IrType::I32, vec![], Origin::User)
            .unwrap();
        assert!(r.is_some());
    }

    #[test]
    fn test_missing_cursor_is_error() {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![]));
        let mut b = Builder::new(&mut func);
        assert!(b.ret(None, Origin::User).is_err());
    }
}
