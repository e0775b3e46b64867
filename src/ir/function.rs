//! Functions: blocks, an instruction arena and a value table.

use std::{collections::HashMap, fmt};

use crate::{
    ir::{
        Block, BlockId, ConstValue, DebugLoc, DiSubprogram, DiVariable, FuncId, FunctionType,
        GlobalId, InstId, Instruction, IrType, Op, Origin, ValueData, ValueDef, ValueId,
    },
    Result,
};

/// Symbol linkage of a function or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    /// Visible to other units.
    #[default]
    External,
    /// Private to the unit.
    Internal,
    /// May be defined in several units; the linker keeps one copy.
    LinkOnce,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => f.write_str("external"),
            Linkage::Internal => f.write_str("internal"),
            Linkage::LinkOnce => f.write_str("linkonce"),
        }
    }
}

/// Compiler intrinsics the engine recognizes by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// Declares the debug variable of a stack slot.
    DbgDeclare,
    /// Describes the debug variable of an SSA value.
    DbgValue,
    /// Optimizer assumption.
    Assume,
}

/// Where a new instruction is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before an instruction.
    Before(InstId),
    /// Immediately after an instruction.
    After(InstId),
    /// After the phi prefix of a block.
    Start(BlockId),
    /// At the end of a block.
    End(BlockId),
}

/// A function definition or declaration.
///
/// Declarations have no blocks. Instructions live in an arena indexed by [`InstId`] and are
/// placed into blocks by reference, so handles survive insertion and erasure of neighbours.
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// Signature.
    pub sig: FunctionType,
    /// Symbol linkage.
    pub linkage: Linkage,
    /// Provenance tag.
    pub origin: Origin,
    /// Set for functions that belong to the runtime analysis library.
    pub runtime: bool,
    /// Set for recognized compiler intrinsics.
    pub intrinsic: Option<Intrinsic>,
    /// Source-level description.
    pub subprogram: Option<DiSubprogram>,
    /// Set once the engine has processed the body.
    pub instrumented: bool,
    entry: Option<BlockId>,
    blocks: Vec<Block>,
    insts: Vec<Instruction>,
    values: Vec<ValueData>,
    params: Vec<ValueId>,
    interned: HashMap<ValueDef, ValueId>,
    debug_vars: HashMap<ValueId, DiVariable>,
}

impl Function {
    /// Creates a function with the given signature and no body.
    pub fn new(name: impl Into<String>, sig: FunctionType) -> Self {
        let mut func = Self {
            name: name.into(),
            sig,
            linkage: Linkage::External,
            origin: Origin::User,
            runtime: false,
            intrinsic: None,
            subprogram: None,
            instrumented: false,
            entry: None,
            blocks: Vec::new(),
            insts: Vec::new(),
            values: Vec::new(),
            params: Vec::new(),
            interned: HashMap::new(),
            debug_vars: HashMap::new(),
        };
        let param_types = func.sig.params.clone();
        for (i, ty) in param_types.into_iter().enumerate() {
            let id = func.push_value(ty, ValueDef::Argument(i as u32));
            func.params.push(id);
        }
        func
    }

    /// Returns `true` if the function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the formal parameters.
    #[must_use]
    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    /// Returns the formal parameter at `index`.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<ValueId> {
        self.params.get(index).copied()
    }

    fn push_value(&mut self, ty: IrType, def: ValueDef) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ValueData {
            ty,
            def,
            name: None,
        });
        id
    }

    fn intern(&mut self, def: ValueDef, ty: IrType) -> ValueId {
        if let Some(&id) = self.interned.get(&def) {
            return id;
        }
        let id = self.push_value(ty, def);
        self.interned.insert(def, id);
        id
    }

    /// Returns the value-table entry of `value`.
    #[must_use]
    pub fn value(&self, value: ValueId) -> Option<&ValueData> {
        self.values.get(value.index())
    }

    /// Returns the static type of `value`.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> Option<&IrType> {
        self.value(value).map(|v| &v.ty)
    }

    /// Returns the definition site of `value`.
    #[must_use]
    pub fn value_def(&self, value: ValueId) -> Option<ValueDef> {
        self.value(value).map(|v| v.def)
    }

    /// Returns the number of entries in the value table.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Names a value for printing.
    pub fn set_value_name(&mut self, value: ValueId, name: impl Into<String>) {
        if let Some(data) = self.values.get_mut(value.index()) {
            data.name = Some(name.into());
        }
    }

    /// Returns the interned integer constant `value` of width `bits`.
    pub fn const_int(&mut self, bits: u16, value: i64) -> ValueId {
        self.intern(ValueDef::Const(ConstValue::Int { value, bits }), IrType::Int(bits))
    }

    /// Returns the interned null pointer.
    pub fn null_ptr(&mut self) -> ValueId {
        self.intern(ValueDef::Const(ConstValue::Null), IrType::Ptr)
    }

    /// Returns the interned address of a unit global.
    pub fn global_ref(&mut self, global: GlobalId) -> ValueId {
        self.intern(ValueDef::Global(global), IrType::Ptr)
    }

    /// Returns the interned address of a unit function.
    pub fn function_ref(&mut self, func: FuncId) -> ValueId {
        self.intern(ValueDef::Function(func), IrType::Ptr)
    }

    /// Returns the integer payload of a constant value.
    #[must_use]
    pub fn as_const_int(&self, value: ValueId) -> Option<i64> {
        match self.value_def(value)? {
            ValueDef::Const(c) => c.as_int(),
            _ => None,
        }
    }

    /// Returns the source variable recorded for `value`.
    #[must_use]
    pub fn debug_var(&self, value: ValueId) -> Option<&DiVariable> {
        self.debug_vars.get(&value)
    }

    /// Records the source variable backing `value` (usually a stack slot).
    pub fn set_debug_var(&mut self, value: ValueId, var: DiVariable) {
        self.debug_vars.insert(value, var);
    }

    /// Appends a new empty block.
    ///
    /// The first block added becomes the entry block.
    pub fn add_block(&mut self, origin: Origin) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id, origin));
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// Makes `block` the entry block.
    pub fn set_entry(&mut self, block: BlockId) -> Result<()> {
        if block.index() >= self.blocks.len() {
            return Err(malformed_error!("{} is not a block of {}", block, self.name));
        }
        self.entry = Some(block);
        Ok(())
    }

    /// Returns a block by handle.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<&Block> {
        self.blocks.get(block.index())
    }

    /// Returns a mutable block by handle.
    pub fn block_mut(&mut self, block: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(block.index())
    }

    /// Iterates over all blocks in handle order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns an instruction by handle.
    #[must_use]
    pub fn inst(&self, inst: InstId) -> Option<&Instruction> {
        self.insts.get(inst.index())
    }

    /// Returns a mutable instruction by handle.
    pub fn inst_mut(&mut self, inst: InstId) -> Option<&mut Instruction> {
        self.insts.get_mut(inst.index())
    }

    /// Returns the operation of an instruction.
    #[must_use]
    pub fn op(&self, inst: InstId) -> Option<&Op> {
        self.inst(inst).map(|i| &i.op)
    }

    /// Returns the size of the instruction arena, erased slots included.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Returns every placed instruction in block order.
    #[must_use]
    pub fn inst_ids(&self) -> Vec<InstId> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
            .collect()
    }

    /// Returns the defining instruction of `value`, if it is an instruction result.
    #[must_use]
    pub fn defining_inst(&self, value: ValueId) -> Option<InstId> {
        self.value_def(value)?.inst()
    }

    /// Returns the block and index of a placed instruction.
    #[must_use]
    pub fn position(&self, inst: InstId) -> Option<(BlockId, usize)> {
        let block = self.inst(inst)?.block?;
        let index = self.block(block)?.insts.iter().position(|&i| i == inst)?;
        Some((block, index))
    }

    /// Returns the terminator of `block`.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = self.block(block)?.last()?;
        self.op(last)?.is_terminator().then_some(last)
    }

    /// Returns the successors of `block`, including duplicate edges.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .and_then(|t| self.op(t))
            .map(Op::successors)
            .unwrap_or_default()
    }

    /// Returns the distinct predecessors of `block` in handle order.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .map(Block::id)
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// Returns the first point after the phi prefix of `block`.
    #[must_use]
    pub fn first_insertion_point(&self, block: BlockId) -> InsertPoint {
        let first = self.block(block).and_then(|b| {
            b.insts
                .iter()
                .copied()
                .find(|&i| self.op(i).is_some_and(|op| !op.is_phi()))
        });
        match first {
            Some(inst) => InsertPoint::Before(inst),
            None => InsertPoint::End(block),
        }
    }

    /// Returns the placed instructions reading `value`.
    #[must_use]
    pub fn users(&self, value: ValueId) -> Vec<InstId> {
        self.inst_ids()
            .into_iter()
            .filter(|&i| self.op(i).is_some_and(|op| op.uses().contains(&value)))
            .collect()
    }

    /// Returns `true` if any placed instruction reads `value`.
    #[must_use]
    pub fn has_users(&self, value: ValueId) -> bool {
        self.blocks.iter().any(|b| {
            b.insts
                .iter()
                .any(|&i| self.op(i).is_some_and(|op| op.uses().contains(&value)))
        })
    }

    fn resolve(&self, at: InsertPoint) -> Result<(BlockId, usize)> {
        match at {
            InsertPoint::Before(inst) => self
                .position(inst)
                .ok_or_else(|| malformed_error!("{} is not placed in {}", inst, self.name)),
            InsertPoint::After(inst) => self
                .position(inst)
                .map(|(b, i)| (b, i + 1))
                .ok_or_else(|| malformed_error!("{} is not placed in {}", inst, self.name)),
            InsertPoint::Start(block) => match self.first_insertion_point(block) {
                InsertPoint::Before(inst) => self.resolve(InsertPoint::Before(inst)),
                _ => self.resolve(InsertPoint::End(block)),
            },
            InsertPoint::End(block) => self
                .block(block)
                .map(|b| (block, b.insts.len()))
                .ok_or_else(|| malformed_error!("{} is not a block of {}", block, self.name)),
        }
    }

    fn place(&mut self, at: InsertPoint, inst: Instruction) -> Result<InstId> {
        let (block, index) = self.resolve(at)?;
        let id = InstId::new(self.insts.len());
        self.insts.push(Instruction {
            block: Some(block),
            ..inst
        });
        self.blocks[block.index()].insts.insert(index, id);
        Ok(id)
    }

    /// Places an instruction that defines no value.
    ///
    /// Value-defining operations must go through [`Function::insert_value`] so the result
    /// gets a value-table entry.
    pub fn insert(&mut self, at: InsertPoint, inst: Instruction) -> Result<InstId> {
        if inst.op.dest().is_some() {
            return Err(malformed_error!(
                "'{}' defines a value; use insert_value",
                inst.op
            ));
        }
        self.place(at, inst)
    }

    /// Places a value-defining instruction built by `make` from the fresh result value.
    pub fn insert_value(
        &mut self,
        at: InsertPoint,
        ty: IrType,
        origin: Origin,
        loc: Option<DebugLoc>,
        make: impl FnOnce(ValueId) -> Op,
    ) -> Result<(InstId, ValueId)> {
        let inst_id = InstId::new(self.insts.len());
        let value = ValueId::new(self.values.len());
        let op = make(value);
        if op.dest() != Some(value) {
            return Err(malformed_error!("'{}' does not define {}", op, value));
        }
        // Resolve first so a bad insertion point leaves the tables untouched
        self.resolve(at)?;
        self.push_value(ty, ValueDef::Inst(inst_id));
        let placed = self.place(
            at,
            Instruction {
                op,
                origin,
                loc,
                block: None,
            },
        )?;
        Ok((placed, value))
    }

    /// Detaches an instruction from its block. Its handle and result stay valid.
    pub fn erase(&mut self, inst: InstId) -> Result<()> {
        let (block, index) = self
            .position(inst)
            .ok_or_else(|| malformed_error!("{} is not placed in {}", inst, self.name))?;
        self.blocks[block.index()].insts.remove(index);
        self.insts[inst.index()].block = None;
        Ok(())
    }

    /// Rewrites every use of `old` in placed instructions to `new`.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) -> usize {
        let ids = self.inst_ids();
        ids.into_iter()
            .map(|i| self.insts[i.index()].op.replace_uses(old, new))
            .sum()
    }

    /// Redirects the edges of `block`'s terminator from `old` to `new`.
    pub fn redirect_edge(&mut self, block: BlockId, old: BlockId, new: BlockId) -> bool {
        match self.terminator(block) {
            Some(term) => self.insts[term.index()].op.redirect_target(old, new),
            None => false,
        }
    }

    /// Rewrites the incoming block `old_pred` to `new_pred` in every phi of `block`.
    pub fn redirect_phi_block(&mut self, block: BlockId, old_pred: BlockId, new_pred: BlockId) {
        let Some(insts) = self.block(block).map(|b| b.insts.clone()) else {
            return;
        };
        for inst in insts {
            if let Op::Phi { incoming, .. } = &mut self.insts[inst.index()].op {
                for (pred, _) in incoming.iter_mut() {
                    if *pred == old_pred {
                        *pred = new_pred;
                    }
                }
            }
        }
    }

    /// Returns the phi instructions of `block`.
    #[must_use]
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.block(block)
            .map(|b| {
                b.insts
                    .iter()
                    .copied()
                    .take_while(|&i| self.op(i).is_some_and(Op::is_phi))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fmt_value(&self, f: &mut fmt::Formatter<'_>, value: ValueId) -> fmt::Result {
        match self.value(value) {
            Some(ValueData {
                def: ValueDef::Const(c),
                ..
            }) => write!(f, "{c}"),
            Some(ValueData {
                name: Some(name), ..
            }) => write!(f, "{value}.{name}"),
            _ => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(f, "{keyword} {} {} @{}(", self.linkage, self.sig.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ", self.sig.params[i])?;
            self.fmt_value(f, *param)?;
        }
        write!(f, ")")?;
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            write!(f, "{}:", block.id())?;
            if Some(block.id()) == self.entry {
                write!(f, " ; entry")?;
            }
            writeln!(f)?;
            for &inst in &block.insts {
                writeln!(f, "  {}", self.insts[inst.index()])?;
            }
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    fn sample() -> (Function, BlockId, BlockId) {
        let mut func = Function::new("f", FunctionType::new(IrType::I32, vec![IrType::I32]));
        let entry = func.add_block(Origin::User);
        let exit = func.add_block(Origin::User);
        func.insert(InsertPoint::End(entry), Instruction::new(Op::Jump { target: exit }))
            .unwrap();
        let x = func.param(0).unwrap();
        func.insert(
            InsertPoint::End(exit),
            Instruction::new(Op::Return { value: Some(x) }),
        )
        .unwrap();
        (func, entry, exit)
    }

    #[test]
    fn test_params_and_constants() {
        let mut func = Function::new("f", FunctionType::new(IrType::Void, vec![IrType::I32]));
        assert_eq!(func.params().len(), 1);
        assert!(func.is_declaration());

        let a = func.const_int(32, 5);
        let b = func.const_int(32, 5);
        let c = func.const_int(64, 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(func.as_const_int(a), Some(5));
        assert_eq!(func.value_type(c), Some(&IrType::I64));
    }

    #[test]
    fn test_cfg_queries() {
        let (func, entry, exit) = sample();
        assert_eq!(func.entry(), Some(entry));
        assert_eq!(func.successors(entry), vec![exit]);
        assert_eq!(func.predecessors(exit), vec![entry]);
        assert!(func.terminator(exit).is_some());
    }

    #[test]
    fn test_insert_value_before_and_after() {
        let (mut func, _, exit) = sample();
        let ret = func.terminator(exit).unwrap();
        let x = func.param(0).unwrap();
        let one = func.const_int(32, 1);

        let (add, sum) = func
            .insert_value(
                InsertPoint::Before(ret),
                IrType::I32,
                Origin::User,
                None,
                |dest| Op::Binary {
                    dest,
                    op: BinaryOp::Add,
                    left: x,
                    right: one,
                },
            )
            .unwrap();
        assert_eq!(func.position(add), Some((exit, 0)));
        assert_eq!(func.defining_inst(sum), Some(add));

        let (mul, _) = func
            .insert_value(
                InsertPoint::After(add),
                IrType::I32,
                Origin::Instrumentation,
                None,
                |dest| Op::Binary {
                    dest,
                    op: BinaryOp::Mul,
                    left: sum,
                    right: sum,
                },
            )
            .unwrap();
        assert_eq!(func.position(mul), Some((exit, 1)));
        assert_eq!(func.users(sum), vec![mul]);
    }

    #[test]
    fn test_insert_rejects_value_ops() {
        let (mut func, entry, _) = sample();
        let x = func.param(0).unwrap();
        let op = Op::Alloca {
            dest: x,
            ty: IrType::I32,
        };
        assert!(func
            .insert(InsertPoint::Start(entry), Instruction::new(op))
            .is_err());
    }

    #[test]
    fn test_erase_and_redirect() {
        let (mut func, entry, exit) = sample();
        let other = func.add_block(Origin::Instrumentation);
        assert!(func.redirect_edge(entry, exit, other));
        assert_eq!(func.successors(entry), vec![other]);

        let term = func.terminator(entry).unwrap();
        func.erase(term).unwrap();
        assert!(func.terminator(entry).is_none());
        assert!(!func.inst(term).unwrap().is_live());
        assert!(func.erase(term).is_err());
    }

    #[test]
    fn test_display() {
        let (func, _, _) = sample();
        let text = func.to_string();
        assert!(text.starts_with("define external i32 @f(i32 %0) {"));
        assert!(text.contains("jump bb1"));
        assert!(text.contains("ret %0"));
    }
}
