//! Instrumentation of one unit.
//!
//! [`instrument_unit`] runs in four phases whose order matters:
//!
//! 1. Declarations: every function and global of the unit receives its metadata identifier
//!    before any body is visited, so recursive calls and accesses to globals resolve.
//! 2. Bodies: per function, loops are normalized and instrumented first, then every
//!    instruction that existed before instrumentation is visited once.
//! 3. Types: the type table is complete only now, so the id and size tables and the fix-up
//!    routine are emitted last.
//! 4. Descriptors: every identifier's descriptor is stored into the pool by the unit's
//!    describe function.
//!
//! Runtime calls take metadata as the pool entry `pool[base + id]`, where `base` is the
//! unit's identifier offset stored by the describe function when the program starts.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::{
    analysis::{
        detect_loops, verify_unit, AccessClass, AccessFlags, AnalysisProvider, CanonicalLoop,
        ControlFlowGraph, Dominance, LoopForest, MemoryAccess,
    },
    config::InstrumentConfig,
    events::{EventKind, EventLog},
    instrument::{
        descriptor,
        materialize::Materializer,
        registry::{MetaEntity, MetaKind, MetadataRegistry},
        rewrite,
        runtime::{RuntimeDecls, RuntimeFn},
        types::TypeRegistry,
    },
    ir::{
        BlockId, Builder, Callee, CastKind, DebugLoc, DiVariable, FuncId, Function, FunctionType,
        Global, GlobalId, GlobalInit, InsertPoint, InstId, IrType, Linkage, Op, Origin, Unit,
        UnitInstrumentation, ValueDef, ValueId,
    },
    Error, Result,
};

/// Shared metadata pool, one per linked program.
pub const POOL_GLOBAL: &str = "irprobe.di.pool";
/// Identifier offset of the unit, set when its describe function runs.
pub const UNIT_BASE_GLOBAL: &str = "irprobe.unit.base";
/// Function storing the unit's descriptors into the pool.
pub const DESCRIBE_FN: &str = "irprobe.init.di";
/// Function registering the unit's globals.
pub const REGISTER_GLOBALS_FN: &str = "irprobe.register.global";
/// Function shifting the unit's type ids and declaring them.
pub const TYPE_FIXUP_FN: &str = "irprobe.register.type";
/// Table of local type ids.
pub const TYPE_IDS_GLOBAL: &str = "irprobe.type.ids";
/// Table of type sizes in bits.
pub const TYPE_SIZES_GLOBAL: &str = "irprobe.type.sizes";
const DESCRIPTOR_GLOBAL: &str = "irprobe.di.str";

const MAX_STRIP_DEPTH: usize = 64;

bitflags! {
    /// Statically known parts of a loop's iteration space, as reported in the `bounds`
    /// descriptor field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoundsMask: u32 {
        /// The initial value is known.
        const START = 1;
        /// The end value is known.
        const END = 2;
        /// The step is known.
        const STEP = 4;
        /// Bounds are compared unsigned.
        const UNSIGNED = 8;
    }
}

/// Returns the pool global in the form every unit declares it.
pub(crate) fn pool_declaration() -> Global {
    Global {
        origin: Origin::Instrumentation,
        ..Global::new(POOL_GLOBAL, IrType::Ptr, GlobalInit::External)
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| malformed_error!("{} does not fit a 64-bit constant", value))
}

/// Returns the innermost element type of a possibly nested array.
fn element_type(ty: &IrType) -> &IrType {
    let mut current = ty;
    while let IrType::Array(elem, _) = current {
        current = elem;
    }
    current
}

/// Follows address arithmetic and pointer casts back to the accessed object.
fn strip_base(func: &Function, addr: ValueId) -> ValueId {
    let mut current = addr;
    for _ in 0..MAX_STRIP_DEPTH {
        current = match func.defining_inst(current).and_then(|i| func.op(i)) {
            Some(Op::ElementPtr { base, .. }) => *base,
            Some(Op::Cast {
                kind: CastKind::BitCast,
                operand,
                ..
            }) => *operand,
            _ => return current,
        };
    }
    current
}

fn is_skipped(func: &Function) -> bool {
    func.runtime || func.instrumented || func.intrinsic.is_some() || func.origin.is_instrumentation()
}

fn analyze(func: &Function) -> (Dominance, LoopForest) {
    let cfg = ControlFlowGraph::new(func);
    let dom = Dominance::new(&cfg);
    let forest = detect_loops(&cfg, dom.tree());
    (dom, forest)
}

/// Integer signedness the loop's exit comparisons use on `end`, as `(signed, unsigned)`.
fn comparison_signedness(func: &Function, end: ValueId) -> (bool, bool) {
    func.users(end)
        .into_iter()
        .filter_map(|i| match func.op(i) {
            Some(Op::Cmp { pred, .. }) => Some(*pred),
            _ => None,
        })
        .fold((false, false), |(s, u), pred| {
            (s || pred.is_signed(), u || pred.is_unsigned())
        })
}

/// Loop bounds available in the preheader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LoopBounds {
    start: Option<ValueId>,
    end: Option<ValueId>,
    step: Option<ValueId>,
    signed: Option<bool>,
}

impl LoopBounds {
    fn mask(&self) -> BoundsMask {
        let mut mask = BoundsMask::empty();
        mask.set(BoundsMask::START, self.start.is_some());
        mask.set(BoundsMask::END, self.end.is_some());
        mask.set(BoundsMask::STEP, self.step.is_some());
        mask.set(BoundsMask::UNSIGNED, self.signed == Some(false));
        mask
    }

    fn unknown(&self) -> Vec<&'static str> {
        [
            (self.start, "start"),
            (self.end, "end"),
            (self.step, "step"),
        ]
        .into_iter()
        .filter(|(v, _)| v.is_none())
        .map(|(_, name)| name)
        .collect()
    }
}

/// Computes the bounds of a loop at the materializer's insertion point.
///
/// The signedness comes from the comparisons using `end`. A loop without a usable `end`, or
/// whose comparisons disagree on signedness, has no known bound at all. A loop that is not
/// canonical only keeps its start value.
fn compute_bounds(
    m: &mut Materializer<'_>,
    canonical: Option<&CanonicalLoop>,
    bits: u16,
) -> Result<LoopBounds> {
    let Some(canonical) = canonical else {
        return Ok(LoopBounds::default());
    };
    let Some(end) = canonical.end else {
        return Ok(LoopBounds::default());
    };
    let end_fits = m
        .func()
        .value_type(end)
        .and_then(IrType::int_bits)
        .is_some_and(|b| b <= bits);
    if !end_fits {
        return Ok(LoopBounds::default());
    }
    let (signed, unsigned) = comparison_signedness(m.func(), end);
    if signed == unsigned {
        return Ok(LoopBounds::default());
    }
    let start = match canonical.start {
        Some(start) => m.value(start, signed)?,
        None => None,
    };
    if !canonical.canonical {
        return Ok(LoopBounds {
            start,
            signed: Some(signed),
            ..LoopBounds::default()
        });
    }
    let end = m.value(end, signed)?;
    let step = match &canonical.step {
        Some(step) => m.expr(step, signed)?,
        None => None,
    };
    Ok(LoopBounds {
        start,
        end,
        step,
        signed: Some(signed),
    })
}

/// What the unit pass remembers about a callee.
#[derive(Debug, Clone)]
struct CalleeInfo {
    name: String,
    skip: bool,
}

/// Per-unit state shared by every function pass.
struct UnitState<'a, A: ?Sized> {
    analyses: &'a A,
    config: &'a InstrumentConfig,
    log: &'a EventLog,
    unit_name: String,
    source_file: String,
    meta: MetadataRegistry,
    types: TypeRegistry,
    runtime: RuntimeDecls,
    pool: GlobalId,
    base: GlobalId,
    callees: Vec<CalleeInfo>,
    globals: HashMap<GlobalId, IrType>,
}

impl<A: AnalysisProvider + ?Sized> UnitState<'_, A> {
    /// Emits the address of the pool entry of `id`.
    fn slot(&self, b: &mut Builder<'_>, id: u64) -> Result<ValueId> {
        let base_ref = b.func().global_ref(self.base);
        let pool_ref = b.func().global_ref(self.pool);
        let base = b.load(IrType::I64, base_ref, Origin::Instrumentation)?;
        let offset = b.iconst(64, to_i64(id)?);
        let index = b.add(base, offset, Origin::Instrumentation)?;
        let pool = b.load(IrType::Ptr, pool_ref, Origin::Instrumentation)?;
        b.element_ptr(IrType::Ptr, pool, vec![index], Origin::Instrumentation)
    }

    /// Emits a load of the runtime metadata of `id`.
    fn meta_ptr(&self, b: &mut Builder<'_>, id: u64) -> Result<ValueId> {
        let slot = self.slot(b, id)?;
        b.load(IrType::Ptr, slot, Origin::Instrumentation)
    }

    fn call(&self, b: &mut Builder<'_>, rt: RuntimeFn, args: Vec<ValueId>) -> Result<()> {
        let callee = Callee::Direct(self.runtime.get(rt)?);
        b.call(callee, IrType::Void, args, Origin::Instrumentation)?;
        Ok(())
    }

    fn location_id(&mut self, loc: Option<&DebugLoc>) -> u64 {
        let Some(loc) = loc else {
            return MetaKind::Location.reserved_id();
        };
        let (id, fresh) = self.meta.register(MetaEntity::Location(loc.clone()));
        if fresh {
            self.meta.describe(id, descriptor::location(loc));
        }
        id
    }

    /// Registers a variable whose storage has type `ty`.
    fn variable_id(&mut self, entity: MetaEntity, ty: &IrType, var: Option<&DiVariable>) -> u64 {
        let (id, fresh) = self.meta.register(entity);
        if fresh {
            let (rank, _) = ty.array_shape();
            let elem = self.types.register(element_type(ty));
            self.meta
                .describe(id, descriptor::variable(var, &self.source_file, rank, elem));
        }
        id
    }

    /// Emits `regArray` or `regVar` for storage of type `ty` at `addr`.
    fn register_storage(
        &self,
        b: &mut Builder<'_>,
        meta: ValueId,
        ty: &IrType,
        addr: ValueId,
    ) -> Result<&'static str> {
        let (rank, count) = ty.array_shape();
        if rank > 0 {
            let size = b.iconst(64, to_i64(count)?);
            self.call(b, RuntimeFn::RegArray, vec![meta, size, addr])?;
            Ok("array")
        } else {
            self.call(b, RuntimeFn::RegVar, vec![meta, addr])?;
            Ok("scalar")
        }
    }

    fn declare_functions(&mut self, unit: &Unit) {
        for (id, func) in unit.functions() {
            if self.callees[id.index()].skip {
                continue;
            }
            let (meta, fresh) = self.meta.register(MetaEntity::Function(id));
            if fresh {
                let ret = self.types.register(&func.sig.ret);
                self.meta.describe(
                    meta,
                    descriptor::function(
                        Some(&func.name),
                        func.subprogram.as_ref(),
                        &self.source_file,
                        ret,
                        func.sig.params.len(),
                    ),
                );
            }
        }
    }

    /// Registers every user global and builds the function announcing the defined ones.
    fn register_globals(&mut self, unit: &mut Unit) -> Result<Option<FuncId>> {
        let mut ids: Vec<GlobalId> = self.globals.keys().copied().collect();
        ids.sort_unstable();
        let mut defined = Vec::new();
        for id in ids {
            let global = unit
                .global(id)
                .ok_or_else(|| malformed_error!("dangling global handle {}", id))?;
            let var = self.analyses.global_variable(global);
            let ty = global.ty.clone();
            let meta = self.variable_id(MetaEntity::Global(id), &ty, var.as_ref());
            if !global.is_declaration() {
                defined.push((id, meta, ty));
            }
        }
        if defined.is_empty() {
            return Ok(None);
        }

        let mut func = Function::new(REGISTER_GLOBALS_FN, FunctionType::new(IrType::Void, vec![]));
        func.linkage = Linkage::Internal;
        func.origin = Origin::Instrumentation;
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::Instrumentation);
        b.switch_to_block(entry);
        for (id, meta, ty) in &defined {
            let m = self.meta_ptr(&mut b, *meta)?;
            let addr = b.func().global_ref(*id);
            let kind = self.register_storage(&mut b, m, ty, addr)?;
            self.log
                .record(EventKind::VariableRegistered)
                .unit(&self.unit_name)
                .function(REGISTER_GLOBALS_FN)
                .message(kind);
        }
        b.ret(None, Origin::Instrumentation)?;
        Ok(Some(unit.add_function(func)))
    }

    /// Emits the type tables and the fix-up routine. Returns the routine and the type count.
    fn finalize_types(&mut self, unit: &mut Unit) -> Result<(FuncId, u64)> {
        let count = self.types.len();
        let table = IrType::array(IrType::I64, count);
        let ids = unit.add_global(Global {
            linkage: Linkage::Internal,
            origin: Origin::Instrumentation,
            ..Global::new(
                TYPE_IDS_GLOBAL,
                table.clone(),
                GlobalInit::IntArray {
                    bits: 64,
                    values: self.types.ids(),
                },
            )
        });
        let sizes = unit.add_global(Global::synthetic(
            TYPE_SIZES_GLOBAL,
            table,
            GlobalInit::IntArray {
                bits: 64,
                values: self.types.sizes(),
            },
        ));

        let mut func = Function::new(
            TYPE_FIXUP_FN,
            FunctionType::new(IrType::Void, vec![IrType::I64]),
        );
        func.linkage = Linkage::Internal;
        func.origin = Origin::Instrumentation;
        let offset = func
            .param(0)
            .ok_or_else(|| malformed_error!("{} lost its parameter", TYPE_FIXUP_FN))?;
        let mut b = Builder::new(&mut func);
        let entry = b.create_block(Origin::Instrumentation);
        b.switch_to_block(entry);
        let ids_ref = b.func().global_ref(ids);
        let sizes_ref = b.func().global_ref(sizes);
        for index in 0..count {
            let index = b.iconst(64, to_i64(index)?);
            let slot = b.element_ptr(IrType::I64, ids_ref, vec![index], Origin::Instrumentation)?;
            let local = b.load(IrType::I64, slot, Origin::Instrumentation)?;
            let shifted = b.add(local, offset, Origin::Instrumentation)?;
            b.store(shifted, slot, Origin::Instrumentation)?;
        }
        let n = b.iconst(64, to_i64(count)?);
        self.call(&mut b, RuntimeFn::DeclTypes, vec![n, ids_ref, sizes_ref])?;
        b.ret(None, Origin::Instrumentation)?;

        let fixup = unit.add_function(func);
        self.log
            .record(EventKind::TypesFinalized)
            .unit(&self.unit_name)
            .message(format!("{count} types"));
        Ok((fixup, count))
    }

    /// Stores every descriptor into the pool from the describe function.
    fn emit_descriptors(&self, unit: &mut Unit, describe: FuncId) -> Result<()> {
        let mut entries = Vec::new();
        for (id, text) in self.meta.descriptors() {
            let len = text.len() as u64 + 1;
            let global = unit.add_global(Global::synthetic(
                format!("{DESCRIPTOR_GLOBAL}.{id}"),
                IrType::array(IrType::I8, len),
                GlobalInit::Str(text.to_string()),
            ));
            entries.push((id, global));
        }

        let func = unit
            .function_mut(describe)
            .ok_or_else(|| malformed_error!("dangling function handle {}", describe))?;
        let type_offset = func
            .param(1)
            .ok_or_else(|| malformed_error!("{} lost its parameters", DESCRIBE_FN))?;
        let ret = func
            .entry()
            .and_then(|entry| func.terminator(entry))
            .ok_or_else(|| malformed_error!("{} has no body", DESCRIBE_FN))?;
        let mut b = Builder::at(func, InsertPoint::Before(ret));
        for (id, global) in entries {
            let slot = self.slot(&mut b, id)?;
            let text = b.func().global_ref(global);
            self.call(&mut b, RuntimeFn::InitDi, vec![slot, text, type_offset])?;
        }
        Ok(())
    }
}

/// Declares the pool in `unit`, checking an existing symbol of the same name.
fn declare_pool(unit: &mut Unit) -> Result<GlobalId> {
    if unit.find_function(POOL_GLOBAL).is_some() {
        return Err(Error::RuntimeSignature {
            name: POOL_GLOBAL.to_string(),
        });
    }
    let id = unit.get_or_insert_global(POOL_GLOBAL, pool_declaration);
    match unit.global(id) {
        Some(global) if global.ty == IrType::Ptr => Ok(id),
        _ => Err(Error::RuntimeSignature {
            name: POOL_GLOBAL.to_string(),
        }),
    }
}

/// Builds the describe function: `(i64 id_offset, i64 type_offset) -> void`.
///
/// Its body starts by storing the identifier offset into the unit base. Descriptors are
/// appended before its return once the unit is complete.
fn describe_function(base: GlobalId) -> Result<Function> {
    let mut func = Function::new(
        DESCRIBE_FN,
        FunctionType::new(IrType::Void, vec![IrType::I64, IrType::I64]),
    );
    func.linkage = Linkage::Internal;
    func.origin = Origin::Instrumentation;
    let id_offset = func
        .param(0)
        .ok_or_else(|| malformed_error!("{} lost its parameters", DESCRIBE_FN))?;
    let mut b = Builder::new(&mut func);
    let entry = b.create_block(Origin::Instrumentation);
    b.switch_to_block(entry);
    let base_ref = b.func().global_ref(base);
    b.store(id_offset, base_ref, Origin::Instrumentation)?;
    b.ret(None, Origin::Instrumentation)?;
    Ok(func)
}

/// Instruments one function body.
struct FunctionPass<'u, 'a, A: ?Sized> {
    func: &'u mut Function,
    id: FuncId,
    meta: u64,
    state: &'u mut UnitState<'a, A>,
}

impl<A: AnalysisProvider + ?Sized> FunctionPass<'_, '_, A> {
    fn run(mut self) -> Result<()> {
        let user: Vec<InstId> = self
            .func
            .inst_ids()
            .into_iter()
            .filter(|&i| {
                self.func
                    .inst(i)
                    .is_some_and(|inst| !inst.origin.is_instrumentation())
            })
            .collect();

        if self.state.config.instrument_loops {
            self.loops()?;
        }
        for inst in user {
            self.visit(inst)?;
        }
        self.func_begin()?;

        if self.state.config.internalize_link_once && self.func.linkage == Linkage::LinkOnce {
            self.func.linkage = Linkage::Internal;
            self.state
                .log
                .record(EventKind::LinkageInternalized)
                .unit(&self.state.unit_name)
                .function(&self.func.name);
        }
        self.func.instrumented = true;
        self.state
            .log
            .record(EventKind::FunctionInstrumented)
            .unit(&self.state.unit_name)
            .function(&self.func.name);
        Ok(())
    }

    fn visit(&mut self, inst: InstId) -> Result<()> {
        let Some(instruction) = self.func.inst(inst).filter(|i| i.is_live()) else {
            return Ok(());
        };
        let op = instruction.op.clone();
        let loc = instruction.loc.clone();
        tracing::trace!("process {}", op);

        let config = self.state.config;
        match &op {
            Op::Alloca { dest, ty } => self.alloca(inst, *dest, ty)?,
            Op::Return { .. } => self.func_end(inst)?,
            Op::Call {
                callee, args, dest, ..
            } if config.instrument_calls => {
                self.call_site(inst, *callee, args.len(), *dest, loc.as_ref())?;
            }
            Op::Store { addr, value } if config.register_arguments => {
                self.argument_mirror(inst, *addr, *value)?;
            }
            _ => {}
        }
        if config.instrument_memory {
            self.memory(inst, &op, loc.as_ref())?;
        }
        Ok(())
    }

    fn func_begin(&mut self) -> Result<()> {
        let entry = self
            .func
            .entry()
            .ok_or_else(|| malformed_error!("{} has no entry block", self.func.name))?;
        let state = &*self.state;
        let mut b = Builder::at(self.func, InsertPoint::Start(entry));
        let meta = state.meta_ptr(&mut b, self.meta)?;
        state.call(&mut b, RuntimeFn::FuncBegin, vec![meta])
    }

    fn func_end(&mut self, ret: InstId) -> Result<()> {
        let state = &*self.state;
        let mut b = Builder::at(self.func, InsertPoint::Before(ret));
        let meta = state.meta_ptr(&mut b, self.meta)?;
        state.call(&mut b, RuntimeFn::FuncEnd, vec![meta])
    }

    fn alloca(&mut self, inst: InstId, value: ValueId, ty: &IrType) -> Result<()> {
        let state = &mut *self.state;
        let var = state.analyses.variable(self.func, value);
        let meta = state.variable_id(MetaEntity::Local(self.id, value), ty, var.as_ref());
        let mut b = Builder::at(self.func, InsertPoint::After(inst));
        let m = state.meta_ptr(&mut b, meta)?;
        let kind = state.register_storage(&mut b, m, ty, value)?;
        state
            .log
            .record(EventKind::VariableRegistered)
            .unit(&state.unit_name)
            .at(&self.func.name, inst.index())
            .message(kind);
        Ok(())
    }

    fn call_site(
        &mut self,
        inst: InstId,
        callee: Callee,
        argc: usize,
        dest: Option<ValueId>,
        loc: Option<&DebugLoc>,
    ) -> Result<()> {
        let state = &mut *self.state;
        let (callee_meta, name) = match callee {
            Callee::Direct(f) => {
                let info = state
                    .callees
                    .get(f.index())
                    .ok_or_else(|| malformed_error!("call of unknown function {}", f))?;
                if info.skip {
                    return Ok(());
                }
                let name = info.name.clone();
                let meta = state
                    .meta
                    .get(&MetaEntity::Function(f))
                    .ok_or_else(|| malformed_error!("function {} was never declared", name))?;
                (meta, name)
            }
            Callee::Indirect(target) => {
                let (meta, fresh) = state.meta.register(MetaEntity::Local(self.id, target));
                if fresh {
                    let ret = dest
                        .and_then(|d| self.func.value_type(d).cloned())
                        .unwrap_or(IrType::Void);
                    let ret = state.types.register(&ret);
                    let symbol = self.func.value(target).and_then(|v| v.name.as_deref());
                    let text = descriptor::function(symbol, None, &state.source_file, ret, argc);
                    state.meta.describe(meta, text);
                }
                (meta, format!("indirect {target}"))
            }
        };
        let loc_meta = state.location_id(loc);

        let mut b = Builder::at(self.func, InsertPoint::Before(inst));
        let l = state.meta_ptr(&mut b, loc_meta)?;
        let f = state.meta_ptr(&mut b, callee_meta)?;
        state.call(&mut b, RuntimeFn::CallBegin, vec![l, f])?;
        let mut b = Builder::at(self.func, InsertPoint::After(inst));
        let f = state.meta_ptr(&mut b, callee_meta)?;
        state.call(&mut b, RuntimeFn::CallEnd, vec![f])?;

        state
            .log
            .record(EventKind::CallInstrumented)
            .unit(&state.unit_name)
            .at(&self.func.name, inst.index())
            .message(name);
        Ok(())
    }

    /// Registers the stack slot a formal parameter is spilled to.
    ///
    /// Applies to a store of an argument, used nowhere else, into an `alloca` whose debug
    /// variable is a parameter.
    fn argument_mirror(&mut self, store: InstId, addr: ValueId, value: ValueId) -> Result<()> {
        let Some(ValueDef::Argument(position)) = self.func.value_def(value) else {
            return Ok(());
        };
        let user_uses = self
            .func
            .users(value)
            .into_iter()
            .filter(|&i| {
                self.func
                    .inst(i)
                    .is_some_and(|inst| !inst.origin.is_instrumentation())
            })
            .count();
        if user_uses != 1 {
            return Ok(());
        }
        let Some(Op::Alloca { ty, .. }) = self
            .func
            .defining_inst(addr)
            .and_then(|i| self.func.op(i))
            .cloned()
        else {
            return Ok(());
        };

        let state = &mut *self.state;
        let Some(var) = state
            .analyses
            .variable(self.func, addr)
            .filter(DiVariable::is_parameter)
        else {
            return Ok(());
        };
        let arg_no = position;
        state.variable_id(MetaEntity::Local(self.id, addr), &ty, Some(&var));

        let mut b = Builder::at(self.func, InsertPoint::Before(store));
        let f = state.meta_ptr(&mut b, self.meta)?;
        let arg = b.iconst(64, i64::from(arg_no));
        let (rank, count) = ty.array_shape();
        if rank > 0 {
            let size = b.iconst(64, to_i64(count)?);
            state.call(&mut b, RuntimeFn::RegDummyArr, vec![f, size, addr, arg])?;
        } else {
            state.call(&mut b, RuntimeFn::RegDummyVar, vec![f, addr, arg])?;
        }
        state
            .log
            .record(EventKind::ArgumentRegistered)
            .unit(&state.unit_name)
            .at(&self.func.name, store.index())
            .message(format!("argument {arg_no}"));
        Ok(())
    }

    fn memory(&mut self, inst: InstId, op: &Op, loc: Option<&DebugLoc>) -> Result<()> {
        match self.state.analyses.classify(self.func, inst) {
            AccessClass::None => Ok(()),
            AccessClass::Unsupported => {
                tracing::warn!("unsupported memory access in {}: {}", self.func.name, op);
                self.state
                    .log
                    .record(EventKind::UnsupportedAccess)
                    .unit(&self.state.unit_name)
                    .at(&self.func.name, inst.index())
                    .message(op.to_string());
                Ok(())
            }
            AccessClass::Accesses(accesses) => {
                for access in &accesses {
                    self.access(inst, access, loc)?;
                }
                Ok(())
            }
        }
    }

    /// Returns the identifier of the object `base` points to and whether it is an array.
    ///
    /// A base that is neither a global nor an alloca is announced to the runtime right
    /// before `inst` the first time the function accesses it.
    fn base_info(
        &mut self,
        inst: InstId,
        base: ValueId,
        accessed: &IrType,
    ) -> Result<Option<(u64, bool)>> {
        let state = &mut *self.state;
        let Some(def) = self.func.value_def(base) else {
            return Ok(None);
        };
        let storage = match def {
            ValueDef::Global(g) => {
                let info = state.globals.get(&g).map(IrType::is_array).and_then(|array| {
                    state.meta.get(&MetaEntity::Global(g)).map(|id| (id, array))
                });
                return Ok(info);
            }
            ValueDef::Const(_) | ValueDef::Function(_) => return Ok(None),
            ValueDef::Inst(def) => match self.func.op(def) {
                Some(Op::Alloca { ty, .. }) => {
                    let ty = ty.clone();
                    let var = state.analyses.variable(self.func, base);
                    let id = state.variable_id(MetaEntity::Local(self.id, base), &ty, var.as_ref());
                    return Ok(Some((id, ty.is_array())));
                }
                _ => accessed.clone(),
            },
            ValueDef::Argument(_) => accessed.clone(),
        };

        let entity = MetaEntity::Local(self.id, base);
        let seen = state.meta.get(&entity).is_some();
        let var = state.analyses.variable(self.func, base);
        let id = state.variable_id(entity, &storage, var.as_ref());
        if !seen {
            let mut b = Builder::at(self.func, InsertPoint::Before(inst));
            let m = state.meta_ptr(&mut b, id)?;
            let kind = state.register_storage(&mut b, m, &storage, base)?;
            state
                .log
                .record(EventKind::VariableRegistered)
                .unit(&state.unit_name)
                .at(&self.func.name, inst.index())
                .message(kind);
        }
        Ok(Some((id, storage.is_array())))
    }

    fn access(&mut self, inst: InstId, access: &MemoryAccess, loc: Option<&DebugLoc>) -> Result<()> {
        let base = strip_base(self.func, access.addr);
        let Some((var_meta, array)) = self.base_info(inst, base, &access.ty)? else {
            return Ok(());
        };
        let state = &mut *self.state;
        let loc_meta = state.location_id(loc);
        let shape = if array { "array" } else { "scalar" };

        for (flag, at, scalar, indexed, verb) in [
            (
                AccessFlags::READ,
                InsertPoint::Before(inst),
                RuntimeFn::ReadScalar,
                RuntimeFn::ReadArray,
                "read",
            ),
            (
                AccessFlags::WRITE,
                InsertPoint::After(inst),
                RuntimeFn::WriteScalar,
                RuntimeFn::WriteArray,
                "write",
            ),
        ] {
            if !access.flags.contains(flag) {
                continue;
            }
            let mut b = Builder::at(self.func, at);
            let l = state.meta_ptr(&mut b, loc_meta)?;
            let v = state.meta_ptr(&mut b, var_meta)?;
            if array {
                state.call(&mut b, indexed, vec![l, access.addr, v, base])?;
            } else {
                state.call(&mut b, scalar, vec![l, access.addr, v])?;
            }
            state
                .log
                .record(EventKind::MemoryAccessInstrumented)
                .unit(&state.unit_name)
                .at(&self.func.name, inst.index())
                .message(format!("{verb} {shape}"));
        }
        Ok(())
    }

    fn loops(&mut self) -> Result<()> {
        let (_, forest) = analyze(self.func);
        let headers: Vec<BlockId> = forest.preorder().into_iter().map(BlockId::from).collect();
        for header in headers {
            self.instrument_loop(header)?;
        }
        Ok(())
    }

    fn instrument_loop(&mut self, header: BlockId) -> Result<()> {
        let (_, forest) = analyze(self.func);
        let Some(info) = forest.loop_for_header(header.into()).cloned() else {
            return Ok(());
        };
        let preheader = rewrite::ensure_preheader(self.func, &info)?;
        let state = &mut *self.state;
        if preheader.inserted {
            state
                .log
                .record(EventKind::PreheaderInserted)
                .unit(&state.unit_name)
                .at(&self.func.name, header.index())
                .message(format!("{} for loop at {}", preheader.block, header));
        }

        let (dom, forest) = analyze(self.func);
        let info = forest
            .loop_for_header(header.into())
            .cloned()
            .ok_or_else(|| malformed_error!("loop at {} lost in {}", header, self.func.name))?;
        let canonical = state
            .analyses
            .region_of(self.id, self.func, &info)
            .and_then(|region| state.analyses.canonical_loop(&region, self.func, &info));
        let (range_start, range_end) = state.analyses.loop_range(self.func, &info);
        let (loop_meta, _) = state.meta.register(MetaEntity::Loop(self.id, header));
        let at = self
            .func
            .terminator(preheader.block)
            .ok_or_else(|| malformed_error!("preheader {} has no terminator", preheader.block))?;

        let bits = state.config.bound_bits;
        let mut m = Materializer::new(self.func, &dom, at, bits);
        let bounds = compute_bounds(&mut m, canonical.as_ref(), bits)?;
        {
            let mut b = Builder::at(m.func(), InsertPoint::Before(at));
            let meta = state.meta_ptr(&mut b, loop_meta)?;
            let zero = b.iconst(bits, 0);
            let args = vec![
                meta,
                bounds.start.unwrap_or(zero),
                bounds.end.unwrap_or(zero),
                bounds.step.unwrap_or(zero),
            ];
            state.call(&mut b, RuntimeFn::LoopBegin, args)?;
        }
        let dropped = m.finish()?;
        if dropped > 0 {
            tracing::trace!("erase {} unused bound instructions", dropped);
        }

        let mask = bounds.mask();
        state.meta.describe(
            loop_meta,
            descriptor::seq_loop(
                &state.source_file,
                mask.bits(),
                range_start.as_ref(),
                range_end.as_ref(),
            ),
        );
        let unknown = bounds.unknown();
        if !unknown.is_empty() {
            state
                .log
                .record(EventKind::BoundUnknown)
                .unit(&state.unit_name)
                .at(&self.func.name, header.index())
                .message(format!("loop at {header}: unknown {}", unknown.join(", ")));
        }

        for block in rewrite::split_exits(self.func, &info)? {
            let mut b = Builder::at(self.func, InsertPoint::Start(block));
            let meta = state.meta_ptr(&mut b, loop_meta)?;
            state.call(&mut b, RuntimeFn::LoopEnd, vec![meta])?;
            state
                .log
                .record(EventKind::ExitBlockInserted)
                .unit(&state.unit_name)
                .at(&self.func.name, block.index())
                .message(format!("{block} leaves loop at {header}"));
        }

        // Iteration counter: 1 on entry, incremented on every back edge.
        let one = self.func.const_int(64, 1);
        let first = self
            .func
            .block(header)
            .and_then(|b| b.insts().first().copied())
            .ok_or_else(|| malformed_error!("loop header {} is empty", header))?;
        let (phi, count) = self.func.insert_value(
            InsertPoint::Before(first),
            IrType::I64,
            Origin::Instrumentation,
            None,
            |dest| Op::Phi {
                dest,
                incoming: vec![(preheader.block, one)],
            },
        )?;
        self.func.set_value_name(count, "loop.count");
        let at = self.func.first_insertion_point(header);
        let mut b = Builder::at(self.func, at);
        let meta = state.meta_ptr(&mut b, loop_meta)?;
        state.call(&mut b, RuntimeFn::LoopIter, vec![meta, count])?;
        let next = b.add(count, one, Origin::Instrumentation)?;
        if let Some(Op::Phi { incoming, .. }) = self.func.inst_mut(phi).map(|i| &mut i.op) {
            incoming.extend(info.latches.iter().map(|&latch| (BlockId::from(latch), next)));
        }

        state
            .log
            .record(EventKind::LoopInstrumented)
            .unit(&state.unit_name)
            .at(&self.func.name, header.index())
            .message(format!("loop at {header}: bounds={}", mask.bits()));
        Ok(())
    }
}

/// Instruments every user function of `unit` and records the result in
/// [`Unit::instrumentation`].
///
/// A unit that already carries an instrumentation record is returned unchanged.
///
/// # Errors
///
/// Fails when a runtime symbol clashes with an incompatible definition, when the IR is
/// malformed, or, with [`InstrumentConfig::verify`], when the result does not verify.
pub fn instrument_unit<A: AnalysisProvider + ?Sized>(
    unit: &mut Unit,
    analyses: &A,
    config: &InstrumentConfig,
    log: &EventLog,
) -> Result<UnitInstrumentation> {
    if let Some(record) = &unit.instrumentation {
        log.record(EventKind::Info)
            .unit(&unit.name)
            .message("unit is already instrumented");
        return Ok(record.clone());
    }
    tracing::debug!("instrument unit {}", unit.name);

    let runtime = RuntimeDecls::declare_all(unit, config.bound_bits)?;
    let pool = declare_pool(unit)?;
    let base = unit.add_global(Global {
        linkage: Linkage::Internal,
        origin: Origin::Instrumentation,
        ..Global::new(UNIT_BASE_GLOBAL, IrType::I64, GlobalInit::Int(0))
    });
    let describe = unit.add_function(describe_function(base)?);

    let callees = unit
        .functions()
        .map(|(_, f)| CalleeInfo {
            name: f.name.clone(),
            skip: is_skipped(f),
        })
        .collect();
    let globals = unit
        .globals()
        .filter(|(_, g)| !g.origin.is_instrumentation())
        .map(|(id, g)| (id, g.ty.clone()))
        .collect();
    let mut state = UnitState {
        analyses,
        config,
        log,
        unit_name: unit.name.clone(),
        source_file: unit.source_file.clone(),
        meta: MetadataRegistry::new(),
        types: TypeRegistry::new(),
        runtime,
        pool,
        base,
        callees,
        globals,
    };
    state.meta.describe(
        MetaKind::Location.reserved_id(),
        descriptor::unknown_location(&unit.source_file),
    );

    state.declare_functions(unit);
    let register_globals = state.register_globals(unit)?;

    let bodies: Vec<FuncId> = unit
        .functions()
        .filter(|(id, f)| !state.callees[id.index()].skip && !f.is_declaration())
        .map(|(id, _)| id)
        .collect();
    for id in bodies {
        let meta = state
            .meta
            .get(&MetaEntity::Function(id))
            .ok_or_else(|| malformed_error!("function {} was never declared", id))?;
        let func = unit
            .function_mut(id)
            .ok_or_else(|| malformed_error!("dangling function handle {}", id))?;
        FunctionPass {
            func,
            id,
            meta,
            state: &mut state,
        }
        .run()?;
    }

    let (type_fixup, type_count) = state.finalize_types(unit)?;
    state.emit_descriptors(unit, describe)?;

    if config.verify {
        let result = verify_unit(unit);
        if !result.is_ok() {
            return Err(Error::Verification(format!("unit {}: {result}", unit.name)));
        }
    }

    let record = UnitInstrumentation {
        pool_size: Some(state.meta.len()),
        describe_fn: Some(describe),
        type_fixup: Some(type_fixup),
        type_count: Some(type_count),
        register_globals,
        initializer: None,
    };
    tracing::info!(
        "instrumented unit {}: {} ids, {} types",
        unit.name,
        state.meta.len(),
        type_count
    );
    unit.instrumentation = Some(record.clone());
    Ok(record)
}
