//! Entry-point linking of instrumented units.
//!
//! Every unit numbers its metadata and types from zero. Linking gives each instrumented unit
//! an exported initializer `(i64 id_offset, i64 type_offset) -> i64` and chains them from the
//! program entry function:
//!
//! ```text
//! entry:
//!   call irprobe_allocate_pool(@irprobe.di.pool, <sum of pool sizes>)
//!   %1 = call irprobe.init.module0(0, 0)
//!   %2 = call irprobe.init.module1(%1, <types of unit 0>)
//!   ...
//! ```
//!
//! Each initializer stores its unit's descriptors, shifts its type ids, registers its globals
//! and returns the next free identifier. All checks and all name allocation happen before
//! the first unit is modified, so a failing link leaves every unit untouched.

use std::collections::HashSet;

use crate::{
    config::InstrumentConfig,
    events::{EventKind, EventLog},
    instrument::{
        runtime::{self, RuntimeFn},
        visitor::{pool_declaration, POOL_GLOBAL},
    },
    ir::{
        Builder, Callee, FuncId, Function, FunctionType, GlobalInit, InsertPoint, IrType, Linkage,
        Op, Origin, Unit,
    },
    Error, Result,
};

/// Placement of one unit in the merged numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedUnit {
    /// Unit name.
    pub unit: String,
    /// Exported initializer name.
    pub initializer: String,
    /// First metadata identifier of the unit.
    pub id_offset: u64,
    /// First type identifier of the unit.
    pub type_offset: u64,
}

/// Result of a successful link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    /// Unit defining the entry function.
    pub entry_unit: String,
    /// Total number of metadata identifiers, i.e. the pool size.
    pub pool_size: u64,
    /// Total number of types.
    pub type_count: u64,
    /// Instrumented units in chaining order.
    pub units: Vec<LinkedUnit>,
    /// Units without instrumentation.
    pub skipped: Vec<String>,
}

impl LinkReport {
    /// Returns the placement of the named unit.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&LinkedUnit> {
        self.units.iter().find(|u| u.unit == name)
    }
}

/// Everything known about one unit before anything is modified.
struct Plan {
    index: usize,
    pool_size: u64,
    type_count: u64,
    describe: FuncId,
    fixup: FuncId,
    globals: Option<FuncId>,
    existing: Option<FuncId>,
    name: String,
}

fn initializer_type() -> FunctionType {
    FunctionType::new(IrType::I64, vec![IrType::I64, IrType::I64])
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| malformed_error!("{} does not fit a 64-bit constant", value))
}

fn missing(unit: &Unit, what: &'static str) -> Error {
    Error::MissingUnitMetadata {
        unit: unit.name.clone(),
        what,
    }
}

/// Reads and checks the instrumentation record of `unit`.
///
/// Returns `None` for a unit that was never instrumented.
fn plan(index: usize, unit: &Unit) -> Result<Option<Plan>> {
    let Some(record) = &unit.instrumentation else {
        return Ok(None);
    };
    let resolves = |f: Option<FuncId>| f.filter(|&f| unit.function(f).is_some());
    let pool_size = record.pool_size.ok_or_else(|| missing(unit, "pool size"))?;
    let describe =
        resolves(record.describe_fn).ok_or_else(|| missing(unit, "describe function"))?;
    let fixup =
        resolves(record.type_fixup).ok_or_else(|| missing(unit, "type fix-up function"))?;
    let type_count = record.type_count.ok_or_else(|| missing(unit, "type count"))?;
    let globals = match record.register_globals {
        Some(f) => Some(resolves(Some(f)).ok_or_else(|| missing(unit, "global registration function"))?),
        None => None,
    };
    Ok(Some(Plan {
        index,
        pool_size,
        type_count,
        describe,
        fixup,
        globals,
        existing: resolves(record.initializer),
        name: String::new(),
    }))
}

/// Assigns every plan a name unused in all units and by every other plan.
///
/// Initializers created by an earlier link keep their name.
fn assign_names(plans: &mut [Plan], units: &[Unit], config: &InstrumentConfig) -> Result<()> {
    let base = &config.link.initializer_base;
    let mut assigned = HashSet::new();
    for plan in plans.iter_mut() {
        if let Some(f) = plan.existing {
            let name = units[plan.index]
                .function(f)
                .map(|f| f.name.clone())
                .ok_or_else(|| missing(&units[plan.index], "initializer"))?;
            assigned.insert(name.clone());
            plan.name = name;
        }
    }

    let mut suffix: u64 = 0;
    for plan in plans.iter_mut().filter(|p| p.existing.is_none()) {
        loop {
            if suffix > u64::from(config.link.max_suffix) {
                return Err(Error::NameExhausted { base: base.clone() });
            }
            let name = format!("{base}{suffix}");
            suffix += 1;
            if !assigned.contains(&name) && !units.iter().any(|u| u.has_symbol(&name)) {
                assigned.insert(name.clone());
                plan.name = name;
                break;
            }
        }
    }
    Ok(())
}

/// Builds the initializer of `plan` in its unit, replacing an earlier one in place.
fn build_initializer(unit: &mut Unit, plan: &Plan) -> Result<FuncId> {
    let mut func = Function::new(plan.name.as_str(), initializer_type());
    func.origin = Origin::Instrumentation;
    let (id_offset, type_offset) = match func.params() {
        [id, ty] => (*id, *ty),
        _ => return Err(malformed_error!("initializer {} has a bad signature", plan.name)),
    };
    let mut b = Builder::new(&mut func);
    let entry = b.create_block(Origin::Instrumentation);
    b.switch_to_block(entry);
    b.call(
        Callee::Direct(plan.describe),
        IrType::Void,
        vec![id_offset, type_offset],
        Origin::Instrumentation,
    )?;
    b.call(
        Callee::Direct(plan.fixup),
        IrType::Void,
        vec![type_offset],
        Origin::Instrumentation,
    )?;
    if let Some(globals) = plan.globals {
        b.call(Callee::Direct(globals), IrType::Void, vec![], Origin::Instrumentation)?;
    }
    let size = b.iconst(64, to_i64(plan.pool_size)?);
    let next = b.add(id_offset, size, Origin::Instrumentation)?;
    b.ret(Some(next), Origin::Instrumentation)?;

    let id = match plan.existing {
        Some(id) => {
            let slot = unit
                .function_mut(id)
                .ok_or_else(|| malformed_error!("dangling function handle {}", id))?;
            *slot = func;
            id
        }
        None => unit.add_function(func),
    };
    if let Some(record) = unit.instrumentation.as_mut() {
        record.initializer = Some(id);
    }
    Ok(id)
}

/// Removes the pool allocation and initializer calls a previous link placed in `func`.
fn erase_previous_chain(func: &mut Function, callees: &HashSet<FuncId>) -> Result<usize> {
    let stale: Vec<_> = func
        .inst_ids()
        .into_iter()
        .filter(|&i| {
            func.inst(i).is_some_and(|inst| {
                inst.origin.is_instrumentation()
                    && matches!(&inst.op, Op::Call { callee: Callee::Direct(f), .. } if callees.contains(f))
            })
        })
        .collect();
    for &inst in &stale {
        func.erase(inst)?;
    }
    Ok(stale.len())
}

/// Links the instrumented units of a program through its entry function.
///
/// # Errors
///
/// - [`Error::EntryPointNotFound`] if no unit defines the entry function
/// - [`Error::MissingUnitMetadata`] if an instrumented unit has an incomplete record
/// - [`Error::NameExhausted`] if no free initializer name remains
/// - [`Error::RuntimeSignature`] if the entry unit declares the pool or the allocator
///   incompatibly
///
/// Nothing is modified when an error is returned.
pub fn link(units: &mut [Unit], config: &InstrumentConfig, log: &EventLog) -> Result<LinkReport> {
    let entry_index = units
        .iter()
        .position(|u| {
            u.find_function(&config.entry_point)
                .and_then(|f| u.function(f))
                .is_some_and(|f| !f.is_declaration())
        })
        .ok_or_else(|| Error::EntryPointNotFound(config.entry_point.clone()))?;

    let mut plans = Vec::new();
    let mut skipped = Vec::new();
    for (index, unit) in units.iter().enumerate() {
        match plan(index, unit)? {
            Some(plan) => plans.push(plan),
            None => skipped.push(unit.name.clone()),
        }
    }
    assign_names(&mut plans, units, config)?;

    let entry_unit = &units[entry_index];
    if let Some(pool) = entry_unit.find_global(POOL_GLOBAL) {
        if entry_unit.global(pool).is_some_and(|g| g.ty != IrType::Ptr) {
            return Err(Error::RuntimeSignature {
                name: POOL_GLOBAL.to_string(),
            });
        }
    }
    if let Some(f) = entry_unit.find_function(RuntimeFn::AllocatePool.name()) {
        let expected = RuntimeFn::AllocatePool.signature(config.bound_bits);
        if entry_unit.function(f).is_some_and(|f| f.sig != expected) {
            return Err(Error::RuntimeSignature {
                name: RuntimeFn::AllocatePool.name().to_string(),
            });
        }
    }

    // Every check passed; from here on units are modified.
    let mut report = LinkReport {
        entry_unit: entry_unit.name.clone(),
        pool_size: 0,
        type_count: 0,
        units: Vec::with_capacity(plans.len()),
        skipped,
    };
    let mut chain = Vec::with_capacity(plans.len());
    for plan in &plans {
        let unit = &mut units[plan.index];
        let id = build_initializer(unit, plan)?;
        chain.push((plan.index, id, plan.name.clone(), report.type_count));
        report.units.push(LinkedUnit {
            unit: unit.name.clone(),
            initializer: plan.name.clone(),
            id_offset: report.pool_size,
            type_offset: report.type_count,
        });
        log.record(EventKind::UnitLinked)
            .unit(&unit.name)
            .function(&plan.name)
            .message(format!(
                "id offset {}, type offset {}",
                report.pool_size, report.type_count
            ));
        report.pool_size += plan.pool_size;
        report.type_count += plan.type_count;
    }
    for name in &report.skipped {
        tracing::warn!("unit {} has no instrumentation and is not observed", name);
        log.record(EventKind::UnitSkipped)
            .unit(name)
            .message("no instrumentation metadata");
    }

    let unit = &mut units[entry_index];
    let pool = unit.get_or_insert_global(POOL_GLOBAL, pool_declaration);
    if let Some(global) = unit.global_mut(pool) {
        if global.is_declaration() {
            global.init = GlobalInit::Zero;
        }
    }
    let allocate = runtime::declare(unit, RuntimeFn::AllocatePool, config.bound_bits)?;
    let mut callees = HashSet::from([allocate]);
    let mut steps = Vec::with_capacity(chain.len());
    for (index, id, name, type_offset) in chain {
        let local = if index == entry_index {
            id
        } else {
            let decl = unit.get_or_insert_function(&name, initializer_type());
            if let Some(f) = unit.function_mut(decl) {
                f.origin = Origin::Instrumentation;
                f.linkage = Linkage::External;
            }
            decl
        };
        callees.insert(local);
        steps.push((local, type_offset));
    }

    let entry_fn = unit
        .find_function(&config.entry_point)
        .ok_or_else(|| Error::EntryPointNotFound(config.entry_point.clone()))?;
    let func = unit
        .function_mut(entry_fn)
        .ok_or_else(|| malformed_error!("dangling function handle {}", entry_fn))?;
    let erased = erase_previous_chain(func, &callees)?;
    if erased > 0 {
        tracing::debug!("replace {} calls of an earlier link in {}", erased, func.name);
    }
    let entry = func
        .entry()
        .ok_or_else(|| malformed_error!("entry function {} has no body", func.name))?;
    let mut b = Builder::at(func, InsertPoint::Start(entry));
    let pool_ref = b.func().global_ref(pool);
    let total = b.iconst(64, to_i64(report.pool_size)?);
    b.call(
        Callee::Direct(allocate),
        IrType::Void,
        vec![pool_ref, total],
        Origin::Instrumentation,
    )?;
    let mut free = b.iconst(64, 0);
    for (initializer, type_offset) in steps {
        let type_offset = b.iconst(64, to_i64(type_offset)?);
        free = b
            .call(
                Callee::Direct(initializer),
                IrType::I64,
                vec![free, type_offset],
                Origin::Instrumentation,
            )?
            .ok_or_else(|| malformed_error!("initializer call has no result"))?;
    }

    tracing::info!(
        "linked {} units into {}: pool size {}, {} types",
        report.units.len(),
        report.entry_unit,
        report.pool_size,
        report.type_count
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{verify_unit, BasicAnalyses},
        instrument::visitor::instrument_unit,
        ir::UnitInstrumentation,
    };

    fn unit_with(name: &str, func: &str) -> Unit {
        let mut unit = Unit::new(name, format!("{name}.c"));
        let mut f = Function::new(func, FunctionType::new(IrType::I32, vec![]));
        let mut b = Builder::new(&mut f);
        let entry = b.create_block(Origin::User);
        b.switch_to_block(entry);
        let zero = b.iconst(32, 0);
        b.ret(Some(zero), Origin::User).unwrap();
        unit.add_function(f);
        unit
    }

    fn instrumented(name: &str, func: &str) -> Unit {
        let mut unit = unit_with(name, func);
        instrument_unit(
            &mut unit,
            &BasicAnalyses::new(),
            &InstrumentConfig::default(),
            &EventLog::new(),
        )
        .unwrap();
        unit
    }

    fn chain_calls(unit: &Unit, entry: &str) -> Vec<(FuncId, Vec<crate::ir::ValueId>)> {
        let func = unit.function(unit.find_function(entry).unwrap()).unwrap();
        func.inst_ids()
            .into_iter()
            .filter_map(|i| match func.op(i) {
                Some(Op::Call {
                    callee: Callee::Direct(f),
                    args,
                    ..
                }) if func.inst(i).unwrap().origin.is_instrumentation() => {
                    Some((*f, args.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_two_units_are_chained() {
        let mut units = vec![instrumented("a", "main"), instrumented("b", "helper")];
        let sizes: Vec<u64> = units
            .iter()
            .map(|u| u.instrumentation.as_ref().unwrap().pool_size.unwrap())
            .collect();
        let log = EventLog::new();
        let report = link(&mut units, &InstrumentConfig::default(), &log).unwrap();

        assert_eq!(report.entry_unit, "a");
        assert_eq!(report.pool_size, sizes[0] + sizes[1]);
        assert_eq!(report.unit("b").unwrap().id_offset, sizes[0]);
        assert_eq!(report.units[0].initializer, "irprobe.init.module0");
        assert_eq!(report.units[1].initializer, "irprobe.init.module1");
        assert_eq!(log.count_kind(EventKind::UnitLinked), 2);

        let a = &units[0];
        let calls = chain_calls(a, "main");
        let allocate = a.find_function(RuntimeFn::AllocatePool.name()).unwrap();
        assert_eq!(calls[0].0, allocate);
        let func = a.function(a.find_function("main").unwrap()).unwrap();
        assert_eq!(func.as_const_int(calls[0].1[1]), Some(report.pool_size as i64));
        assert_eq!(calls[1].0, a.find_function("irprobe.init.module0").unwrap());
        assert_eq!(calls[2].0, a.find_function("irprobe.init.module1").unwrap());
        assert!(a.function(calls[2].0).unwrap().is_declaration());

        let pool = a.find_global(POOL_GLOBAL).unwrap();
        assert_eq!(a.global(pool).unwrap().init, GlobalInit::Zero);
        let pool_b = units[1].find_global(POOL_GLOBAL).unwrap();
        assert!(units[1].global(pool_b).unwrap().is_declaration());
        for unit in &units {
            let result = verify_unit(unit);
            assert!(result.is_ok(), "{result}");
        }
    }

    #[test]
    fn test_relink_reuses_names_and_replaces_chain() {
        let mut units = vec![instrumented("a", "main"), instrumented("b", "helper")];
        let config = InstrumentConfig::default();
        let first = link(&mut units, &config, &EventLog::new()).unwrap();
        let functions = units[0].function_count();
        let calls = chain_calls(&units[0], "main");
        let second = link(&mut units, &config, &EventLog::new()).unwrap();
        assert_eq!(first, second);
        assert_eq!(units[0].function_count(), functions);
        let again = chain_calls(&units[0], "main");
        assert_eq!(again.len(), calls.len());
        let callees: Vec<FuncId> = again.iter().map(|(f, _)| *f).collect();
        assert_eq!(callees, calls.iter().map(|(f, _)| *f).collect::<Vec<_>>());
    }

    #[test]
    fn test_uninstrumented_unit_is_skipped() {
        let mut units = vec![instrumented("a", "main"), unit_with("plain", "other")];
        let log = EventLog::new();
        let report = link(&mut units, &InstrumentConfig::default(), &log).unwrap();
        assert_eq!(report.skipped, vec!["plain".to_string()]);
        assert_eq!(report.units.len(), 1);
        assert!(log.has(EventKind::UnitSkipped));
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_missing_type_count_aborts_without_changes() {
        let mut units = vec![instrumented("a", "main"), instrumented("b", "helper")];
        if let Some(record) = units[1].instrumentation.as_mut() {
            record.type_count = None;
        }
        let before = units[0].function_count();
        let err = link(&mut units, &InstrumentConfig::default(), &EventLog::new()).unwrap_err();
        match err {
            Error::MissingUnitMetadata { unit, what } => {
                assert_eq!(unit, "b");
                assert_eq!(what, "type count");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(units[0].function_count(), before);
        assert!(units[0].instrumentation.as_ref().unwrap().initializer.is_none());
    }

    #[test]
    fn test_names_skip_taken_symbols_and_exhaust() {
        let mut a = instrumented("a", "main");
        a.add_function(Function::new(
            "irprobe.init.module0",
            FunctionType::new(IrType::Void, vec![]),
        ));
        let mut units = vec![a, instrumented("b", "helper")];
        let report = link(&mut units, &InstrumentConfig::default(), &EventLog::new()).unwrap();
        assert_eq!(report.units[0].initializer, "irprobe.init.module1");
        assert_eq!(report.units[1].initializer, "irprobe.init.module2");

        let mut units = vec![instrumented("a", "main"), instrumented("b", "helper")];
        units[1].add_function(Function::new(
            "irprobe.init.module1",
            FunctionType::new(IrType::Void, vec![]),
        ));
        let config = InstrumentConfig::default()
            .with_link(crate::config::LinkConfig::new().with_max_suffix(1));
        let err = link(&mut units, &config, &EventLog::new()).unwrap_err();
        assert!(matches!(err, Error::NameExhausted { .. }));
    }

    #[test]
    fn test_missing_entry_point() {
        let mut units = vec![instrumented("b", "helper")];
        let err = link(&mut units, &InstrumentConfig::default(), &EventLog::new()).unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound(name) if name == "main"));
    }

    #[test]
    fn test_hand_made_record_is_checked() {
        let mut unit = unit_with("a", "main");
        unit.instrumentation = Some(UnitInstrumentation {
            pool_size: Some(4),
            ..UnitInstrumentation::default()
        });
        let err = link(
            &mut [unit],
            &InstrumentConfig::default(),
            &EventLog::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingUnitMetadata {
                what: "describe function",
                ..
            }
        ));
    }
}
