//! Benchmarks for instrumenting and linking a synthetic program.
//!
//! Each unit holds a handful of functions with a counted loop over an array argument, a
//! stack array, a global and a call. The whole program is rebuilt per iteration since
//! instrumentation consumes it.

extern crate irprobe;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use irprobe::prelude::*;
use std::hint::black_box;

/// `void f(i32 n, ptr a) { i32 tmp[8]; for (i = 0; i < n; ++i) { a[i] = tmp[0]; callee(n, a); } }`
fn kernel(name: &str, callee: Option<FuncId>) -> Function {
    let mut func = Function::new(
        name,
        FunctionType::new(IrType::Void, vec![IrType::I32, IrType::Ptr]),
    );
    let n = func.param(0).unwrap();
    let a = func.param(1).unwrap();
    let mut b = Builder::new(&mut func);
    let entry = b.create_block(Origin::User);
    let header = b.create_block(Origin::User);
    let body = b.create_block(Origin::User);
    let exit = b.create_block(Origin::User);

    b.switch_to_block(entry);
    let tmp = b.alloca(IrType::array(IrType::I32, 8), Origin::User).unwrap();
    let zero = b.iconst(32, 0);
    let one = b.iconst(32, 1);
    b.jump(header, Origin::User).unwrap();

    b.switch_to_block(header);
    let i = b
        .phi(IrType::I32, vec![(entry, zero), (body, zero)], Origin::User)
        .unwrap();
    let c = b.cmp(CmpPred::Slt, i, n, Origin::User).unwrap();
    b.branch(c, body, exit, Origin::User).unwrap();

    b.switch_to_block(body);
    let p = b.element_ptr(IrType::I32, a, vec![i], Origin::User).unwrap();
    let t = b
        .element_ptr(IrType::array(IrType::I32, 8), tmp, vec![zero, zero], Origin::User)
        .unwrap();
    let v = b.load(IrType::I32, t, Origin::User).unwrap();
    b.store(v, p, Origin::User).unwrap();
    if let Some(callee) = callee {
        b.call(Callee::Direct(callee), IrType::Void, vec![n, a], Origin::User)
            .unwrap();
    }
    let next = b.add(i, one, Origin::User).unwrap();
    b.jump(header, Origin::User).unwrap();

    b.switch_to_block(exit);
    b.ret(None, Origin::User).unwrap();

    let phi = func.defining_inst(i).unwrap();
    if let Some(Op::Phi { incoming, .. }) = func.inst_mut(phi).map(|x| &mut x.op) {
        incoming[1].1 = next;
    }
    func
}

fn program(units: usize, functions: usize) -> Vec<Unit> {
    (0..units)
        .map(|u| {
            let mut unit = Unit::new(format!("unit{u}"), format!("unit{u}.c"));
            unit.add_global(Global::new(
                format!("table{u}"),
                IrType::array(IrType::F64, 16),
                GlobalInit::Zero,
            ));
            let mut previous = None;
            for f in 0..functions {
                previous = Some(unit.add_function(kernel(&format!("f{u}_{f}"), previous)));
            }
            if u == 0 {
                let mut main = Function::new("main", FunctionType::new(IrType::I32, vec![]));
                let mut b = Builder::new(&mut main);
                let entry = b.create_block(Origin::User);
                b.switch_to_block(entry);
                let zero = b.iconst(32, 0);
                b.ret(Some(zero), Origin::User).unwrap();
                unit.add_function(main);
            }
            unit
        })
        .collect()
}

fn bench_instrument_unit(c: &mut Criterion) {
    let analyses = BasicAnalyses::new();
    c.bench_function("instrument_unit_16_functions", |b| {
        b.iter_batched(
            || program(1, 16),
            |mut units| {
                let engine = Engine::default();
                let record = engine.instrument_unit(&mut units[0], &analyses).unwrap();
                black_box(record)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_run_program(c: &mut Criterion) {
    let analyses = BasicAnalyses::new();
    c.bench_function("run_8_units_8_functions", |b| {
        b.iter_batched(
            || program(8, 8),
            |mut units| {
                let engine = Engine::default();
                let report = engine.run(&mut units, &analyses).unwrap();
                black_box(report)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_relink(c: &mut Criterion) {
    let analyses = BasicAnalyses::new();
    let engine = Engine::default();
    let mut linked = program(8, 4);
    engine.run(&mut linked, &analyses).unwrap();
    c.bench_function("relink_8_units", |b| {
        b.iter_batched(
            || linked.clone(),
            |mut units| black_box(engine.link(&mut units).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_instrument_unit,
    bench_run_program,
    bench_relink
);
criterion_main!(benches);
