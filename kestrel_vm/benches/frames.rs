//! Frame Layer Benchmarks
//!
//! # Benchmark Categories
//!
//! 1. **Push/Pop**: call-rate frame allocation on the data stack
//! 2. **Materialize**: frame object creation with and without pool reuse
//! 3. **Quicken**: one-time rewrite of code of various sizes
//! 4. **Stack Analysis**: per-offset stack shapes for line jumps

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group,
    criterion_main,
};
use kestrel_bytecode::{CodeBuilder, CodeObject, Opcode};
use kestrel_core::Value;
use kestrel_vm::{FrameState, Interpreter, QuickenConfig, VmConfig, mark_stacks, quicken};
use std::rc::Rc;

// =============================================================================
// Code Generators
// =============================================================================

/// Straight-line code mixing cached and uncached instructions.
fn create_mixed_code(n: usize) -> CodeObject {
    let mut b = CodeBuilder::new("mixed");
    let x = b.add_local("x");
    let name = b.add_name("attr");
    for i in 0..n {
        match i % 4 {
            0 => b.emit_arg(Opcode::LoadFast, x),
            1 => b.emit_arg(Opcode::LoadAttr, name),
            2 => b.emit_arg(Opcode::StoreFast, x),
            _ => b.emit(Opcode::Nop),
        }
    }
    let none = b.add_const(Value::none());
    b.emit_arg(Opcode::LoadConst, none);
    b.emit(Opcode::ReturnValue);
    b.set_stacksize(2);
    b.finish()
}

/// `n` nested for loops.
fn create_nested_loops(n: usize) -> CodeObject {
    let mut b = CodeBuilder::new("nested");
    let it = b.add_local("it");
    let mut exits = Vec::with_capacity(n);
    for depth in 0..n {
        b.set_line(depth as u32 + 1);
        let top = b.create_label();
        let done = b.create_label();
        b.emit_arg(Opcode::LoadFast, it);
        b.emit(Opcode::GetIter);
        b.bind_label(top);
        b.emit_jump(Opcode::ForIter, done);
        b.emit_arg(Opcode::StoreFast, it);
        exits.push((top, done));
    }
    for (top, done) in exits.into_iter().rev() {
        b.emit_jump(Opcode::JumpAbsolute, top);
        b.bind_label(done);
    }
    let none = b.add_const(Value::none());
    b.emit_arg(Opcode::LoadConst, none);
    b.emit(Opcode::ReturnValue);
    b.set_stacksize(2 * n + 1);
    b.finish()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");

    for nlocals in [0usize, 8, 64].iter() {
        let interp = Interpreter::new(VmConfig::disabled_quickening());
        let thread = interp.new_thread();
        let mut b = CodeBuilder::new("f");
        for i in 0..*nlocals {
            b.add_local(&format!("v{i}"));
        }
        b.emit(Opcode::ReturnValue);
        b.set_stacksize(4);
        let f = interp
            .new_function(Rc::new(b.finish()), interp.new_dict(), Vec::new())
            .unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(nlocals), nlocals, |bench, _| {
            bench.iter(|| {
                let id = thread.push_frame(&f, None).unwrap();
                thread.with_frame(id, |mut frame| frame.push(Value::int(1)));
                thread.pop_frame().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize");
    let interp = Interpreter::new(VmConfig::disabled_quickening());
    let thread = interp.new_thread();
    let f = interp
        .new_function(Rc::new(create_mixed_code(16)), interp.new_dict(), Vec::new())
        .unwrap();

    group.bench_function("pooled", |bench| {
        bench.iter(|| {
            let id = thread.push_frame(&f, None).unwrap();
            black_box(thread.materialize(id));
            thread.pop_frame().unwrap();
        });
    });

    group.bench_function("outlives_call", |bench| {
        bench.iter(|| {
            let id = thread.push_frame(&f, None).unwrap();
            thread.with_frame(id, |mut frame| frame.set_state(FrameState::Returned));
            let frame_obj = thread.materialize(id);
            thread.pop_frame().unwrap();
            black_box(frame_obj)
        });
    });

    group.finish();
}

fn bench_quicken(c: &mut Criterion) {
    let mut group = c.benchmark_group("quicken");
    let config = QuickenConfig::default();

    for n in [64usize, 512, 4096].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |bench, &n| {
            bench.iter_batched(
                || create_mixed_code(n),
                |code| {
                    quicken(&code, &config).unwrap();
                    black_box(code)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_mark_stacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_stacks");

    for depth in [1usize, 4, 16].iter() {
        let code = create_nested_loops(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &code, |bench, code| {
            bench.iter(|| black_box(mark_stacks(code)));
        });
    }

    group.finish();
}

criterion_group!(
    frame_benches,
    bench_push_pop,
    bench_materialize,
    bench_quicken,
    bench_mark_stacks
);
criterion_main!(frame_benches);
