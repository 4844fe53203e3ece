extern crate clrexc;

use clrexc::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

struct CatchEverything;

impl FuncletInvoker for CatchEverything {
    fn is_type_compatible(&mut self, _throwable: ObjectRef, _catch_type: TypeToken) -> bool {
        true
    }
}

fn frames(depth: u64) -> Vec<FrameInfo> {
    let mut frames: Vec<FrameInfo> = (0..depth)
        .map(|index| {
            let sp = 0x1000 + index * 0x100;
            FrameInfo::managed(
                MethodId(index as u32 + 1),
                StackFrame(sp),
                StackFrame(sp + 0x100),
                0x10,
                vec![ExceptionClause::finally((0x00, 0x20), (0x40, 0x08))],
            )
        })
        .collect();

    let sp = 0x1000 + depth * 0x100;
    frames.push(FrameInfo::managed(
        MethodId(0xFFFF),
        StackFrame(sp),
        StackFrame(sp + 0x100),
        0x10,
        vec![ExceptionClause::catch((0x00, 0x20), (0x40, 0x08), TypeToken(0x0200_0001))],
    ));
    frames
}

/// Benchmark a full throw: throwable creation, both passes and tracker teardown.
fn bench_throw(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new().build().unwrap();
    let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();

    let mut group = c.benchmark_group("throw");
    for depth in [1u64, 8, 32] {
        let frames = frames(depth);
        group.throughput(Throughput::Elements(frames.len() as u64));
        group.bench_function(format!("depth_{depth}"), |b| {
            b.iter(|| {
                let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);
                let outcome = ExceptionDispatcher::new(&thread)
                    .throw(&exception, black_box(&frames), &mut CatchEverything)
                    .unwrap();
                black_box(outcome)
            });
        });
    }
    group.finish();
}

/// Benchmark materializing throwables for representations with rendered messages.
fn bench_get_throwable(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new().build().unwrap();
    let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();

    let mut group = c.benchmark_group("get_throwable");
    group.bench_function("kind_only", |b| {
        b.iter(|| {
            let exception = RuntimeException::kind_only(black_box(ExceptionKind::Format));
            black_box(exception.get_throwable(&thread))
        });
    });
    group.bench_function("message_with_args", |b| {
        b.iter(|| {
            let exception = RuntimeException::with_resource(
                ExceptionKind::Argument,
                ResourceId::INVALID_ARGUMENT_VALUE,
                black_box(&["count"]),
            );
            black_box(exception.get_throwable(&thread))
        });
    });
    group.finish();
}

/// Benchmark status code classification.
fn bench_classify(c: &mut Criterion) {
    let codes = [
        hr::COR_E_ARGUMENT,
        hr::E_OUTOFMEMORY,
        hr::COR_E_FILENOTFOUND,
        HResult::new(0x8BAD_F00D),
    ];

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(codes.len() as u64));
    group.bench_function("kind_from_hr", |b| {
        b.iter(|| {
            for code in &codes {
                black_box(kind_from_hr(black_box(*code), false));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_throw, bench_get_throwable, bench_classify);
criterion_main!(benches);
