//! Benchmarks for scope resolution and probe composition.
//!
//! Measures the hot parts of a request against a synthetic host:
//! - Pattern resolution, sequential and parallel
//! - Restriction checks over many qualified names
//! - Composition of several probes for one member
//! - A full instrument / uninstrument cycle

extern crate livescope;

use criterion::{criterion_group, criterion_main, Criterion};
use livescope::prelude::*;
use std::{hint::black_box, sync::Arc};

/// Loads `units` units with `members` methods each, spread over a few packages.
fn synthetic_host(units: usize, members: usize) -> Arc<InMemoryHost> {
    let host = Arc::new(InMemoryHost::new());
    for u in 0..units {
        let package = ["api", "service", "internal", "util"][u % 4];
        let mut builder = UnitBuilder::new(format!("com.app.{}.Unit{}", package, u));
        for m in 0..members {
            builder = builder.method(&format!("op{}", m), &["int"], |b| {
                b.source("work(arg0)")
                    .call("com.app.util.Unit3", "op0(int)")
                    .returns()
            });
        }
        host.load(builder);
    }
    host
}

fn description() -> InstrumentationDescription {
    InstrumentationDescriptionBuilder::new()
        .method_pattern(&["com.app.*.op1(*)", "com.app.service.*"], &["ResponseTimeProbe"])
        .global_restriction(RestrictionSet::new().exclude("com.app.internal"))
        .build()
        .unwrap()
}

/// Benchmark resolving a two-pattern scope over 2000 units on one thread.
fn bench_resolve_sequential(c: &mut Criterion) {
    let host = synthetic_host(2000, 20);
    let registry = Arc::new(ExtensionRegistry::with_builtins().unwrap());
    let resolver = ScopeResolver::new(host, registry).with_parallelism(false);
    let description = description();

    c.bench_function("resolve_sequential_2000_units", |b| {
        b.iter(|| black_box(resolver.resolve(black_box(&description)).unwrap()));
    });
}

/// Benchmark the same resolution on the rayon pool.
fn bench_resolve_parallel(c: &mut Criterion) {
    let host = synthetic_host(2000, 20);
    let registry = Arc::new(ExtensionRegistry::with_builtins().unwrap());
    let resolver = ScopeResolver::new(host, registry);
    let description = description();

    c.bench_function("resolve_parallel_2000_units", |b| {
        b.iter(|| black_box(resolver.resolve(black_box(&description)).unwrap()));
    });
}

/// Benchmark restriction checks with overlapping include and exclude entries.
fn bench_restriction_checks(c: &mut Criterion) {
    let restriction = RestrictionSet::new()
        .include("com.app")
        .include("com.app.internal.Pool")
        .exclude("com.app.internal")
        .exclude("com.app.*.generated*");
    let names: Vec<String> = (0..1000)
        .map(|i| format!("com.app.{}.Unit{}", ["api", "internal", "util"][i % 3], i))
        .collect();

    c.bench_function("restriction_1000_names", |b| {
        b.iter(|| {
            names
                .iter()
                .filter(|name| restriction.is_excluded(black_box(name)))
                .count()
        });
    });
}

/// Benchmark composing three probes for one member with a warm fragment cache.
fn bench_compose(c: &mut Criterion) {
    let registry = ExtensionRegistry::with_builtins().unwrap();
    let compiler = ProbeFragmentCompiler::new();

    c.bench_function("compose_three_probes", |b| {
        b.iter(|| {
            let mut composer = ProbeComposer::new(
                &compiler,
                &registry,
                "GenericProbe",
                "com.app.api.Unit0.op1(int)",
            )
            .with_granularity(0.5);
            for probe in ["ResponseTimeProbe", "NanoResponseTimeProbe", "SqlQueryProbe"] {
                composer.inject(probe).unwrap();
            }
            black_box(composer.build().unwrap())
        });
    });
}

/// Benchmark a full request over 200 units followed by its withdrawal.
fn bench_instrument_cycle(c: &mut Criterion) {
    let host = synthetic_host(200, 10);
    let engine = Engine::attach(host, EngineConfig::default()).unwrap();
    let description = description();

    c.bench_function("instrument_uninstrument_200_units", |b| {
        b.iter(|| {
            let request = engine.instrument(black_box(&description)).unwrap();
            black_box(engine.uninstrument(request).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_resolve_sequential,
    bench_resolve_parallel,
    bench_restriction_checks,
    bench_compose,
    bench_instrument_cycle,
);
criterion_main!(benches);
