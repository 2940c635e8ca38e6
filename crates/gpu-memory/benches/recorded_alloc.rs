// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the recorded allocate/free path.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gpu_backend::SimulatedBackend;
use gpu_memory::RecordedAllocator;
use std::hint::black_box;
use std::sync::Arc;

fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free");
    for (label, limit) in [("unlimited", 0u64), ("limited", 1 << 30)] {
        let allocator =
            RecordedAllocator::new(0, limit, Arc::new(SimulatedBackend::single(4 << 30)));
        group.bench_with_input(BenchmarkId::from_parameter(label), &allocator, |b, a| {
            b.iter(|| {
                let p = a.allocate(black_box(64 << 10), false).unwrap();
                a.free(p, 64 << 10);
            })
        });
    }
    group.finish();
}

fn bench_limit_rejection(c: &mut Criterion) {
    let allocator = RecordedAllocator::new(0, 1 << 20, Arc::new(SimulatedBackend::single(4 << 30)));
    c.bench_function("limit_rejection", |b| {
        b.iter(|| allocator.allocate(black_box(2 << 20), false).is_err())
    });
}

fn bench_mem_info(c: &mut Criterion) {
    let mut group = c.benchmark_group("mem_info");
    for (label, limit) in [("unlimited", 0u64), ("limited", 1 << 30)] {
        let allocator =
            RecordedAllocator::new(0, limit, Arc::new(SimulatedBackend::single(4 << 30)));
        group.bench_with_input(BenchmarkId::from_parameter(label), &allocator, |b, a| {
            b.iter(|| black_box(a.mem_info()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allocate_free, bench_limit_rejection, bench_mem_info);
criterion_main!(benches);
