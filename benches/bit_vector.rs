//! Bit vector benchmarks.
//!
//! Measures the scalar and CAS bit disciplines plus bulk fill, the hot
//! paths behind per-row null tracking.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use colstore::{BitVector, Pool};

const BITS: usize = 1_000_000;

fn prepared_vector() -> BitVector {
    let pool = Arc::new(Pool::new());
    let vector = BitVector::new(&pool);
    vector.ensure_capacity(BITS).unwrap();
    vector
}

fn bench_scalar_ops(c: &mut Criterion) {
    let vector = prepared_vector();

    let mut group = c.benchmark_group("bit_vector_scalar");
    group.throughput(Throughput::Elements(BITS as u64));

    group.bench_function("set_all", |b| {
        b.iter(|| {
            for ix in 0..BITS {
                vector.set(black_box(ix));
            }
        })
    });

    group.bench_function("get_all", |b| {
        b.iter(|| {
            let mut ones = 0usize;
            for ix in 0..BITS {
                ones += vector.get(black_box(ix)) as usize;
            }
            black_box(ones)
        })
    });

    group.finish();
}

fn bench_cas_ops(c: &mut Criterion) {
    let vector = prepared_vector();

    let mut group = c.benchmark_group("bit_vector_cas");
    group.throughput(Throughput::Elements(BITS as u64));

    group.bench_function("safe_get_and_set_all", |b| {
        b.iter(|| {
            for ix in 0..BITS {
                black_box(vector.safe_get_and_set(black_box(ix)));
            }
        })
    });

    group.finish();
}

fn bench_change_all(c: &mut Criterion) {
    let vector = prepared_vector();

    c.bench_function("bit_vector_change_all", |b| {
        b.iter(|| {
            vector.change_all(black_box(true));
            vector.change_all(black_box(false));
        })
    });
}

criterion_group!(benches, bench_scalar_ops, bench_cas_ops, bench_change_all);
criterion_main!(benches);
