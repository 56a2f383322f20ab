//! Timing for the operations most likely to sit on a hot path: creation,
//! checksum recomputation, split/merge, and serialization round-trips.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use cryptoblock::{BlockLimits, BlockSerializer, CryptoContext, EncryptedBlock, EncryptedSize, ReferenceContext};

fn ctx() -> Arc<dyn CryptoContext> {
    Arc::new(ReferenceContext::new())
}

fn bench_create(c: &mut Criterion) {
    let ctx = ctx();
    let mut group = c.benchmark_group("create_from_plaintext_size");
    for size in [128i64, 1024, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| EncryptedBlock::create_from_plaintext_size(ctx.clone(), size).unwrap());
        });
    }
    group.finish();
}

fn bench_recompute_checksums(c: &mut Criterion) {
    let ctx = ctx();
    let mut block = EncryptedBlock::create_from_plaintext_size(ctx, 4096).unwrap();
    c.bench_function("recompute_checksums_4096", |b| {
        b.iter(|| block.recompute_checksums().unwrap());
    });
}

fn bench_validate_integrity(c: &mut Criterion) {
    let ctx = ctx();
    let block = EncryptedBlock::create_from_plaintext_size(ctx, 4096).unwrap();
    c.bench_function("validate_integrity_4096", |b| {
        b.iter(|| block.validate_integrity().unwrap());
    });
}

fn bench_split(c: &mut Criterion) {
    let ctx = ctx();
    c.bench_function("split_block_1024", |b| {
        b.iter_batched(
            || EncryptedBlock::create_from_plaintext_size(ctx.clone(), 1024).unwrap(),
            |mut block| {
                let split_size = EncryptedSize::new(ctx.clone(), 512).unwrap();
                block.split_block(split_size, BlockLimits::default()).unwrap()
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_serialize_round_trip(c: &mut Criterion) {
    let ctx = ctx();
    let block = EncryptedBlock::create_from_plaintext_size(ctx.clone(), 4096).unwrap();
    let codec = BlockSerializer::new();
    c.bench_function("serialize_4096", |b| {
        b.iter(|| codec.serialize(&block).unwrap());
    });
    let bytes = codec.serialize(&block).unwrap();
    c.bench_function("deserialize_4096", |b| {
        b.iter(|| codec.deserialize(ctx.clone(), &bytes).unwrap());
    });
}

criterion_group!(
    benches,
    bench_create,
    bench_recompute_checksums,
    bench_validate_integrity,
    bench_split,
    bench_serialize_round_trip
);
criterion_main!(benches);
