//! Index Hash Table Benchmarks
//!
//! Measures the Robin-Hood index table on the paths the VM exercises:
//! bulk identifier interning (insert), lookup hits and misses, and growth
//! from an undersized table.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quill_core::intern::{intern, InternedString};
use quill_core::IndexHashTable;

// =============================================================================
// Benchmark Helpers
// =============================================================================

fn numbered_keys(count: usize) -> Vec<InternedString> {
    (0..count).map(|i| intern(&format!("bench_key_{i}"))).collect()
}

fn filled_table(keys: &[InternedString]) -> IndexHashTable {
    let mut table = IndexHashTable::with_capacity(keys.len() as u32);
    for idx in 0..keys.len() as u32 {
        table.insert_nocheck(keys, idx);
    }
    table
}

// =============================================================================
// Insert Benchmarks
// =============================================================================

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_table_insert");

    for count in [16usize, 256, 4096] {
        let keys = numbered_keys(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("presized", count), &keys, |b, keys| {
            b.iter(|| black_box(filled_table(keys)))
        });

        group.bench_with_input(BenchmarkId::new("with_growth", count), &keys, |b, keys| {
            b.iter(|| {
                let mut table = IndexHashTable::new();
                for idx in 0..keys.len() as u32 {
                    table.insert_nocheck(keys, idx);
                }
                black_box(table)
            })
        });
    }

    group.finish();
}

// =============================================================================
// Fetch Benchmarks
// =============================================================================

fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_table_fetch");

    let keys = numbered_keys(1024);
    let table = filled_table(&keys);
    let probe = keys[512].clone();
    let missing = intern("bench_key_missing");

    group.bench_function("hit", |b| {
        b.iter(|| black_box(table.fetch(&keys, &probe)))
    });

    group.bench_function("miss", |b| {
        b.iter(|| black_box(table.fetch(&keys, &missing)))
    });

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(index_table_benches, bench_insert, bench_fetch);
criterion_main!(index_table_benches);
