//! Insert/search throughput across the four index engines, same workload
//! shape for each so the numbers are comparable (§8.4).

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use reldb_core::codec;
use reldb_core::heap::HeapFile;
use reldb_core::index::avl::AvlIdx;
use reldb_core::index::btree::BPlusIdx;
use reldb_core::index::hash::HashIdx;
use reldb_core::index::rtree::RTreeIdx;
use reldb_core::index::{HeapColumnReader, Index};
use reldb_core::schema::{Attribute, DataType, Schema};
use reldb_core::value::{Point, Value};
use tempfile::tempdir;

const ROWS: i32 = 500;

fn schema_with(data_type: DataType) -> Schema {
    Schema::new("bench", vec![Attribute::new("id", DataType::Int).primary_key(), Attribute::new("col", data_type)])
}

fn seeded_heap(schema: &Schema, dir: &std::path::Path, value_at: impl Fn(i32) -> Value) -> Arc<HeapFile> {
    let heap = Arc::new(HeapFile::init(dir.join("heap.bin"), schema.record_size()).unwrap());
    for i in 0..ROWS {
        let block = codec::encode(schema, &[Value::Int(i), value_at(i)], codec::NEXT_LIVE).unwrap();
        heap.insert(&block).unwrap();
    }
    heap
}

fn bench_avl(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(schema_with(DataType::Int));
    let heap = seeded_heap(&schema, dir.path(), Value::Int);
    let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);

    c.bench_function("avl_insert", |b| {
        b.iter_batched(
            || {
                let path = dir.path().join(format!("avl-{}.dat", fastrand_like()));
                AvlIdx::init(path, reader.clone(), false, false).unwrap()
            },
            |mut idx| {
                for id in 0..ROWS as u32 {
                    idx.insert(id).unwrap();
                }
            },
            criterion::BatchSize::LargeInput,
        )
    });

    let mut idx = AvlIdx::init(dir.path().join("avl-search.dat"), reader.clone(), false, false).unwrap();
    for id in 0..ROWS as u32 {
        idx.insert(id).unwrap();
    }
    c.bench_with_input(BenchmarkId::new("avl_search", ROWS), &idx, |b, idx| {
        b.iter(|| idx.search(&Value::Int(ROWS / 2)).unwrap())
    });
}

fn bench_btree(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(schema_with(DataType::Int));
    let heap = seeded_heap(&schema, dir.path(), Value::Int);
    let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);

    let mut idx = BPlusIdx::init(dir.path().join("tree.dat"), dir.path().join("meta.dat"), reader, false).unwrap();
    for id in 0..ROWS as u32 {
        idx.insert(id).unwrap();
    }
    c.bench_with_input(BenchmarkId::new("btree_range_search", ROWS), &idx, |b, idx| {
        b.iter(|| idx.range_search(&Value::Int(ROWS / 4), &Value::Int(3 * ROWS / 4)).unwrap())
    });
}

fn bench_hash(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(schema_with(DataType::Int));
    let heap = seeded_heap(&schema, dir.path(), Value::Int);
    let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);

    let mut idx = HashIdx::init(dir.path().join("dir.dat"), dir.path().join("buckets.dat"), reader, false).unwrap();
    for id in 0..ROWS as u32 {
        idx.insert(id).unwrap();
    }
    c.bench_with_input(BenchmarkId::new("hash_search", ROWS), &idx, |b, idx| {
        b.iter(|| idx.search(&Value::Int(ROWS / 2)).unwrap())
    });
}

fn bench_rtree(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let schema = Arc::new(schema_with(DataType::Point));
    let heap = seeded_heap(&schema, dir.path(), |i| Value::Point(Point::new(i as f64, i as f64)));
    let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);

    let mut idx = RTreeIdx::init(dir.path().join("rtree.json"), reader, false).unwrap();
    for id in 0..ROWS as u32 {
        idx.insert(id).unwrap();
    }
    c.bench_with_input(BenchmarkId::new("rtree_knn", ROWS), &idx, |b, idx| {
        b.iter(|| idx.knn_search(&Point::origin(), 10).unwrap())
    });
}

fn fastrand_like() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
}

criterion_group!(benches, bench_avl, bench_btree, bench_hash, bench_rtree);
criterion_main!(benches);
