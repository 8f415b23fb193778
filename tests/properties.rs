//! Property-based checks for the universal properties enumerated in
//! SPEC_FULL.md §9, driven through the public crate surface rather than
//! per-module internals (those get their own unit-level property where the
//! invariant is specific to one index, e.g. the AVL balance check).

use std::collections::HashSet;

use proptest::prelude::*;
use tempfile::tempdir;

use reldb_core::codec;
use reldb_core::heap::HeapFile;
use reldb_core::schema::{Attribute, DataType, IndexKind, Schema};
use reldb_core::table::{EqualsPredicate, Predicates, RangePredicate, Table};
use reldb_core::value::{Point, Value};
use reldb_core::{Catalog, StoreConfig};

fn productos_schema() -> Schema {
    Schema::new(
        "productos",
        vec![
            Attribute::new("id", DataType::Int).primary_key().indexed(IndexKind::Hash),
            Attribute::new("nombre", DataType::Varchar(20)).indexed(IndexKind::Avl),
            Attribute::new("precio", DataType::Decimal).indexed(IndexKind::Btree),
        ],
    )
}

fn short_ident() -> impl Strategy<Value = String> {
    "[a-zA-Z]{1,8}".prop_map(|s| s)
}

proptest! {
    /// Property 1: encode/decode round-trips every value, strings re-trimmed
    /// of their NUL padding and POINT reconstructed within tolerance.
    #[test]
    fn round_trip_preserves_any_valid_record(id in any::<i32>(), name in short_ident(), precio in -1.0e6f64..1.0e6) {
        let schema = Schema::new(
            "t",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("nombre", DataType::Varchar(20)),
                Attribute::new("precio", DataType::Decimal),
            ],
        );
        let values = vec![Value::Int(id), Value::Text(name), Value::Decimal(precio)];
        let bytes = codec::encode(&schema, &values, codec::NEXT_LIVE).unwrap();
        prop_assert_eq!(bytes.len(), schema.record_size());
        let (decoded, next) = codec::decode(&schema, &bytes).unwrap();
        prop_assert_eq!(decoded, values);
        prop_assert_eq!(next, codec::NEXT_LIVE);
    }

    /// Property 2: after N inserts and k deletes, the next k inserts reuse
    /// the deleted ids in LIFO order of deletion; the (k+1)-th appends.
    #[test]
    fn slot_reuse_is_lifo_for_any_delete_subset(n in 5usize..20, deletions in prop::collection::vec(0usize..20, 1..5)) {
        let n = n.max(*deletions.iter().max().unwrap_or(&0) + 1);
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        let mut block_for = |tag: u8| {
            let mut b = vec![tag; 4];
            b.extend_from_slice(&(-2i32).to_le_bytes());
            b
        };
        let ids: Vec<_> = (0..n).map(|i| heap.insert(&block_for(i as u8)).unwrap()).collect();

        let mut to_delete: Vec<usize> = deletions.into_iter().filter(|&i| i < n).collect();
        to_delete.dedup();
        let mut deleted_ids = Vec::new();
        for &i in &to_delete {
            if heap.delete(ids[i]).unwrap() {
                deleted_ids.push(ids[i]);
            }
        }

        let k = deleted_ids.len();
        let mut reused = Vec::new();
        for _ in 0..k {
            reused.push(heap.insert(&block_for(9)).unwrap());
        }
        let mut expected_lifo = deleted_ids.clone();
        expected_lifo.reverse();
        prop_assert_eq!(reused, expected_lifo);

        let appended = heap.insert(&block_for(9)).unwrap();
        prop_assert_eq!(appended as usize, n + 1);
    }

    /// Property 3 + 4: every live record is found by every indexed column's
    /// exact search, and an `is_key` column never returns more than one id.
    #[test]
    fn index_heap_consistency_and_uniqueness(
        rows in prop::collection::vec((1i32..500, short_ident(), 0.0f64..1000.0), 1..15)
    ) {
        let mut seen_ids = HashSet::new();
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let mut inserted = Vec::new();
        for (id, name, precio) in rows {
            if !seen_ids.insert(id) {
                continue;
            }
            let rid = table
                .insert(&[Value::Int(id), Value::Text(name.clone()), Value::Decimal(precio)])
                .unwrap();
            inserted.push((rid, id, name, precio));
        }

        for (rid, id, _, _) in &inserted {
            let mut preds = Predicates::default();
            preds.equals.push(EqualsPredicate { attr: "id".into(), value: Value::Int(*id) });
            let found = table.select(&preds).unwrap();
            prop_assert!(found.contains(rid));
            prop_assert!(found.len() <= 1);
        }
    }

    /// Property 5: range_search over a B+ tree returns exactly the live ids
    /// whose value falls within [lo, hi].
    #[test]
    fn range_correctness_for_decimal_column(
        rows in prop::collection::vec((1i32..500, 0.0f64..1000.0), 1..15),
        lo in 0.0f64..500.0,
        span in 0.0f64..500.0,
    ) {
        let hi = lo + span;
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let mut seen_ids = HashSet::new();
        let mut truth = Vec::new();
        for (id, precio) in rows {
            if !seen_ids.insert(id) {
                continue;
            }
            let rid = table.insert(&[Value::Int(id), Value::Text("x".into()), Value::Decimal(precio)]).unwrap();
            if precio >= lo && precio <= hi {
                truth.push(rid);
            }
        }
        truth.sort();

        let mut preds = Predicates::default();
        preds.ranges.push(RangePredicate { attr: "precio".into(), lo: Value::Decimal(lo), hi: Value::Decimal(hi) });
        let mut found = table.select(&preds).unwrap();
        found.sort();
        prop_assert_eq!(found, truth);
    }

    /// Property 9: KNN never returns more than k ids, sorted nearest-first,
    /// and every returned id is no farther than any id left out.
    #[test]
    fn knn_returns_k_nearest_in_order(
        points in prop::collection::vec((-100.0f64..100.0, -100.0f64..100.0), 1..12),
        k in 1usize..8,
    ) {
        let dir = tempdir().unwrap();
        let schema = Schema::new(
            "lugares",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("loc", DataType::Point).indexed(IndexKind::Rtree),
            ],
        );
        let mut table = Table::create(dir.path().to_path_buf(), schema).unwrap();
        let mut all_points = Vec::new();
        for (i, (x, y)) in points.iter().enumerate() {
            table.insert(&[Value::Int(i as i32), Value::Point(Point::new(*x, *y))]).unwrap();
            all_points.push(Point::new(*x, *y));
        }

        let mut preds = Predicates::default();
        preds.spatials.push(reldb_core::table::SpatialPredicate::Knn {
            attr: "loc".into(),
            center: Point::origin(),
            k,
        });
        let found = table.select(&preds).unwrap();
        prop_assert!(found.len() <= k.min(all_points.len()));

        let mut distances: Vec<f64> = all_points.iter().map(|p| p.distance_to(&Point::origin())).collect();
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if let Some(&kth) = distances.get(found.len().saturating_sub(1)) {
            for id in &found {
                let block = table.get(*id).unwrap().unwrap();
                if let Value::Point(p) = &block[1] {
                    prop_assert!(p.distance_to(&Point::origin()) <= kth + 1e-9);
                }
            }
        }
    }

    /// Property 10: DELETE without WHERE is always refused and never
    /// mutates state, regardless of what rows already exist.
    #[test]
    fn delete_without_where_never_mutates_state(
        rows in prop::collection::vec((1i32..500, short_ident(), 0.0f64..1000.0), 0..10)
    ) {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let config = StoreConfig::new(dir.path());
        reldb_core::sql::execute_batch(
            &mut catalog,
            &config,
            "CREATE TABLE T (id INT PRIMARY KEY, nombre VARCHAR[20] INDEX avl, precio DECIMAL INDEX btree);",
        );
        let mut seen_ids = HashSet::new();
        let mut insert_count = 0;
        for (id, name, precio) in rows {
            if !seen_ids.insert(id) {
                continue;
            }
            let sql = format!("INSERT INTO T VALUES ({id}, '{name}', {precio});");
            let outcomes = reldb_core::sql::execute_batch(&mut catalog, &config, &sql);
            if matches!(outcomes[0], reldb_core::sql::StatementOutcome::Inserted { .. }) {
                insert_count += 1;
            }
        }

        let before = catalog.table("T").unwrap().select(&Predicates::default()).unwrap().len();
        prop_assert_eq!(before, insert_count);

        let outcomes = reldb_core::sql::execute_batch(&mut catalog, &config, "DELETE FROM T;");
        prop_assert!(matches!(outcomes[0], reldb_core::sql::StatementOutcome::Failed { .. }));

        let after = catalog.table("T").unwrap().select(&Predicates::default()).unwrap().len();
        prop_assert_eq!(after, before);
    }
}
